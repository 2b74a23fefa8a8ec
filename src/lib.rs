//! OpenID Connect authorization-code relying party and a bearer-token
//! resource server that verifies the provider's RS256 access tokens.

pub mod error;
pub mod oidc;
pub mod relying_party;
pub mod resource_server;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{OidcError, Result};
