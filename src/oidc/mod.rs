//! OpenID Connect token handling.
//!
//! Structural decoding, the signing-key cache, bearer-token verification and
//! the authorization-code exchange.

pub mod config;
pub mod decode;
pub mod exchange;
pub mod jwks;
pub mod verify;

pub use config::{ConfigJson, ProviderConfig, VerifierConfig};
pub use decode::{decode_claims, display_name, Claims};
pub use exchange::{CodeExchanger, SessionTokens};
pub use jwks::{SigningKey, SigningKeyCache, SigningKeySet};
pub use verify::TokenVerifier;
