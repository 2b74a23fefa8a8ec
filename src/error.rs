//! Error taxonomy shared by the relying party and the resource server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Failures surfaced by token handling and the identity-provider calls.
///
/// Upstream status codes and bodies are preserved verbatim so callers can
/// report them.
#[derive(Debug, Error)]
pub enum OidcError {
    /// Token could not be split or its claims segment could not be decoded.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// The signing-key set could not be fetched or contained no usable key.
    #[error("signing key set unavailable: {0}")]
    KeySetUnavailable(String),

    /// Signature, algorithm, issuer, audience or expiry check failed.
    #[error("token invalid: {0}")]
    TokenInvalid(String),

    /// Token endpoint rejected the code or returned no access token.
    #[error("token exchange failed{}: {body}", status_suffix(.status))]
    TokenExchangeFailed { status: Option<u16>, body: String },

    /// Userinfo endpoint failed and no id_token was available to fall back on.
    #[error("userinfo unavailable{}: {body}", status_suffix(.status))]
    UserInfoUnavailable { status: Option<u16>, body: String },

    /// Network-level failure talking to an upstream (timeout, refused, DNS).
    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    /// Resource server answered the forwarded call with a non-2xx status or
    /// an unreadable body.
    #[error("protected API call failed (status {status}): {body}")]
    ProtectedApiFailed { status: u16, body: String },

    /// Session store failure.
    #[error("session error: {0}")]
    Session(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(s) => format!(" (status {})", s),
        None => String::new(),
    }
}

pub type Result<T, E = OidcError> = std::result::Result<T, E>;

impl OidcError {
    /// HTTP status used when this error reaches a client.
    pub fn status_code(&self) -> StatusCode {
        match self {
            OidcError::MalformedToken(_) | OidcError::TokenInvalid(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Upstream status code, if the failure came from a non-2xx response.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            OidcError::TokenExchangeFailed { status, .. }
            | OidcError::UserInfoUnavailable { status, .. } => *status,
            OidcError::ProtectedApiFailed { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for OidcError {
    fn from(e: reqwest::Error) -> Self {
        OidcError::UpstreamUnreachable(e.to_string())
    }
}

impl IntoResponse for OidcError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({ "message": self.to_string() }))).into_response()
    }
}
