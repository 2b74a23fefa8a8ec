//! Session guard for protected relying-party routes.

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use tracing::{debug, warn};

use super::RelyingPartyState;
use crate::error::{OidcError, Result};
use crate::session::Session;

/// Session referenced by the request's cookie, if it is valid and live.
pub fn current_session(state: &RelyingPartyState, headers: &HeaderMap) -> Result<Option<Session>> {
    let Some(id) = state.cookie.from_headers(headers) else {
        return Ok(None);
    };
    state.sessions.get(id).map_err(|e| {
        warn!(session = %id, error = %e, "Session lookup failed");
        OidcError::Session(e.to_string())
    })
}

/// Redirect to `/login` unless the request carries a live session.
///
/// The session is handed to the inner handler as an `Extension<Session>`.
pub async fn require_session(
    State(state): State<RelyingPartyState>,
    mut request: Request,
    next: Next,
) -> Response {
    match current_session(&state, request.headers()) {
        Ok(Some(session)) => {
            request.extensions_mut().insert(session);
            next.run(request).await
        }
        Ok(None) => {
            debug!(path = %request.uri().path(), "No session, redirecting to login");
            Redirect::to("/login").into_response()
        }
        Err(e) => e.into_response(),
    }
}
