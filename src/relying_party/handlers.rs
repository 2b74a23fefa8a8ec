//! Relying-party route handlers.

use axum::extract::{Query, State};
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::{Extension, Json};
use serde_json::json;
use std::collections::HashMap;
use tracing::{info, warn};

use super::guard::current_session;
use super::RelyingPartyState;
use crate::error::{OidcError, Result};
use crate::oidc::decode_claims;
use crate::session::Session;

/// `GET /`: the current user, if any.
pub async fn index(
    State(state): State<RelyingPartyState>,
    headers: HeaderMap,
) -> Result<Response> {
    let session = current_session(&state, &headers)?;
    Ok(Json(json!({ "user": session.map(|s| s.user) })).into_response())
}

/// `GET /login`: send the browser to the provider's authorization endpoint.
pub async fn login(State(state): State<RelyingPartyState>) -> Redirect {
    let url = state.exchanger.config().authorization_url();
    info!("Redirecting to provider for login");
    Redirect::to(&url)
}

/// `GET /callback?code=..`: exchange the code and establish a session.
pub async fn callback(
    State(state): State<RelyingPartyState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response> {
    let Some(code) = params.get("code").filter(|c| !c.is_empty()) else {
        let mut received: Vec<&str> = params.keys().map(String::as_str).collect();
        received.sort_unstable();
        warn!(
            params = ?received,
            error = ?params.get("error"),
            "Callback without authorization code"
        );
        let message = format!(
            "Authorization code not received. Parameters: {}",
            received.join(", ")
        );
        return Ok((StatusCode::BAD_REQUEST, Json(json!({ "message": message }))).into_response());
    };

    let tokens = state.exchanger.exchange(code).await?;
    let session = Session::new(tokens, state.session_ttl_secs);
    let id = session.id;
    state
        .sessions
        .set(session)
        .map_err(|e| OidcError::Session(e.to_string()))?;

    info!(session = %id, "Session established");
    let cookie = state.cookie.set_header(id, state.session_ttl_secs);
    Ok(([(SET_COOKIE, cookie)], Redirect::to("/")).into_response())
}

/// `GET /token`: decoded (unverified) claims of the session access token.
pub async fn show_token(Extension(session): Extension<Session>) -> Response {
    if session.access_token.is_empty() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": "Access token not available in session." })),
        )
            .into_response();
    }

    match decode_claims(&session.access_token) {
        Ok(claims) => Json(claims).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "message": format!("Error decoding token: {}", e) })),
        )
            .into_response(),
    }
}

/// `GET /profile`: the session's user and userinfo claims.
pub async fn profile(Extension(session): Extension<Session>) -> Json<serde_json::Value> {
    Json(json!({ "user": session.user, "userinfo": session.userinfo }))
}

/// `GET /call-protected-api`: forward the bearer token to the resource server.
pub async fn call_protected_api(
    State(state): State<RelyingPartyState>,
    Extension(session): Extension<Session>,
) -> Response {
    match state.resource.fetch_protected(&session.access_token).await {
        Ok(body) => Json(json!({ "api_response": body })).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "message": format!("Failed to call protected API: {}", e) })),
        )
            .into_response(),
    }
}

/// `POST /logout`: drop the local session and end the provider session.
pub async fn logout(
    State(state): State<RelyingPartyState>,
    headers: HeaderMap,
) -> Result<Response> {
    let mut id_token = None;
    if let Some(id) = state.cookie.from_headers(&headers) {
        match state.sessions.get(id) {
            Ok(Some(session)) => id_token = session.id_token,
            Ok(None) => {}
            Err(e) => warn!(session = %id, error = %e, "Session lookup failed during logout"),
        }
        state
            .sessions
            .clear(id)
            .map_err(|e| OidcError::Session(e.to_string()))?;
        info!(session = %id, "Session cleared");
    }

    if id_token.is_none() {
        warn!("id_token_hint not available, provider session may survive logout");
    }

    let url = state.exchanger.config().logout_url(id_token.as_deref());
    Ok(([(SET_COOKIE, state.cookie.clear_header())], Redirect::to(&url)).into_response())
}
