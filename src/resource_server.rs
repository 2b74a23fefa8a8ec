//! Resource server: a single bearer-protected endpoint plus a health check.

use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::OidcError;
use crate::oidc::decode::claim_str;
use crate::oidc::TokenVerifier;

const BEARER_PREFIX: &str = "Bearer ";

#[derive(Clone)]
pub struct ResourceServerState {
    pub verifier: Arc<TokenVerifier>,
}

pub fn router(state: ResourceServerState) -> Router {
    Router::new()
        .route("/protected-resource", get(protected_resource))
        .route("/health", get(health))
        .with_state(state)
}

fn reject(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "message": message.into() }))).into_response()
}

async fn protected_resource(
    State(state): State<ResourceServerState>,
    headers: HeaderMap,
) -> Response {
    let Some(value) = headers.get(AUTHORIZATION) else {
        warn!("Authorization header missing");
        return reject(StatusCode::UNAUTHORIZED, "Authorization header missing");
    };

    let token = match value.to_str().ok().and_then(|v| v.strip_prefix(BEARER_PREFIX)) {
        Some(token) => token.trim(),
        None => {
            warn!("Malformed Authorization header");
            return reject(
                StatusCode::UNAUTHORIZED,
                "Invalid Authorization header format. Expected 'Bearer <token>'",
            );
        }
    };

    let claims = match state.verifier.verify(token).await {
        Ok(claims) => claims,
        Err(e @ (OidcError::MalformedToken(_) | OidcError::TokenInvalid(_))) => {
            warn!(error = %e, "Bearer token rejected");
            return reject(StatusCode::UNAUTHORIZED, format!("Unauthorized: {}", e));
        }
        Err(e @ OidcError::KeySetUnavailable(_)) => {
            error!(error = %e, "Cannot verify bearer token");
            return reject(StatusCode::INTERNAL_SERVER_ERROR, format!("Server error: {}", e));
        }
        Err(e) => {
            error!(error = %e, "Unexpected verification failure");
            return reject(
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal server error occurred.",
            );
        }
    };

    let user_id = claim_str(&claims, "sub").unwrap_or("unknown").to_string();
    let username = claim_str(&claims, "preferred_username")
        .unwrap_or("unknown")
        .to_string();
    info!(user = %username, sub = %user_id, "Protected resource accessed");

    Json(json!({
        "message": "This is highly confidential data from the protected resource!",
        "received_token_length": token.len(),
        "accessed_by_user_id": user_id,
        "preferred_username": username,
        "token_claims": Value::Object(claims),
    }))
    .into_response()
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "Resource Server is healthy" }))
}
