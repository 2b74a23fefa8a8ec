//! Relying-party web application.
//!
//! Public routes: `/`, `/login`, `/callback`, `/logout`. The routes behind
//! [`guard::require_session`] redirect to `/login` when no session exists.

pub mod guard;
pub mod handlers;
pub mod resource_client;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

use crate::oidc::CodeExchanger;
use crate::session::{SessionCookie, SessionStore};

pub use resource_client::ResourceClient;

/// Shared state injected into every relying-party handler.
#[derive(Clone)]
pub struct RelyingPartyState {
    pub exchanger: Arc<CodeExchanger>,
    pub sessions: Arc<dyn SessionStore>,
    pub cookie: SessionCookie,
    pub resource: Arc<ResourceClient>,
    pub session_ttl_secs: u64,
}

pub fn router(state: RelyingPartyState) -> Router {
    let protected = Router::new()
        .route("/token", get(handlers::show_token))
        .route("/profile", get(handlers::profile))
        .route("/call-protected-api", get(handlers::call_protected_api))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            guard::require_session,
        ));

    Router::new()
        .route("/", get(handlers::index))
        .route("/login", get(handlers::login))
        .route("/callback", get(handlers::callback))
        .route("/logout", post(handlers::logout))
        .merge(protected)
        .with_state(state)
}
