//! Client for the downstream resource server.

use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{OidcError, Result};

pub const PROTECTED_RESOURCE_PATH: &str = "/protected-resource";

/// Forwards the session's bearer token to the resource server.
pub struct ResourceClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl ResourceClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    /// GET the protected resource with `Authorization: Bearer <token>`.
    pub async fn fetch_protected(&self, access_token: &str) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, PROTECTED_RESOURCE_PATH);
        debug!(url = %url, token_len = access_token.len(), "Calling protected API");

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "Protected API unreachable");
                OidcError::UpstreamUnreachable(format!("protected API: {}", e))
            })?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!(status = %status, body = %body, "Protected API returned error");
            return Err(OidcError::ProtectedApiFailed {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| OidcError::ProtectedApiFailed {
            status: status.as_u16(),
            body: format!("invalid JSON in response: {}", e),
        })
    }
}
