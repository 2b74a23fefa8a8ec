//! Authorization-code exchange and userinfo retrieval.
//!
//! One login attempt moves through
//! `AwaitingCode -> ExchangingToken -> FetchingUserinfo -> Authenticated`,
//! with a detour through `FallbackDecoding` when the userinfo call fails but
//! an id_token was issued. Each upstream call is made exactly once.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::config::ProviderConfig;
use super::decode::{decode_claims, display_name, Claims};
use crate::error::{OidcError, Result};

/// Token endpoint response. Only the members this flow consumes.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
}

/// Where the session's userinfo came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserInfoSource {
    UserInfoEndpoint,
    /// Unverified claims of the id_token, used when the endpoint failed.
    IdTokenClaims,
}

/// Result of a successful login, ready to be stored in a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTokens {
    pub access_token: String,
    pub id_token: Option<String>,
    pub userinfo: Claims,
    /// Display identity: `preferred_username`, else `sub`.
    pub user: String,
    pub source: UserInfoSource,
}

#[derive(Debug, Clone, Copy)]
enum LoginState {
    ExchangingToken,
    FetchingUserinfo,
    FallbackDecoding,
    Authenticated,
    Failed,
}

impl std::fmt::Display for LoginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoginState::ExchangingToken => write!(f, "exchanging_token"),
            LoginState::FetchingUserinfo => write!(f, "fetching_userinfo"),
            LoginState::FallbackDecoding => write!(f, "fallback_decoding"),
            LoginState::Authenticated => write!(f, "authenticated"),
            LoginState::Failed => write!(f, "failed"),
        }
    }
}

/// Trades authorization codes for tokens at the provider.
pub struct CodeExchanger {
    config: ProviderConfig,
    http_client: reqwest::Client,
}

impl CodeExchanger {
    pub fn new(config: ProviderConfig) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.exchange_timeout())
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Exchange a single-use authorization code for session tokens.
    pub async fn exchange(&self, code: &str) -> Result<SessionTokens> {
        debug!(state = %LoginState::ExchangingToken, "Login attempt");
        let result = self.run(code).await;
        match &result {
            Ok(tokens) => info!(
                state = %LoginState::Authenticated,
                user = %tokens.user,
                source = ?tokens.source,
                "Login attempt"
            ),
            Err(e) => warn!(state = %LoginState::Failed, error = %e, "Login attempt"),
        }
        result
    }

    async fn run(&self, code: &str) -> Result<SessionTokens> {
        let (status, tokens) = self.request_tokens(code).await?;

        let access_token = tokens
            .access_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .ok_or_else(|| OidcError::TokenExchangeFailed {
                status: Some(status),
                body: "access token not received".to_string(),
            })?;

        let id_token = tokens.id_token.filter(|t| !t.trim().is_empty());
        if id_token.is_none() {
            warn!("ID token was not received in the token response");
        }

        log_token_diagnostics(&access_token, id_token.as_deref());

        debug!(state = %LoginState::FetchingUserinfo, "Login attempt");
        let userinfo_error = match self.fetch_userinfo(&access_token).await {
            Ok(userinfo) => {
                let user = display_name(&userinfo).ok_or_else(|| OidcError::UserInfoUnavailable {
                    status: None,
                    body: "userinfo has neither preferred_username nor sub".to_string(),
                })?;
                return Ok(SessionTokens {
                    access_token,
                    id_token,
                    userinfo,
                    user,
                    source: UserInfoSource::UserInfoEndpoint,
                });
            }
            Err(e) => e,
        };

        warn!(error = %userinfo_error, "Userinfo request failed");

        if !qualifies_for_fallback(&userinfo_error) {
            return Err(userinfo_error);
        }
        let Some(id_token) = id_token else {
            return Err(userinfo_error);
        };

        debug!(state = %LoginState::FallbackDecoding, "Extracting userinfo from ID token");
        let userinfo = match decode_claims(&id_token) {
            Ok(claims) => claims,
            Err(e) => {
                warn!(error = %e, "Failed to decode ID token for fallback");
                return Err(userinfo_error);
            }
        };
        let Some(user) = display_name(&userinfo) else {
            warn!("ID token has neither preferred_username nor sub");
            return Err(userinfo_error);
        };

        info!(user = %user, "Extracted userinfo from ID token");
        Ok(SessionTokens {
            access_token,
            id_token: Some(id_token),
            userinfo,
            user,
            source: UserInfoSource::IdTokenClaims,
        })
    }

    async fn request_tokens(&self, code: &str) -> Result<(u16, TokenResponse)> {
        let url = self.config.token_endpoint();
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];

        let response = self
            .http_client
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "Token request failed");
                OidcError::UpstreamUnreachable(format!("token endpoint: {}", e))
            })?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!(status = %status, body = %body, "Token endpoint returned error");
            return Err(OidcError::TokenExchangeFailed {
                status: Some(status.as_u16()),
                body,
            });
        }

        let tokens = serde_json::from_str(&body).map_err(|e| OidcError::TokenExchangeFailed {
            status: Some(status.as_u16()),
            body: format!("invalid token response: {}", e),
        })?;
        Ok((status.as_u16(), tokens))
    }

    /// GET the userinfo endpoint with the access token.
    ///
    /// A 2xx answer whose body is not a JSON object is reported with its
    /// status; [`qualifies_for_fallback`] keeps that case out of the id_token
    /// fallback.
    async fn fetch_userinfo(&self, access_token: &str) -> Result<Claims> {
        let response = self
            .http_client
            .get(self.config.userinfo_endpoint())
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| OidcError::UserInfoUnavailable {
                status: None,
                body: format!("userinfo request failed: {}", e),
            })?;

        let status = response.status();
        // A body cut off mid-read is a transport failure, whatever the status.
        let body = response.text().await.map_err(|e| OidcError::UserInfoUnavailable {
            status: None,
            body: format!("failed to read userinfo response (status {}): {}", status, e),
        })?;

        if !status.is_success() {
            return Err(OidcError::UserInfoUnavailable {
                status: Some(status.as_u16()),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| OidcError::UserInfoUnavailable {
            status: Some(status.as_u16()),
            body: format!("invalid userinfo response: {}", e),
        })
    }
}

/// Only network failures and non-2xx answers may be recovered from the
/// id_token claims.
fn qualifies_for_fallback(error: &OidcError) -> bool {
    match error {
        OidcError::UserInfoUnavailable {
            status: Some(status),
            ..
        } => !(200..300).contains(status),
        _ => true,
    }
}

/// Decode both tokens for the debug log. Failures never abort the login.
fn log_token_diagnostics(access_token: &str, id_token: Option<&str>) {
    if let Some(id_token) = id_token {
        if let Err(e) = decode_claims(id_token) {
            warn!(error = %e, "Could not decode ID token");
        }
    }

    match decode_claims(access_token) {
        Ok(claims) => debug!(
            token_len = access_token.len(),
            sub = ?claims.get("sub"),
            iss = ?claims.get("iss"),
            aud = ?claims.get("aud"),
            exp = ?claims.get("exp"),
            "Access token decoded"
        ),
        Err(e) => warn!(error = %e, "Could not decode access token"),
    }
}
