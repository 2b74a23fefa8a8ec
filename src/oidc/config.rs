//! Identity-provider configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Path under the realm base shared by all OpenID Connect endpoints.
const OIDC_PATH: &str = "protocol/openid-connect";

/// Identity provider and client configuration.
///
/// The provider is reached through two bases: the *internal* base is used for
/// back-channel calls (token, userinfo, certs) and the *public* base for
/// browser redirects (auth, logout).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Realm base reachable from this process.
    /// Example: "http://keycloak:8080/realms/myrealm"
    #[serde(default)]
    pub issuer_internal: String,

    /// Realm base reachable from the browser.
    /// Example: "http://localhost:8080/realms/myrealm"
    #[serde(default)]
    pub issuer_public: String,

    /// OAuth client ID registered with the provider.
    #[serde(default)]
    pub client_id: String,

    /// OAuth client secret.
    #[serde(default, skip_serializing)]
    pub client_secret: String,

    /// Where the provider sends the browser after authentication.
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,

    /// Where the provider sends the browser after logout.
    #[serde(default = "default_post_logout_redirect_uri")]
    pub post_logout_redirect_uri: String,

    /// Scopes requested at login.
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Timeout for token and userinfo calls, in seconds.
    #[serde(default = "default_exchange_timeout")]
    pub exchange_timeout_secs: u64,
}

fn default_redirect_uri() -> String {
    "http://localhost:5000/callback".to_string()
}

fn default_post_logout_redirect_uri() -> String {
    "http://localhost:5000/".to_string()
}

fn default_scope() -> String {
    "openid profile".to_string()
}

fn default_exchange_timeout() -> u64 {
    30
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            issuer_internal: String::new(),
            issuer_public: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: default_redirect_uri(),
            post_logout_redirect_uri: default_post_logout_redirect_uri(),
            scope: default_scope(),
            exchange_timeout_secs: default_exchange_timeout(),
        }
    }
}

impl ProviderConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.client_id.is_empty() {
            return Err("client_id is required".to_string());
        }
        if self.client_secret.is_empty() {
            return Err("client_secret is required".to_string());
        }

        for (name, value) in [
            ("issuer_internal", &self.issuer_internal),
            ("issuer_public", &self.issuer_public),
            ("redirect_uri", &self.redirect_uri),
            ("post_logout_redirect_uri", &self.post_logout_redirect_uri),
        ] {
            if value.is_empty() {
                return Err(format!("{} is required", name));
            }
            if !is_http_url(value) {
                return Err(format!("{} must be a valid HTTP(S) URL", name));
            }
        }

        Ok(())
    }

    pub fn token_endpoint(&self) -> String {
        endpoint(&self.issuer_internal, "token")
    }

    pub fn userinfo_endpoint(&self) -> String {
        endpoint(&self.issuer_internal, "userinfo")
    }

    pub fn jwks_endpoint(&self) -> String {
        endpoint(&self.issuer_internal, "certs")
    }

    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_secs(self.exchange_timeout_secs)
    }

    /// Browser redirect that starts the authorization-code flow.
    pub fn authorization_url(&self) -> String {
        format!(
            "{}?client_id={}&response_type=code&scope={}&redirect_uri={}",
            endpoint(&self.issuer_public, "auth"),
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.scope),
            urlencoding::encode(&self.redirect_uri),
        )
    }

    /// Browser redirect that ends the provider session.
    pub fn logout_url(&self, id_token_hint: Option<&str>) -> String {
        let mut url = format!(
            "{}?post_logout_redirect_uri={}",
            endpoint(&self.issuer_public, "logout"),
            urlencoding::encode(&self.post_logout_redirect_uri),
        );
        if let Some(hint) = id_token_hint {
            url.push_str(&format!("&id_token_hint={}", urlencoding::encode(hint)));
        }
        url
    }
}

/// Resource-server verification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifierConfig {
    /// JWKS endpoint URL.
    #[serde(default)]
    pub jwks_url: String,

    /// Token issuer (iss claim). Must match exactly.
    #[serde(default)]
    pub issuer: String,

    /// Expected audience (aud claim).
    #[serde(default = "default_audience")]
    pub audience: String,

    /// Re-fetch the key set once it is older than this. 0 keeps it forever.
    #[serde(default)]
    pub jwks_refresh_secs: u64,

    /// Minimum age of the key set before an unknown kid may trigger a re-fetch.
    #[serde(default = "default_min_refresh")]
    pub jwks_min_refresh_secs: u64,

    /// Timeout for the JWKS fetch, in seconds.
    #[serde(default = "default_jwks_timeout")]
    pub jwks_timeout_secs: u64,

    /// Clock skew tolerance in seconds for exp/nbf validation.
    #[serde(default = "default_clock_skew")]
    pub clock_skew_secs: u64,
}

fn default_audience() -> String {
    "my-client".to_string()
}

fn default_min_refresh() -> u64 {
    60
}

fn default_jwks_timeout() -> u64 {
    10
}

fn default_clock_skew() -> u64 {
    30
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            jwks_url: String::new(),
            issuer: String::new(),
            audience: default_audience(),
            jwks_refresh_secs: 0,
            jwks_min_refresh_secs: default_min_refresh(),
            jwks_timeout_secs: default_jwks_timeout(),
            clock_skew_secs: default_clock_skew(),
        }
    }
}

impl VerifierConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.issuer.is_empty() {
            return Err("issuer is required".to_string());
        }
        if self.audience.is_empty() {
            return Err("audience is required".to_string());
        }
        if self.jwks_url.is_empty() {
            return Err("jwks_url is required".to_string());
        }
        if !is_http_url(&self.jwks_url) {
            return Err("jwks_url must be a valid HTTP(S) URL".to_string());
        }
        Ok(())
    }

    pub fn refresh_after(&self) -> Option<Duration> {
        (self.jwks_refresh_secs > 0).then(|| Duration::from_secs(self.jwks_refresh_secs))
    }
}

/// JSON overlay applied on top of command-line configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct ConfigJson {
    pub issuer_internal: Option<String>,
    pub issuer_public: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: Option<String>,
    pub post_logout_redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub jwks_url: Option<String>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub jwks_refresh_secs: Option<u64>,
    pub jwks_min_refresh_secs: Option<u64>,
    pub clock_skew_secs: Option<u64>,
}

impl ConfigJson {
    /// Apply JSON overrides to provider configuration.
    pub fn apply_to_provider(&self, config: &mut ProviderConfig) {
        if let Some(ref v) = self.issuer_internal {
            config.issuer_internal = v.clone();
        }
        if let Some(ref v) = self.issuer_public {
            config.issuer_public = v.clone();
        }
        if let Some(ref v) = self.client_id {
            config.client_id = v.clone();
        }
        if let Some(ref v) = self.client_secret {
            config.client_secret = v.clone();
        }
        if let Some(ref v) = self.redirect_uri {
            config.redirect_uri = v.clone();
        }
        if let Some(ref v) = self.post_logout_redirect_uri {
            config.post_logout_redirect_uri = v.clone();
        }
        if let Some(ref v) = self.scope {
            config.scope = v.clone();
        }
    }

    /// Apply JSON overrides to verifier configuration.
    pub fn apply_to_verifier(&self, config: &mut VerifierConfig) {
        if let Some(ref v) = self.jwks_url {
            config.jwks_url = v.clone();
        }
        if let Some(ref v) = self.issuer {
            config.issuer = v.clone();
        }
        if let Some(ref v) = self.audience {
            config.audience = v.clone();
        }
        if let Some(v) = self.jwks_refresh_secs {
            config.jwks_refresh_secs = v;
        }
        if let Some(v) = self.jwks_min_refresh_secs {
            config.jwks_min_refresh_secs = v;
        }
        if let Some(v) = self.clock_skew_secs {
            config.clock_skew_secs = v;
        }
    }
}

fn endpoint(base: &str, name: &str) -> String {
    format!("{}/{}/{}", base.trim_end_matches('/'), OIDC_PATH, name)
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("https://") || value.starts_with("http://")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> ProviderConfig {
        ProviderConfig {
            issuer_internal: "http://keycloak:8080/realms/myrealm".to_string(),
            issuer_public: "http://localhost:8080/realms/myrealm/".to_string(),
            client_id: "my-client".to_string(),
            client_secret: "s3cret".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = ProviderConfig::default();
        assert_eq!(config.redirect_uri, "http://localhost:5000/callback");
        assert_eq!(config.exchange_timeout_secs, 30);

        let verifier = VerifierConfig::default();
        assert_eq!(verifier.audience, "my-client");
        assert_eq!(verifier.jwks_timeout_secs, 10);
        assert!(verifier.refresh_after().is_none());
    }

    #[test]
    fn test_validation() {
        let mut config = ProviderConfig::default();
        assert!(config.validate().is_err()); // missing client_id

        config = provider();
        assert!(config.validate().is_ok());

        config.issuer_internal = "keycloak:8080".to_string();
        assert!(config.validate().is_err());

        let mut verifier = VerifierConfig::default();
        assert!(verifier.validate().is_err()); // missing issuer
        verifier.issuer = "http://localhost:8080/realms/myrealm".to_string();
        assert!(verifier.validate().is_err()); // missing jwks_url
        verifier.jwks_url =
            "http://keycloak:8080/realms/myrealm/protocol/openid-connect/certs".to_string();
        assert!(verifier.validate().is_ok());
    }

    #[test]
    fn test_endpoints() {
        let config = provider();
        assert_eq!(
            config.token_endpoint(),
            "http://keycloak:8080/realms/myrealm/protocol/openid-connect/token"
        );
        assert_eq!(
            config.userinfo_endpoint(),
            "http://keycloak:8080/realms/myrealm/protocol/openid-connect/userinfo"
        );
        assert_eq!(
            config.authorization_url(),
            "http://localhost:8080/realms/myrealm/protocol/openid-connect/auth\
             ?client_id=my-client&response_type=code&scope=openid%20profile\
             &redirect_uri=http%3A%2F%2Flocalhost%3A5000%2Fcallback"
        );
    }

    #[test]
    fn test_logout_url() {
        let config = provider();
        let without = config.logout_url(None);
        assert!(
            without.ends_with("logout?post_logout_redirect_uri=http%3A%2F%2Flocalhost%3A5000%2F")
        );
        assert!(!without.contains("id_token_hint"));

        let with = config.logout_url(Some("a.b.c"));
        assert!(with.ends_with("&id_token_hint=a.b.c"));
    }

    #[test]
    fn test_json_apply() {
        let mut config = provider();
        let mut verifier = VerifierConfig::default();
        let json: ConfigJson = serde_json::from_str(
            r#"{"client-id": "other", "audience": "api", "jwks-refresh-secs": 1800}"#,
        )
        .unwrap();

        json.apply_to_provider(&mut config);
        json.apply_to_verifier(&mut verifier);

        assert_eq!(config.client_id, "other");
        assert_eq!(config.client_secret, "s3cret"); // unchanged
        assert_eq!(verifier.audience, "api");
        assert_eq!(verifier.refresh_after(), Some(Duration::from_secs(1800)));
        assert_eq!(verifier.clock_skew_secs, 30); // unchanged
    }
}
