//! Session types for the relying party.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::oidc::{Claims, SessionTokens};

/// Unique session identifier (16-byte random value, hex-encoded in cookies).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId([u8; 16]);

impl SessionId {
    /// Generate a new random session ID.
    pub fn new() -> Self {
        Self(rand::random())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string. Anything but exactly 16 bytes is rejected.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 16] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Longest session lifetime honoured by [`Session::new`] (ten years).
pub const MAX_SESSION_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Per-browser login state established by a successful code exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,

    /// Display name (`preferred_username`, else `sub`).
    pub user: String,

    /// Claims from the userinfo endpoint, or from the id_token fallback.
    pub userinfo: Claims,

    /// Bearer token forwarded to the resource server.
    pub access_token: String,

    /// Kept for the logout `id_token_hint`.
    pub id_token: Option<String>,

    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

impl Session {
    /// Create a session from the result of a code exchange.
    ///
    /// `ttl_secs` is capped at [`MAX_SESSION_TTL_SECS`].
    pub fn new(tokens: SessionTokens, ttl_secs: u64) -> Self {
        let now = Utc::now();
        let ttl = chrono::Duration::seconds(ttl_secs.min(MAX_SESSION_TTL_SECS) as i64);
        Self {
            id: SessionId::new(),
            user: tokens.user,
            userinfo: tokens.userinfo,
            access_token: tokens.access_token,
            id_token: tokens.id_token,
            created_at: now,
            expires_at: now + ttl,
            last_accessed: now,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Update last accessed time.
    pub fn touch(&mut self) {
        self.last_accessed = Utc::now();
    }
}

#[cfg(test)]
pub(crate) fn test_tokens(user: &str) -> SessionTokens {
    use crate::oidc::exchange::UserInfoSource;

    let userinfo = serde_json::json!({"preferred_username": user, "sub": format!("id-{}", user)});
    SessionTokens {
        access_token: "h.c.s".to_string(),
        id_token: Some("h2.c2.s2".to_string()),
        userinfo: userinfo.as_object().cloned().unwrap_or_default(),
        user: user.to_string(),
        source: UserInfoSource::UserInfoEndpoint,
    }
}

#[cfg(test)]
pub(crate) fn test_session(user: &str) -> Session {
    Session::new(test_tokens(user), 3600)
}
