//! Signed session-id cookie.
//!
//! The cookie value is `<hex session id>.<hex HMAC-SHA256(id)>`, keyed by the
//! configured session secret, so a client cannot forge or guess a session id.

use anyhow::{bail, Result};
use axum::http::header::COOKIE;
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::types::SessionId;

type HmacSha256 = Hmac<Sha256>;

/// Shortest accepted session secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

pub const DEFAULT_COOKIE_NAME: &str = "rp_session";

#[derive(Clone)]
pub struct SessionCookie {
    name: String,
    mac: HmacSha256,
    secure: bool,
}

impl SessionCookie {
    pub fn new(name: impl Into<String>, secret: &[u8], secure: bool) -> Result<Self> {
        if secret.len() < MIN_SECRET_LEN {
            bail!("session secret must be at least {} bytes", MIN_SECRET_LEN);
        }
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| anyhow::anyhow!("invalid session secret: {}", e))?;
        Ok(Self {
            name: name.into(),
            mac,
            secure,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cookie value for a session id.
    pub fn sign(&self, id: SessionId) -> String {
        let mut mac = self.mac.clone();
        mac.update(id.as_bytes());
        format!("{}.{}", id.to_hex(), hex::encode(mac.finalize().into_bytes()))
    }

    /// Session id from a cookie value, if its signature is valid.
    pub fn verify(&self, value: &str) -> Option<SessionId> {
        let (id_hex, sig_hex) = value.split_once('.')?;
        let id = SessionId::from_hex(id_hex)?;
        let signature = hex::decode(sig_hex).ok()?;

        let mut mac = self.mac.clone();
        mac.update(id.as_bytes());
        mac.verify_slice(&signature).ok()?;
        Some(id)
    }

    /// Verified session id carried by the request's `Cookie` headers.
    pub fn from_headers(&self, headers: &HeaderMap) -> Option<SessionId> {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.name)
            .and_then(|(_, value)| self.verify(value))
    }

    /// `Set-Cookie` value establishing the session.
    pub fn set_header(&self, id: SessionId, max_age_secs: u64) -> String {
        format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}{}",
            self.name,
            self.sign(id),
            max_age_secs,
            if self.secure { "; Secure" } else { "" }
        )
    }

    /// `Set-Cookie` value that removes the session cookie.
    pub fn clear_header(&self) -> String {
        format!(
            "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0{}",
            self.name,
            if self.secure { "; Secure" } else { "" }
        )
    }
}
