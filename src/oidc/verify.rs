//! Bearer-token verification against the provider's signing keys.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use std::sync::Arc;
use tracing::debug;

use super::config::VerifierConfig;
use super::decode::{decode_claims, Claims};
use super::jwks::{SigningKey, SigningKeyCache, SigningKeySet};
use crate::error::{OidcError, Result};

/// Validates RS256 bearer tokens issued by the configured provider.
pub struct TokenVerifier {
    keys: Arc<SigningKeyCache>,
    issuer: String,
    audience: String,
    leeway_secs: u64,
}

impl TokenVerifier {
    pub fn new(config: &VerifierConfig, keys: Arc<SigningKeyCache>) -> Self {
        Self {
            keys,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            leeway_secs: config.clock_skew_secs,
        }
    }

    /// Verify a token against the configured issuer and audience.
    pub async fn verify(&self, token: &str) -> Result<Claims> {
        self.verify_with(token, &self.issuer, &self.audience).await
    }

    /// Verify signature, algorithm, issuer, audience and expiry.
    ///
    /// `at_hash` is not checked. A key-set fetch failure is returned as
    /// [`OidcError::KeySetUnavailable`] without retrying.
    pub async fn verify_with(
        &self,
        token: &str,
        expected_issuer: &str,
        expected_audience: &str,
    ) -> Result<Claims> {
        // Structural problems are reported the same way the decoder reports them.
        decode_claims(token)?;
        if token.split('.').count() != 3 {
            return Err(OidcError::TokenInvalid(
                "token must have a signature segment".to_string(),
            ));
        }

        // Unknown algorithms such as "none" fail here.
        let header = decode_header(token)
            .map_err(|e| OidcError::TokenInvalid(format!("invalid token header: {}", e)))?;

        debug!(kid = ?header.kid, alg = ?header.alg, "Verifying bearer token");

        if header.alg != Algorithm::RS256 {
            return Err(OidcError::TokenInvalid(format!(
                "algorithm {:?} is not accepted",
                header.alg
            )));
        }

        let key_set = self.keys.get_signing_keys().await?;
        let candidates = self.candidate_keys(header.kid.as_deref(), key_set).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = self.leeway_secs;
        validation.set_issuer(&[expected_issuer]);
        validation.set_audience(&[expected_audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);

        for key in &candidates {
            match decode::<Claims>(token, key.decoding_key(), &validation) {
                Ok(data) => {
                    debug!(kid = ?key.kid, "Bearer token verified");
                    return Ok(data.claims);
                }
                Err(e) if matches!(e.kind(), ErrorKind::InvalidSignature) => continue,
                Err(e) => return Err(OidcError::TokenInvalid(describe(e.kind()))),
            }
        }

        Err(OidcError::TokenInvalid(
            "signature does not match any signing key".to_string(),
        ))
    }

    async fn candidate_keys(
        &self,
        kid: Option<&str>,
        key_set: Arc<SigningKeySet>,
    ) -> Result<Vec<SigningKey>> {
        let Some(kid) = kid else {
            return Ok(key_set.iter().cloned().collect());
        };

        if let Some(key) = key_set.find(kid) {
            return Ok(vec![key.clone()]);
        }

        match self.keys.refresh_for_unknown_kid(&key_set).await? {
            Some(refreshed) => refreshed.find(kid).cloned().map(|k| vec![k]).ok_or_else(|| {
                OidcError::TokenInvalid(format!("key '{}' not found in JWKS", kid))
            }),
            None => Err(OidcError::TokenInvalid(format!(
                "key '{}' not found in JWKS",
                kid
            ))),
        }
    }
}

fn describe(kind: &ErrorKind) -> String {
    match kind {
        ErrorKind::ExpiredSignature => "token has expired".to_string(),
        ErrorKind::ImmatureSignature => "token is not yet valid".to_string(),
        ErrorKind::InvalidIssuer => "issuer mismatch".to_string(),
        ErrorKind::InvalidAudience => "audience mismatch".to_string(),
        ErrorKind::MissingRequiredClaim(claim) => format!("missing required claim '{}'", claim),
        ErrorKind::InvalidAlgorithm => "algorithm not accepted".to_string(),
        other => format!("token verification failed: {:?}", other),
    }
}
