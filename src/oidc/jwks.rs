//! JWKS (JSON Web Key Set) fetching and caching.

use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::config::VerifierConfig;
use crate::error::{OidcError, Result};

/// The only signature algorithm accepted from the provider.
pub const ACCEPTED_ALGORITHM: &str = "RS256";

/// JWKS response from the endpoint.
#[derive(Debug, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

/// Individual JSON Web Key. Non-RSA members are ignored.
#[derive(Debug, Deserialize)]
pub struct Jwk {
    /// Key type (RSA, EC, oct)
    pub kty: String,
    /// Key ID
    pub kid: Option<String>,
    /// Algorithm
    pub alg: Option<String>,
    /// Key use (sig, enc)
    #[serde(rename = "use")]
    pub key_use: Option<String>,
    /// RSA modulus (base64url)
    pub n: Option<String>,
    /// RSA exponent (base64url)
    pub e: Option<String>,
}

/// A verification key taken from the provider's key set.
#[derive(Clone)]
pub struct SigningKey {
    pub kid: Option<String>,
    pub alg: Option<String>,
    key: DecodingKey,
}

impl SigningKey {
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("alg", &self.alg)
            .finish_non_exhaustive()
    }
}

/// The provider's current RS256 verification keys.
#[derive(Debug, Clone, Default)]
pub struct SigningKeySet {
    keys: Vec<SigningKey>,
}

impl SigningKeySet {
    /// Build a key set from a parsed JWKS, keeping only RS256-capable RSA
    /// signing keys.
    pub fn from_jwks(jwks: Jwks) -> Self {
        let mut keys = Vec::new();
        for jwk in jwks.keys {
            // Skip encryption keys
            if jwk.key_use.as_deref() == Some("enc") {
                continue;
            }

            if let Some(alg) = jwk.alg.as_deref() {
                if alg != ACCEPTED_ALGORITHM {
                    debug!(kid = ?jwk.kid, alg = %alg, "Skipping JWK with unsupported algorithm");
                    continue;
                }
            }

            match jwk_to_decoding_key(&jwk) {
                Ok(key) => {
                    debug!(kid = ?jwk.kid, "Loaded JWK");
                    keys.push(SigningKey {
                        kid: jwk.kid,
                        alg: jwk.alg,
                        key,
                    });
                }
                Err(e) => {
                    warn!(
                        kid = ?jwk.kid,
                        kty = %jwk.kty,
                        error = %e,
                        "Failed to parse JWK, skipping"
                    );
                }
            }
        }
        Self { keys }
    }

    /// Find a key by key ID.
    pub fn find(&self, kid: &str) -> Option<&SigningKey> {
        self.keys.iter().find(|k| k.kid.as_deref() == Some(kid))
    }

    pub fn iter(&self) -> impl Iterator<Item = &SigningKey> {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

fn jwk_to_decoding_key(jwk: &Jwk) -> std::result::Result<DecodingKey, String> {
    if jwk.kty != "RSA" {
        return Err(format!("unsupported key type: {}", jwk.kty));
    }
    let n = jwk.n.as_ref().ok_or("RSA key missing 'n'")?;
    let e = jwk.e.as_ref().ok_or("RSA key missing 'e'")?;
    DecodingKey::from_rsa_components(n, e).map_err(|e| e.to_string())
}

struct CachedKeySet {
    keys: Arc<SigningKeySet>,
    fetched_at: Instant,
}

/// Process-wide cache of the provider's signing keys.
///
/// The set is fetched lazily on first use. Concurrent first callers are
/// serialized on `fetch_lock` so exactly one upstream request is made and
/// every caller observes the same outcome: the same `Arc<SigningKeySet>`, or
/// the same failure when the fetch they queued behind did not succeed.
pub struct SigningKeyCache {
    jwks_url: String,
    http_client: reqwest::Client,
    /// Age after which the set is re-fetched; `None` keeps it forever.
    refresh_after: Option<Duration>,
    /// Minimum age before an unknown kid may force a re-fetch.
    min_refresh_interval: Duration,
    current: RwLock<Option<CachedKeySet>>,
    /// Completed fetches, successful or not.
    generation: AtomicU64,
    /// Guards the upstream fetch; holds the detail of the last failed one.
    fetch_lock: Mutex<Option<String>>,
}

impl SigningKeyCache {
    /// Create an empty cache. Nothing is fetched until the first lookup.
    pub fn new(config: &VerifierConfig) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.jwks_timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            jwks_url: config.jwks_url.clone(),
            http_client,
            refresh_after: config.refresh_after(),
            min_refresh_interval: Duration::from_secs(config.jwks_min_refresh_secs),
            current: RwLock::new(None),
            generation: AtomicU64::new(0),
            fetch_lock: Mutex::new(None),
        })
    }

    /// Return the cached key set, fetching it if absent or stale.
    pub async fn get_signing_keys(&self) -> Result<Arc<SigningKeySet>> {
        if let Some(keys) = self.fresh()? {
            return Ok(keys);
        }

        let seen = self.generation.load(Ordering::Acquire);
        let mut last_failure = self.fetch_lock.lock().await;

        // Another caller may have populated the cache while we waited.
        if let Some(keys) = self.fresh()? {
            return Ok(keys);
        }

        // Or its fetch failed while we waited: share that failure.
        if self.generation.load(Ordering::Acquire) != seen {
            if let Some(detail) = last_failure.as_ref() {
                return Err(OidcError::KeySetUnavailable(detail.clone()));
            }
        }

        self.fetch_and_store(&mut last_failure).await
    }

    /// Re-fetch once after a token named a kid missing from `seen`.
    ///
    /// Returns `None` when the cached set is younger than the minimum refresh
    /// interval, so unknown kids cannot drive repeated upstream fetches.
    pub async fn refresh_for_unknown_kid(
        &self,
        seen: &Arc<SigningKeySet>,
    ) -> Result<Option<Arc<SigningKeySet>>> {
        let mut last_failure = self.fetch_lock.lock().await;

        {
            let current = self.current.read().map_err(|_| lock_poisoned())?;
            if let Some(cached) = current.as_ref() {
                if !Arc::ptr_eq(&cached.keys, seen) {
                    return Ok(Some(Arc::clone(&cached.keys)));
                }
                if cached.fetched_at.elapsed() < self.min_refresh_interval {
                    return Ok(None);
                }
            }
        }

        debug!(url = %self.jwks_url, "Unknown kid, refreshing JWKS");
        self.fetch_and_store(&mut last_failure).await.map(Some)
    }

    fn fresh(&self) -> Result<Option<Arc<SigningKeySet>>> {
        let current = self.current.read().map_err(|_| lock_poisoned())?;
        Ok(current.as_ref().and_then(|cached| {
            let stale = self
                .refresh_after
                .is_some_and(|max_age| cached.fetched_at.elapsed() >= max_age);
            (!stale).then(|| Arc::clone(&cached.keys))
        }))
    }

    /// Fetch and publish a new set. Must be called with `fetch_lock` held.
    async fn fetch_and_store(
        &self,
        last_failure: &mut MutexGuard<'_, Option<String>>,
    ) -> Result<Arc<SigningKeySet>> {
        let fetched = self.fetch().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        let keys = match fetched {
            Ok(keys) => {
                **last_failure = None;
                Arc::new(keys)
            }
            Err(e) => {
                **last_failure = Some(match &e {
                    OidcError::KeySetUnavailable(detail) => detail.clone(),
                    other => other.to_string(),
                });
                return Err(e);
            }
        };

        {
            let mut current = self.current.write().map_err(|_| lock_poisoned())?;
            *current = Some(CachedKeySet {
                keys: Arc::clone(&keys),
                fetched_at: Instant::now(),
            });
        }

        info!(url = %self.jwks_url, key_count = keys.len(), "JWKS cache refreshed");
        Ok(keys)
    }

    async fn fetch(&self) -> Result<SigningKeySet> {
        debug!(url = %self.jwks_url, "Fetching JWKS");

        let response = self
            .http_client
            .get(&self.jwks_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                warn!(url = %self.jwks_url, error = %e, "JWKS request failed");
                OidcError::KeySetUnavailable(format!("failed to fetch JWKS: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(url = %self.jwks_url, status = %status, "JWKS endpoint returned error");
            return Err(OidcError::KeySetUnavailable(format!(
                "JWKS endpoint returned status {}: {}",
                status.as_u16(),
                body
            )));
        }

        let jwks: Jwks = response
            .json()
            .await
            .map_err(|e| OidcError::KeySetUnavailable(format!("invalid JWKS: {}", e)))?;

        let keys = SigningKeySet::from_jwks(jwks);
        if keys.is_empty() {
            return Err(OidcError::KeySetUnavailable(
                "no usable RS256 signing keys in JWKS".to_string(),
            ));
        }
        Ok(keys)
    }
}

fn lock_poisoned() -> OidcError {
    OidcError::KeySetUnavailable("key cache lock poisoned".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FIXTURE_JWKS: &str = include_str!("../../tests/fixtures/jwks.json");

    fn cache_for(server: &MockServer, min_refresh_secs: u64) -> SigningKeyCache {
        let config = VerifierConfig {
            jwks_url: format!("{}/certs", server.uri()),
            issuer: "http://issuer".to_string(),
            jwks_min_refresh_secs: min_refresh_secs,
            ..Default::default()
        };
        SigningKeyCache::new(&config).unwrap()
    }

    fn jwks_response() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(FIXTURE_JWKS, "application/json")
    }

    #[test]
    fn test_jwk_parsing() {
        let jwks: Jwks = serde_json::from_str(FIXTURE_JWKS).unwrap();
        assert_eq!(jwks.keys.len(), 2);

        let set = SigningKeySet::from_jwks(jwks);
        assert_eq!(set.len(), 1, "EC key should be skipped");
        let key = set.find("test-key").unwrap();
        assert_eq!(key.alg.as_deref(), Some("RS256"));
        assert!(set.find("ec-key").is_none());
    }

    #[test]
    fn test_skips_encryption_and_hmac_keys() {
        let jwks: Jwks = serde_json::from_value(serde_json::json!({
            "keys": [
                {"kty": "RSA", "kid": "enc", "use": "enc", "n": "AQAB", "e": "AQAB"},
                {"kty": "oct", "kid": "hmac", "alg": "HS256", "k": "c2VjcmV0"},
                {"kty": "RSA", "kid": "rs512", "alg": "RS512", "n": "AQAB", "e": "AQAB"}
            ]
        }))
        .unwrap();
        assert!(SigningKeySet::from_jwks(jwks).is_empty());
    }

    #[tokio::test]
    async fn test_fetches_once_and_caches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/certs"))
            .respond_with(jwks_response())
            .expect(1)
            .mount(&server)
            .await;

        let cache = cache_for(&server, 60);
        let first = cache.get_signing_keys().await.unwrap();
        let second = cache.get_signing_keys().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_access_single_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/certs"))
            .respond_with(jwks_response().set_delay(Duration::from_millis(200)))
            .expect(1)
            .mount(&server)
            .await;

        let cache = Arc::new(cache_for(&server, 60));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get_signing_keys().await })
            })
            .collect();

        let mut sets = Vec::new();
        for handle in handles {
            sets.push(handle.await.unwrap().unwrap());
        }
        assert!(sets.iter().all(|s| Arc::ptr_eq(s, &sets[0])));
    }

    #[tokio::test]
    async fn test_non_success_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/certs"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let cache = cache_for(&server, 60);
        let err = cache.get_signing_keys().await.unwrap_err();
        match err {
            OidcError::KeySetUnavailable(msg) => {
                assert!(msg.contains("503"));
                assert!(msg.contains("down"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_failed_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/certs"))
            .respond_with(
                ResponseTemplate::new(503)
                    .set_body_string("down")
                    .set_delay(Duration::from_millis(300)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let cache = Arc::new(cache_for(&server, 60));
        let started = Instant::now();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get_signing_keys().await })
            })
            .collect();

        for handle in handles {
            match handle.await.unwrap() {
                Err(OidcError::KeySetUnavailable(msg)) => assert!(msg.contains("503")),
                other => panic!("unexpected result: {other:?}"),
            }
        }
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_failed_fetch_is_retried_by_later_callers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/certs"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/certs"))
            .respond_with(jwks_response())
            .expect(1)
            .mount(&server)
            .await;

        let cache = cache_for(&server, 60);
        assert!(cache.get_signing_keys().await.is_err());
        let keys = cache.get_signing_keys().await.unwrap();
        assert!(keys.find("test-key").is_some());
    }

    #[tokio::test]
    async fn test_unreachable_is_unavailable() {
        let config = VerifierConfig {
            jwks_url: "http://127.0.0.1:9/certs".to_string(),
            jwks_timeout_secs: 2,
            ..Default::default()
        };
        let cache = SigningKeyCache::new(&config).unwrap();
        assert!(matches!(
            cache.get_signing_keys().await,
            Err(OidcError::KeySetUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_kid_refresh_is_throttled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/certs"))
            .respond_with(jwks_response())
            .expect(1)
            .mount(&server)
            .await;

        let cache = cache_for(&server, 60);
        let keys = cache.get_signing_keys().await.unwrap();
        assert!(cache.refresh_for_unknown_kid(&keys).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_kid_refreshes_when_old_enough() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/certs"))
            .respond_with(jwks_response())
            .expect(2)
            .mount(&server)
            .await;

        let cache = cache_for(&server, 0);
        let keys = cache.get_signing_keys().await.unwrap();
        let refreshed = cache.refresh_for_unknown_kid(&keys).await.unwrap().unwrap();
        assert!(!Arc::ptr_eq(&keys, &refreshed));
        assert!(refreshed.find("test-key").is_some());
    }
}
