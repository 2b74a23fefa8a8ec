//! Shared fixtures for unit tests: signed tokens and a stub JWKS endpoint.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::oidc::VerifierConfig;

pub const ISSUER: &str = "http://localhost:8080/realms/myrealm";
pub const AUDIENCE: &str = "my-client";
pub const JWKS_PATH: &str = "/certs";

const RSA_PRIVATE_PEM: &[u8] = include_bytes!("../tests/fixtures/rsa-private.pem");
const OTHER_RSA_PRIVATE_PEM: &[u8] = include_bytes!("../tests/fixtures/other-rsa-private.pem");
const FIXTURE_JWKS: &str = include_str!("../tests/fixtures/jwks.json");

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Claims of a valid access token for `username`.
pub fn claims_for(username: &str) -> Value {
    let now = now();
    json!({
        "iss": ISSUER,
        "aud": AUDIENCE,
        "sub": format!("id-{}", username),
        "preferred_username": username,
        "iat": now,
        "exp": now + 3600,
    })
}

pub fn verifier_config(server: &MockServer) -> VerifierConfig {
    VerifierConfig {
        jwks_url: format!("{}{}", server.uri(), JWKS_PATH),
        issuer: ISSUER.to_string(),
        audience: AUDIENCE.to_string(),
        ..Default::default()
    }
}

/// Serve the fixture key set and expect exactly `calls` fetches.
pub async fn mount_jwks(server: &MockServer, calls: u64) {
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_raw(FIXTURE_JWKS, "application/json"))
        .expect(calls)
        .mount(server)
        .await;
}

fn sign_with(pem: &[u8], claims: &Value, kid: Option<&str>) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = kid.map(String::from);
    let key = EncodingKey::from_rsa_pem(pem).unwrap();
    encode(&header, claims, &key).unwrap()
}

/// Sign with the key published in the fixture JWKS.
pub fn sign_rs256(claims: &Value, kid: Option<&str>) -> String {
    sign_with(RSA_PRIVATE_PEM, claims, kid)
}

/// Sign with an RSA key that is not in the fixture JWKS.
pub fn sign_with_other_key(claims: &Value, kid: Option<&str>) -> String {
    sign_with(OTHER_RSA_PRIVATE_PEM, claims, kid)
}

pub fn sign_hs256(claims: &Value) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some("test-key".to_string());
    encode(&header, claims, &EncodingKey::from_secret(b"shared-secret")).unwrap()
}

/// `alg: none` token with an empty signature segment.
pub fn unsigned_token(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap());
    format!("{}.{}.", header, payload)
}

/// Structurally valid token with a placeholder signature.
pub fn unverified_token(claims: &Value) -> String {
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap());
    format!("eyJhbGciOiJSUzI1NiJ9.{}.sig", payload)
}
