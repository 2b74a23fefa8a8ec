//! Structural JWT decoding without signature verification.

use base64::{engine::general_purpose::URL_SAFE, Engine};
use serde_json::{Map, Value};

use crate::error::{OidcError, Result};

/// Claims mapping carried by a token.
pub type Claims = Map<String, Value>;

/// Decode the claims segment of a compact token.
///
/// Only the structure is checked: the signature and expiry are NOT verified.
/// Use this for display and for the userinfo fallback, never to authorize.
pub fn decode_claims(token: &str) -> Result<Claims> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() < 2 {
        return Err(OidcError::MalformedToken(
            "expected at least two dot-separated segments".to_string(),
        ));
    }

    let mut payload = parts[1].to_string();
    let missing = (4 - payload.len() % 4) % 4;
    payload.push_str(&"=".repeat(missing));

    let decoded = URL_SAFE
        .decode(payload.as_bytes())
        .map_err(|e| OidcError::MalformedToken(format!("invalid base64 in claims: {}", e)))?;

    serde_json::from_slice(&decoded)
        .map_err(|e| OidcError::MalformedToken(format!("invalid claims JSON: {}", e)))
}

/// Read a string claim.
pub fn claim_str<'a>(claims: &'a Claims, name: &str) -> Option<&'a str> {
    claims.get(name).and_then(Value::as_str)
}

/// Display identity: `preferred_username`, falling back to `sub`.
pub fn display_name(claims: &Claims) -> Option<String> {
    claim_str(claims, "preferred_username")
        .or_else(|| claim_str(claims, "sub"))
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use serde_json::json;

    fn segment(value: &Value) -> String {
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(value).unwrap())
    }

    #[test]
    fn test_decode_three_segments() {
        let claims = json!({
            "sub": "u1",
            "preferred_username": "bob",
            "iss": "http://localhost:8080/realms/myrealm",
            "aud": ["my-client", "account"],
            "exp": 1_900_000_000u64,
        });
        let token = format!("{}.{}.sig", segment(&json!({"alg": "RS256"})), segment(&claims));

        let decoded = decode_claims(&token).unwrap();
        assert_eq!(Value::Object(decoded), claims);
    }

    #[test]
    fn test_decode_without_signature_segment() {
        let claims = json!({"sub": "u1"});
        let token = format!("h.{}", segment(&claims));
        assert_eq!(claim_str(&decode_claims(&token).unwrap(), "sub"), Some("u1"));
    }

    #[test]
    fn test_padding_lengths() {
        // Payloads whose encoded length covers every residue mod 4.
        for name in ["a", "ab", "abc", "abcd"] {
            let claims = json!({ "sub": name });
            let token = format!("h.{}.s", segment(&claims));
            assert_eq!(claim_str(&decode_claims(&token).unwrap(), "sub"), Some(name));
        }
    }

    #[test]
    fn test_too_few_segments() {
        for token in ["", "abc", "eyJzdWIiOiJ1MSJ9"] {
            assert!(matches!(
                decode_claims(token),
                Err(OidcError::MalformedToken(_))
            ));
        }
    }

    #[test]
    fn test_bad_base64_and_json() {
        assert!(matches!(
            decode_claims("h.!!!.s"),
            Err(OidcError::MalformedToken(_))
        ));

        let not_json = URL_SAFE_NO_PAD.encode(b"not json");
        assert!(matches!(
            decode_claims(&format!("h.{}.s", not_json)),
            Err(OidcError::MalformedToken(_))
        ));
    }

    #[test]
    fn test_display_name_fallback() {
        let with_username = json!({"preferred_username": "alice", "sub": "u1"});
        let sub_only = json!({"sub": "u1"});
        let neither = json!({"email": "x@example.com"});

        assert_eq!(display_name(with_username.as_object().unwrap()), Some("alice".to_string()));
        assert_eq!(display_name(sub_only.as_object().unwrap()), Some("u1".to_string()));
        assert_eq!(display_name(neither.as_object().unwrap()), None);
    }
}
