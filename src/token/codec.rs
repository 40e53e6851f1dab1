//! Generic signed token primitive.
//!
//! A token is `base64url(payload_json) + "." + base64url(hmac)` where the
//! HMAC-SHA256 is computed over the base64 payload segment. The payload JSON
//! is serialized deterministically (object keys sorted at every nesting
//! level) so that identical logical payloads always produce identical bytes
//! and therefore identical signatures.
//!
//! Expected-invalid input never produces an error: `verify` returns
//! `Ok(None)` for anything malformed, tampered or expired. A missing secret
//! is an operator mistake and is the one condition reported as `Err`.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Configuration failures of the codec. Data-shaped failures are sentinels,
/// not errors.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token signing secret is empty")]
    MissingSecret,
}

/// Serialize a JSON value with object keys sorted lexicographically at every
/// nesting level.
///
/// This is what makes signatures reproducible: two payloads with the same
/// key-value pairs but different insertion order serialize to identical
/// bytes.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|key| {
                    format!(
                        "{}:{}",
                        Value::String(key.clone()),
                        canonical_json(&map[key])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let elems: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", elems.join(","))
        }
        // Null, booleans, numbers and strings already have a single compact
        // JSON form.
        other => other.to_string(),
    }
}

/// Sign a payload, returning the two-segment token.
///
/// A random `jti` field is injected when the payload is an object without
/// one, so that two signings of the same logical payload still produce
/// distinct tokens. The caller's value is not mutated.
pub fn sign(payload: &Value, secret: &str) -> Result<String, TokenError> {
    if secret.is_empty() {
        return Err(TokenError::MissingSecret);
    }

    let mut payload = payload.clone();
    if let Value::Object(map) = &mut payload {
        if !map.contains_key("jti") {
            let nonce: [u8; 16] = rand::random();
            map.insert("jti".to_string(), Value::String(hex::encode(nonce)));
        }
    }

    let payload_b64 = URL_SAFE_NO_PAD.encode(canonical_json(&payload).as_bytes());
    let signature = mac_over(secret, payload_b64.as_bytes());
    let signature_b64 = URL_SAFE_NO_PAD.encode(signature);

    Ok(format!("{payload_b64}.{signature_b64}"))
}

/// Verify a token and return its payload.
///
/// Returns `Ok(None)` when the token is malformed, carries a bad signature
/// or has an `exp` (Unix seconds) in the past. The signature comparison is
/// constant-time; the payload is only parsed after the signature checks out.
pub fn verify(token: &str, secret: &str) -> Result<Option<Value>, TokenError> {
    if secret.is_empty() {
        return Err(TokenError::MissingSecret);
    }

    let mut parts = token.split('.');
    let (Some(payload_b64), Some(signature_b64), None) =
        (parts.next(), parts.next(), parts.next())
    else {
        return Ok(None);
    };

    let Ok(presented) = URL_SAFE_NO_PAD.decode(signature_b64) else {
        return Ok(None);
    };

    // verify_slice rejects length mismatches and compares in constant time.
    let mut mac = new_mac(secret);
    mac.update(payload_b64.as_bytes());
    if mac.verify_slice(&presented).is_err() {
        return Ok(None);
    }

    let Ok(payload_bytes) = URL_SAFE_NO_PAD.decode(payload_b64) else {
        return Ok(None);
    };
    let Ok(payload) = serde_json::from_slice::<Value>(&payload_bytes) else {
        return Ok(None);
    };

    if let Some(exp) = payload.get("exp").and_then(Value::as_i64) {
        if exp <= Utc::now().timestamp() {
            return Ok(None);
        }
    }

    Ok(Some(payload))
}

fn new_mac(secret: &str) -> HmacSha256 {
    // HMAC-SHA256 accepts keys of any length.
    HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC key length is valid")
}

fn mac_over(secret: &str, data: &[u8]) -> Vec<u8> {
    let mut mac = new_mac(secret);
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use serde_json::{Map, json};

    const SECRET: &str = "test-secret";

    #[test]
    fn round_trip_returns_equal_payload() {
        let payload = json!({"sub": "FENAM-2026-0A1B2C", "src": "partner", "jti": "fixed"});
        let token = sign(&payload, SECRET).unwrap();
        let verified = verify(&token, SECRET).unwrap().unwrap();
        assert_eq!(verified, payload);
    }

    #[test]
    fn future_exp_accepted_past_exp_rejected() {
        let now = Utc::now().timestamp();
        let valid = sign(&json!({"exp": now + 60}), SECRET).unwrap();
        assert!(verify(&valid, SECRET).unwrap().is_some());

        let expired = sign(&json!({"exp": now - 60}), SECRET).unwrap();
        assert!(verify(&expired, SECRET).unwrap().is_none());
    }

    #[test]
    fn deterministic_across_key_insertion_order() {
        let mut a = Map::new();
        a.insert("zeta".into(), json!(1));
        a.insert("alpha".into(), json!({"b": 2, "a": 1}));

        let mut b = Map::new();
        b.insert("alpha".into(), json!({"a": 1, "b": 2}));
        b.insert("zeta".into(), json!(1));

        assert_eq!(
            canonical_json(&Value::Object(a.clone())),
            canonical_json(&Value::Object(b.clone()))
        );

        // With the nonce pinned, whole signed tokens are byte-identical too.
        let mut a = a;
        let mut b = b;
        a.insert("jti".into(), json!("pinned"));
        b.insert("jti".into(), json!("pinned"));
        assert_eq!(
            sign(&Value::Object(a), SECRET).unwrap(),
            sign(&Value::Object(b), SECRET).unwrap()
        );
    }

    #[test]
    fn tampered_signature_rejected() {
        let token = sign(&json!({"sub": "m"}), SECRET).unwrap();
        let (payload_b64, signature_b64) = token.split_once('.').unwrap();

        let mut sig = URL_SAFE_NO_PAD.decode(signature_b64).unwrap();
        for bit in 0..8 {
            sig[0] ^= 1 << bit;
            let forged = format!("{payload_b64}.{}", URL_SAFE_NO_PAD.encode(&sig));
            assert!(verify(&forged, SECRET).unwrap().is_none());
            sig[0] ^= 1 << bit;
        }
    }

    #[test]
    fn wrong_segment_count_rejected() {
        assert!(verify("onlyonesegment", SECRET).unwrap().is_none());
        assert!(verify("a.b.c", SECRET).unwrap().is_none());
        assert!(verify("", SECRET).unwrap().is_none());
        assert!(verify("not base64!.also not!", SECRET).unwrap().is_none());
    }

    #[test]
    fn missing_secret_is_an_error_not_a_sentinel() {
        assert!(matches!(
            sign(&json!({}), ""),
            Err(TokenError::MissingSecret)
        ));
        assert!(matches!(verify("a.b", ""), Err(TokenError::MissingSecret)));
    }

    #[test]
    fn jti_injected_without_mutating_input() {
        let payload = json!({"sub": "m"});
        let token = sign(&payload, SECRET).unwrap();
        assert_eq!(payload, json!({"sub": "m"}));

        let verified = verify(&token, SECRET).unwrap().unwrap();
        assert!(verified.get("jti").is_some());

        // Distinct signings of the same payload produce distinct tokens.
        let second = sign(&payload, SECRET).unwrap();
        assert_ne!(token, second);
    }

    #[test]
    fn signature_from_other_secret_rejected() {
        let token = sign(&json!({"sub": "m"}), SECRET).unwrap();
        assert!(verify(&token, "another-secret").unwrap().is_none());
    }
}
