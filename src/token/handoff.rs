//! Short-lived cross-site identity assertions.
//!
//! A handoff token lets this service vouch for a member toward a partner
//! site with no shared database or session store. It is stateless: there is
//! no revocation list, security rests on the short TTL, the signature and
//! the destination allowlist enforced when the return URL is validated.

use chrono::Utc;
use serde_json::{Value, json};

use crate::token::codec::{self, TokenError};

/// Default lifetime of a handoff token, in seconds.
pub const DEFAULT_TTL_SECS: i64 = 600;

/// Issue a handoff token for the given subject.
///
/// The subject is the member number (or the internal id as a fallback) and
/// never an email address, to keep PII out of partner-bound URLs.
pub fn issue(
    subject: &str,
    source: &str,
    ttl_secs: i64,
    secret: &str,
) -> Result<String, TokenError> {
    let now = Utc::now().timestamp();
    codec::sign(
        &json!({
            "sub": subject,
            "src": source,
            "iat": now,
            "exp": now + ttl_secs,
        }),
        secret,
    )
}

/// Verify a handoff token, returning its payload when valid and unexpired.
///
/// Exposed for partner-side tooling and tests; the issuing flow itself never
/// reads handoff tokens back.
pub fn verify(token: &str, secret: &str) -> Result<Option<Value>, TokenError> {
    Ok(codec::verify(token, secret)?.filter(|payload| {
        payload.get("sub").and_then(Value::as_str).is_some()
            && payload.get("exp").and_then(Value::as_i64).is_some()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "handoff-secret";

    #[test]
    fn payload_carries_subject_and_window_but_no_email() {
        let token = issue("FENAM-2026-0A1B2C", "partner-forum", 600, SECRET).unwrap();
        let payload = verify(&token, SECRET).unwrap().unwrap();

        assert_eq!(payload["sub"], "FENAM-2026-0A1B2C");
        assert_eq!(payload["src"], "partner-forum");
        assert!(payload.get("email").is_none());

        let iat = payload["iat"].as_i64().unwrap();
        let exp = payload["exp"].as_i64().unwrap();
        assert_eq!(exp - iat, 600);
    }

    #[test]
    fn expired_handoff_rejected() {
        let token = issue("FENAM-2026-0A1B2C", "partner-forum", -1, SECRET).unwrap();
        assert!(verify(&token, SECRET).unwrap().is_none());
    }
}
