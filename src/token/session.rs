//! Member session tokens and their cookie plumbing.
//!
//! A session token is a longer-lived signed value carrying the affiliation
//! id. Nothing is persisted server-side: verification is stateless, the
//! embedded expiry is the only lifetime control. The value travels in an
//! httpOnly cookie, never in a URL.

use axum::http::HeaderMap;
use chrono::Utc;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::config::Config;
use crate::token::codec::{self, TokenError};

/// Cookie holding the session token.
pub const SESSION_COOKIE: &str = "fenam_session";

/// Default session lifetime: 30 days.
pub const DEFAULT_TTL_SECS: i64 = 30 * 24 * 60 * 60;

/// Issue a session token for an affiliation.
pub fn issue(affiliation_id: Uuid, ttl_secs: i64, secret: &str) -> Result<String, TokenError> {
    let exp = Utc::now().timestamp() + ttl_secs;
    codec::sign(
        &json!({
            "aid": affiliation_id.to_string(),
            "exp": exp,
        }),
        secret,
    )
}

/// Verify a session token, returning the affiliation id.
///
/// On top of the codec checks, the payload must carry both an affiliation id
/// and an expiry; a signed payload without `exp` would otherwise live
/// forever.
pub fn verify(token: &str, secret: &str) -> Result<Option<Uuid>, TokenError> {
    let Some(payload) = codec::verify(token, secret)? else {
        return Ok(None);
    };
    if payload.get("exp").and_then(Value::as_i64).is_none() {
        return Ok(None);
    }
    Ok(payload
        .get("aid")
        .and_then(Value::as_str)
        .and_then(|aid| Uuid::parse_str(aid).ok()))
}

/// Build the Set-Cookie value for a session token.
///
/// Attributes: `Path=/`, `HttpOnly`, `SameSite=Lax`, `Secure` in production.
/// When the request host belongs to the configured production domain family
/// the parent domain is set explicitly so the cookie is valid across
/// subdomains; on any other host (development, previews) no Domain attribute
/// is emitted so the cookie still works there.
pub fn cookie_header(token: &str, request_host: &str, config: &Config) -> String {
    let mut cookie = format!(
        "{SESSION_COOKIE}={token}; Path=/; Max-Age={DEFAULT_TTL_SECS}; HttpOnly; SameSite=Lax"
    );
    if config.is_production() {
        cookie.push_str("; Secure");
    }
    if let Some(domain) = &config.cookie_domain {
        if host_in_family(request_host, domain) {
            cookie.push_str(&format!("; Domain={domain}"));
        }
    }
    cookie
}

/// Extract the session token from a request's Cookie header.
pub fn read_from_headers(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE).then(|| value.to_string())
    })
}

/// True when `host` is `domain` itself or any subdomain of it. The port, if
/// present, is ignored.
fn host_in_family(host: &str, domain: &str) -> bool {
    let host = host.split(':').next().unwrap_or(host);
    host.eq_ignore_ascii_case(domain)
        || host
            .to_ascii_lowercase()
            .ends_with(&format!(".{}", domain.to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "session-secret";

    fn test_config(environment: &str, cookie_domain: Option<&str>) -> Config {
        Config {
            database_url: "postgres://localhost/test".into(),
            server_port: 3000,
            token_secret: SECRET.into(),
            base_url: "https://www.fenam.org".into(),
            allowed_return_hosts: "fenam.org".into(),
            cookie_domain: cookie_domain.map(str::to_string),
            environment: environment.into(),
            login_page_url: None,
            default_return_url: None,
            paypal_base_url: "https://api-m.sandbox.paypal.com".into(),
            paypal_client_id: "id".into(),
            paypal_client_secret: "secret".into(),
            email_api_url: "https://mail.example/send".into(),
            email_api_key: "key".into(),
            email_from: "soci@fenam.org".into(),
            card_renderer_url: "https://cards.example/render".into(),
        }
    }

    #[test]
    fn session_round_trip() {
        let id = Uuid::new_v4();
        let token = issue(id, DEFAULT_TTL_SECS, SECRET).unwrap();
        assert_eq!(verify(&token, SECRET).unwrap(), Some(id));
    }

    #[test]
    fn payload_without_exp_rejected() {
        let forever = codec::sign(
            &serde_json::json!({"aid": Uuid::new_v4().to_string()}),
            SECRET,
        )
        .unwrap();
        assert_eq!(verify(&forever, SECRET).unwrap(), None);
    }

    #[test]
    fn production_cookie_on_family_host() {
        let config = test_config("production", Some("fenam.org"));
        let cookie = cookie_header("t0k3n", "www.fenam.org", &config);
        assert!(cookie.starts_with("fenam_session=t0k3n; Path=/;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(cookie.contains("Secure"));
        assert!(cookie.contains("Domain=fenam.org"));
    }

    #[test]
    fn development_cookie_has_no_domain_or_secure() {
        let config = test_config("development", Some("fenam.org"));
        let cookie = cookie_header("t0k3n", "localhost:3000", &config);
        assert!(!cookie.contains("Secure"));
        assert!(!cookie.contains("Domain="));
    }

    #[test]
    fn foreign_host_gets_no_domain_even_in_production() {
        let config = test_config("production", Some("fenam.org"));
        let cookie = cookie_header("t0k3n", "preview.example.net", &config);
        assert!(cookie.contains("Secure"));
        assert!(!cookie.contains("Domain="));
    }

    #[test]
    fn cookie_parsed_from_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            "other=1; fenam_session=abc.def; trailing=2".parse().unwrap(),
        );
        assert_eq!(read_from_headers(&headers), Some("abc.def".to_string()));

        let empty = HeaderMap::new();
        assert_eq!(read_from_headers(&empty), None);
    }
}
