//! Return URL validation for redirects toward partner sites.
//!
//! A return URL is only followed when it is https (http allowed for
//! localhost during development) and its host matches the configured
//! allowlist, either exactly or as a subdomain. Input is percent-decoded at
//! most once, so double-encoded URLs cannot smuggle a foreign host through.

use url::Url;

/// Validate a raw return URL against the comma-separated host allowlist.
///
/// Returns the parsed, normalized URL, or a short machine-readable reason.
pub fn validate(raw_url: &str, allowed_hosts_csv: &str) -> Result<Url, &'static str> {
    let trimmed = raw_url.trim();
    if trimmed.is_empty() {
        return Err("invalid_url");
    }

    // Single safe decode: try the input as-is first, fall back to one
    // percent-decode pass for values that arrived still encoded.
    let parsed = match Url::parse(trimmed) {
        Ok(url) => url,
        Err(_) => Url::parse(&percent_decode_once(trimmed)).map_err(|_| "invalid_url")?,
    };

    let host = parsed.host_str().ok_or("invalid_url")?;

    match parsed.scheme() {
        "https" => {}
        "http" if host == "localhost" || host == "127.0.0.1" => {}
        _ => return Err("not_https"),
    }

    let allowed = allowed_hosts_csv
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .any(|allowed_host| host_matches(host, allowed_host));

    // localhost is implicitly allowed when it got through the scheme check
    if !allowed && host != "localhost" && host != "127.0.0.1" {
        return Err("host_not_allowed");
    }

    Ok(parsed)
}

/// Exact host or any subdomain of it.
fn host_matches(host: &str, allowed: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let allowed = allowed.to_ascii_lowercase();
    host == allowed || host.ends_with(&format!(".{allowed}"))
}

/// Decode `%XX` sequences exactly once, leaving malformed sequences as-is.
fn percent_decode_once(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let high = (bytes[i + 1] as char).to_digit(16);
            let low = (bytes[i + 2] as char).to_digit(16);
            if let (Some(high), Some(low)) = (high, low) {
                out.push((high * 16 + low) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALLOWED: &str = "fenam.org, partner.example";

    #[test]
    fn exact_host_accepted() {
        let url = validate("https://fenam.org/members", ALLOWED).unwrap();
        assert_eq!(url.host_str(), Some("fenam.org"));
    }

    #[test]
    fn subdomain_accepted() {
        assert!(validate("https://forum.partner.example/sso", ALLOWED).is_ok());
        assert!(validate("https://deep.forum.partner.example/sso", ALLOWED).is_ok());
    }

    #[test]
    fn lookalike_host_rejected() {
        assert_eq!(
            validate("https://evilfenam.org/members", ALLOWED),
            Err("host_not_allowed")
        );
        assert_eq!(
            validate("https://fenam.org.attacker.net/", ALLOWED),
            Err("host_not_allowed")
        );
    }

    #[test]
    fn plain_http_rejected_except_localhost() {
        assert_eq!(validate("http://fenam.org/", ALLOWED), Err("not_https"));
        assert!(validate("http://localhost:3000/cb", ALLOWED).is_ok());
    }

    #[test]
    fn garbage_rejected() {
        assert_eq!(validate("not a url", ALLOWED), Err("invalid_url"));
        assert_eq!(validate("", ALLOWED), Err("invalid_url"));
        assert_eq!(validate("javascript:alert(1)", ALLOWED), Err("invalid_url"));
    }

    #[test]
    fn encoded_input_decoded_once() {
        let url = validate("https%3A%2F%2Ffenam.org%2Fmembers", ALLOWED).unwrap();
        assert_eq!(url.host_str(), Some("fenam.org"));

        // A double-encoded URL decodes to a still-encoded string, which
        // must not validate.
        assert!(validate("https%253A%252F%252Ffenam.org%252F", ALLOWED).is_err());
    }
}
