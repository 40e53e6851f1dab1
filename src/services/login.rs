//! Magic-link login for returning members.
//!
//! `request_login` creates a one-time token for an active member and emails
//! the verification link; `verify_login` consumes the token atomically and
//! turns it into a handoff token, a session token and a redirect. The raw
//! secret exists only inside the emailed URL: the database stores its
//! SHA-256 hash and log lines never carry it.

use chrono::{Duration as ChronoDuration, Utc};
use sha2::{Digest, Sha256};
use url::Url;
use uuid::Uuid;

use crate::clients::email::{EmailMessage, EmailSender};
use crate::config::Config;
use crate::db::DbPool;
use crate::error::AppError;
use crate::middleware::rate_limit::RateLimiter;
use crate::models::affiliation::Affiliation;
use crate::models::login_token::{LoginRequestBody, LoginToken};
use crate::services::return_url;
use crate::token::{handoff, session};

/// One-time token lifetime.
const LOGIN_TOKEN_TTL_MINUTES: i64 = 15;

/// Token creations allowed per email address per rolling hour, independent
/// of the per-IP limit on the HTTP route.
const TOKENS_PER_EMAIL_PER_HOUR: u32 = 5;

/// Why a verification attempt was turned away. These are the only outcomes
/// the redirect may encode; free text could leak state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyRejection {
    MissingToken,
    InvalidOrUsed,
    MembershipExpired,
    InvalidReturn,
}

impl VerifyRejection {
    pub fn code(&self) -> &'static str {
        match self {
            VerifyRejection::MissingToken => "missing_token",
            VerifyRejection::InvalidOrUsed => "invalid_or_used",
            VerifyRejection::MembershipExpired => "membership_expired",
            VerifyRejection::InvalidReturn => "invalid_return",
        }
    }
}

/// Everything the verify handler needs to finish the flow.
#[derive(Debug)]
pub struct VerifiedLogin {
    pub affiliation_id: Uuid,
    pub session_token: String,
    /// Redirect target with the handoff token already attached.
    pub redirect_url: Url,
}

/// Create a login token for an active member and email the magic link.
///
/// The email must belong to a completed affiliation whose validity window
/// has not elapsed; everyone else gets an explicit "not an active member"
/// rejection.
pub async fn request_login(
    pool: &DbPool,
    email_sender: &dyn EmailSender,
    limiter: &RateLimiter,
    config: &Config,
    body: LoginRequestBody,
    requested_ip: Option<String>,
) -> Result<(), AppError> {
    let email = body.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::InvalidRequest("a valid email is required".to_string()));
    }

    let affiliation = find_active_member(pool, &email)
        .await?
        .ok_or(AppError::NotActiveMember)?;

    // Per-identity limit, so one address cannot be email-bombed even from
    // many source IPs.
    if let Err(retry_after) = limiter
        .check(
            &format!("login-email:{email}"),
            TOKENS_PER_EMAIL_PER_HOUR,
            std::time::Duration::from_secs(3600),
        )
        .await
    {
        return Err(AppError::RateLimited {
            retry_after_secs: retry_after.as_secs().max(1),
        });
    }

    // Validate the requested return URL now; storing a bad one would only
    // surface the failure after the member clicked the link.
    let validated_return = match &body.return_url {
        Some(raw) => Some(
            return_url::validate(raw, &config.allowed_return_hosts)
                .map_err(|reason| {
                    AppError::InvalidRequest(format!("return URL rejected: {reason}"))
                })?
                .to_string(),
        ),
        None => None,
    };

    let secret = hex::encode(rand::random::<[u8; 32]>());
    let token_hash = hash_secret(&secret);
    let expires_at = Utc::now() + ChronoDuration::minutes(LOGIN_TOKEN_TTL_MINUTES);

    sqlx::query(
        r#"
        INSERT INTO login_tokens (
            affiliation_id,
            token_hash,
            return_url,
            source,
            requested_ip,
            expires_at
        )
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(affiliation.id)
    .bind(&token_hash)
    .bind(&validated_return)
    .bind(&body.source)
    .bind(&requested_ip)
    .bind(expires_at)
    .execute(pool)
    .await?;

    let verify_url = build_verify_url(&config.base_url, &secret);
    let message = login_email(&affiliation, &verify_url);
    email_sender
        .send(&message)
        .await
        .map_err(|err| AppError::EmailDelivery(err.to_string()))?;

    tracing::info!(
        affiliation_id = %affiliation.id,
        source = body.source.as_deref().unwrap_or("direct"),
        "login link sent"
    );

    Ok(())
}

/// Consume a login token and build the member's redirect.
///
/// The claim is a single UPDATE, so two concurrent attempts on the same
/// token can never both succeed. Membership validity is re-checked here:
/// it may have expired between request and verification.
pub async fn verify_login(
    pool: &DbPool,
    config: &Config,
    raw_token: &str,
) -> Result<VerifiedLogin, VerifyRejection> {
    let token_hash = hash_secret(raw_token);

    let claimed = sqlx::query_as::<_, LoginToken>(
        r#"
        UPDATE login_tokens
        SET used_at = NOW()
        WHERE token_hash = $1
          AND used_at IS NULL
          AND expires_at > NOW()
        RETURNING *
        "#,
    )
    .bind(&token_hash)
    .fetch_optional(pool)
    .await
    .map_err(|err| {
        tracing::error!(error = %err, "login token claim failed");
        VerifyRejection::InvalidOrUsed
    })?;

    let Some(login_token) = claimed else {
        return Err(VerifyRejection::InvalidOrUsed);
    };

    let affiliation =
        sqlx::query_as::<_, Affiliation>("SELECT * FROM affiliations WHERE id = $1")
            .bind(login_token.affiliation_id)
            .fetch_optional(pool)
            .await
            .map_err(|err| {
                tracing::error!(error = %err, "affiliation lookup failed during verify");
                VerifyRejection::InvalidOrUsed
            })?
            .ok_or(VerifyRejection::InvalidOrUsed)?;

    if !affiliation.is_active(Utc::now()) {
        return Err(VerifyRejection::MembershipExpired);
    }

    let mut redirect_url = match &login_token.return_url {
        Some(stored) => return_url::validate(stored, &config.allowed_return_hosts)
            .map_err(|_| VerifyRejection::InvalidReturn)?,
        None => Url::parse(&config.default_return()).map_err(|_| VerifyRejection::InvalidReturn)?,
    };

    let source = login_token.source.as_deref().unwrap_or("magic-link");
    let handoff_token = handoff::issue(
        &affiliation.handoff_subject(),
        source,
        handoff::DEFAULT_TTL_SECS,
        &config.token_secret,
    )
    .map_err(|err| {
        tracing::error!(error = %err, "handoff issuance failed during verify");
        VerifyRejection::InvalidOrUsed
    })?;
    redirect_url
        .query_pairs_mut()
        .append_pair("fenam_token", &handoff_token);

    let session_token = session::issue(
        affiliation.id,
        session::DEFAULT_TTL_SECS,
        &config.token_secret,
    )
    .map_err(|err| {
        tracing::error!(error = %err, "session issuance failed during verify");
        VerifyRejection::InvalidOrUsed
    })?;

    tracing::info!(affiliation_id = %affiliation.id, "login link verified");

    Ok(VerifiedLogin {
        affiliation_id: affiliation.id,
        session_token,
        redirect_url,
    })
}

/// The completed, currently valid affiliation for this email, if any. The
/// most recent one wins when the member renewed across records.
async fn find_active_member(
    pool: &DbPool,
    email: &str,
) -> Result<Option<Affiliation>, sqlx::Error> {
    sqlx::query_as::<_, Affiliation>(
        r#"
        SELECT *
        FROM affiliations
        WHERE LOWER(email) = $1
          AND status = 'completed'
          AND member_until > NOW()
        ORDER BY member_until DESC
        LIMIT 1
        "#,
    )
    .bind(email)
    .fetch_optional(pool)
    .await
}

fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

fn build_verify_url(base_url: &str, secret: &str) -> String {
    format!("{}/login/verify?token={secret}", base_url.trim_end_matches('/'))
}

fn login_email(affiliation: &Affiliation, verify_url: &str) -> EmailMessage {
    let html = format!(
        "<p>Hello {name},</p>\
         <p><a href=\"{verify_url}\">Click here to access your FENAM member area</a>.</p>\
         <p>The link works once and expires in {LOGIN_TOKEN_TTL_MINUTES} minutes. \
         If you did not request it, you can ignore this email.</p>",
        name = affiliation.name,
    );
    let text = format!(
        "Hello {},\naccess your FENAM member area: {verify_url}\n\
         The link works once and expires in {LOGIN_TOKEN_TTL_MINUTES} minutes.\n",
        affiliation.name,
    );

    EmailMessage {
        to: affiliation.email.clone(),
        subject: "Your FENAM login link".to_string(),
        html,
        text,
        attachments: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_url_embeds_the_secret_once() {
        let url = build_verify_url("https://www.fenam.org/", "s3cr3t");
        assert_eq!(url, "https://www.fenam.org/login/verify?token=s3cr3t");
    }

    #[test]
    fn secret_hash_is_stable_hex_sha256() {
        let hash = hash_secret("s3cr3t");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_secret("s3cr3t"));
        assert_ne!(hash, hash_secret("other"));
    }

    #[test]
    fn rejection_codes_are_bounded() {
        assert_eq!(VerifyRejection::MissingToken.code(), "missing_token");
        assert_eq!(VerifyRejection::InvalidOrUsed.code(), "invalid_or_used");
        assert_eq!(
            VerifyRejection::MembershipExpired.code(),
            "membership_expired"
        );
        assert_eq!(VerifyRejection::InvalidReturn.code(), "invalid_return");
    }
}
