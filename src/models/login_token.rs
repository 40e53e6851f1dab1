//! One-time login token model for the magic-link flow.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

/// A one-time login token record.
///
/// Only the SHA-256 hash of the emailed secret is stored; the raw secret
/// exists nowhere but in the verification URL. The record moves through
/// three states: requested (created, unused, unexpired), consumed (`used_at`
/// set) and expired (TTL elapsed, never consumed). A presented secret whose
/// hash matches nothing is simply invalid.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LoginToken {
    pub id: Uuid,

    pub affiliation_id: Uuid,

    /// SHA-256 hex digest of the raw secret
    pub token_hash: String,

    /// Validated return URL requested at login time, if any
    pub return_url: Option<String>,

    /// Partner tag that initiated the request, if any
    pub source: Option<String>,

    /// Client IP captured at request time, for abuse investigation
    pub requested_ip: Option<String>,

    pub created_at: DateTime<Utc>,

    pub expires_at: DateTime<Utc>,

    /// Consumption timestamp; a non-NULL value makes the token permanently
    /// unusable
    pub used_at: Option<DateTime<Utc>>,
}

/// Request body for `POST /api/v1/login/request`.
#[derive(Debug, Deserialize)]
pub struct LoginRequestBody {
    pub email: String,

    pub return_url: Option<String>,

    pub source: Option<String>,
}
