//! Affiliation data model and API request/response types.
//!
//! This module defines:
//! - `Affiliation`: database entity for a membership application
//! - `AffiliationStatus`: its two-state lifecycle
//! - Request/response types for the affiliation endpoints

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of an affiliation.
///
/// There are deliberately no further states. A payment that never confirms
/// simply leaves the record pending forever; `Completed` is terminal and
/// absorbing, so re-running completion on a completed record is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT")]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AffiliationStatus {
    Pending,
    Completed,
}

/// Represents an affiliation record from the database.
///
/// # Database Table
///
/// Maps to the `affiliations` table. Each affiliation:
/// - Has at most one payment order reference (UNIQUE)
/// - Gets a member number assigned exactly once, at completion
/// - Carries its validity window (`member_since` / `member_until`), both
///   NULL while pending
///
/// # Idempotency Markers
///
/// `confirmation_email_sent_at` and `membership_card_sent_at` are set if and
/// only if the corresponding send actually succeeded. A failed send leaves
/// the marker NULL so a later retry can attempt it again. These are guards,
/// not user data.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Affiliation {
    /// Unique identifier for this affiliation
    pub id: Uuid,

    /// Payment provider order id, NULL until an order has been created
    pub order_reference: Option<String>,

    /// Membership identifier in the form `FENAM-<year>-<6 hex chars>`.
    /// Assigned once, never reassigned.
    pub member_number: Option<String>,

    pub name: String,

    pub surname: String,

    /// Profile email, normalized to lowercase at creation
    pub email: String,

    pub phone: Option<String>,

    pub privacy_consent: bool,

    /// Payer email as reported by the payment provider, stored only when it
    /// differs from the profile email
    pub payer_email: Option<String>,

    pub status: AffiliationStatus,

    /// Activation date, NULL while pending
    pub member_since: Option<DateTime<Utc>>,

    /// Expiry date, exactly one calendar year after activation or after the
    /// renewal point
    pub member_until: Option<DateTime<Utc>>,

    pub confirmation_email_sent_at: Option<DateTime<Utc>>,

    pub membership_card_sent_at: Option<DateTime<Utc>>,

    /// Last provider status observed for this record, kept as a breadcrumb
    /// for manual reconciliation
    pub last_paypal_status: Option<String>,

    pub last_paypal_checked_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Affiliation {
    /// True when the membership is completed and its validity window has not
    /// elapsed yet.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == AffiliationStatus::Completed
            && self.member_until.is_some_and(|until| until > now)
    }

    /// Identity to embed in handoff tokens: the member number when present,
    /// the internal id otherwise. Never the email.
    pub fn handoff_subject(&self) -> String {
        self.member_number
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// Request body for creating a new affiliation.
///
/// # JSON Example
///
/// ```json
/// {
///   "name": "Ada",
///   "surname": "Lovelace",
///   "email": "Ada@Example.org",
///   "phone": "+39 333 1234567",
///   "privacy_consent": true,
///   "amount_cents": 2500
/// }
/// ```
///
/// # Validation
///
/// - `name` / `surname`: required, non-empty
/// - `email`: required, must contain `@`, stored lowercase
/// - `privacy_consent`: must be true
/// - `amount_cents`: must be positive
/// - `currency`: optional, defaults to "EUR"
#[derive(Debug, Deserialize)]
pub struct CreateAffiliationRequest {
    pub name: String,

    pub surname: String,

    pub email: String,

    pub phone: Option<String>,

    #[serde(default)]
    pub privacy_consent: bool,

    /// Membership fee or donation, in cents
    pub amount_cents: i64,

    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "EUR".to_string()
}

/// Response body when a pending affiliation and its payment order have been
/// created.
#[derive(Debug, Serialize)]
pub struct CreateAffiliationResponse {
    pub id: Uuid,

    /// Order id to hand to the payment provider's approval flow
    pub order_reference: String,

    pub status: AffiliationStatus,
}

/// Request body for the completion trigger.
///
/// `order_reference` is the only required field. The payer fields are
/// recovery inputs, used when the capture succeeds but no pending record
/// matches the order.
#[derive(Debug, Deserialize)]
pub struct CompleteAffiliationRequest {
    pub order_reference: String,

    pub payer_email: Option<String>,

    pub name: Option<String>,

    pub surname: Option<String>,

    /// Correlation id for tracing; one is generated when absent
    pub correlation_id: Option<String>,
}

/// Idempotent JSON result of the completion trigger.
///
/// # JSON Example
///
/// ```json
/// {
///   "completed": true,
///   "already_completed": false,
///   "member_number": "FENAM-2026-1A2B3C",
///   "member_since": "2026-08-04T10:00:00Z",
///   "member_until": "2027-08-04T10:00:00Z",
///   "email_sent": true,
///   "card_sent": true,
///   "warnings": []
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct CompleteAffiliationResponse {
    pub completed: bool,

    pub already_completed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_number: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_since: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_until: Option<DateTime<Utc>>,

    /// Provider status when the order is not captured yet; informational,
    /// not an error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_status: Option<String>,

    pub email_sent: bool,

    pub card_sent: bool,

    pub warnings: Vec<String>,
}
