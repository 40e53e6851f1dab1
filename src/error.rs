//! Error types and HTTP error response handling.
//!
//! This module defines all application errors and how they are converted
//! into HTTP responses with appropriate status codes and JSON bodies.

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

/// What went wrong during the critical completion write.
///
/// The completion engine distinguishes these so the caller can decide on
/// user-facing messaging and on whether manual reconciliation is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionWriteKind {
    /// The affiliation row disappeared between the initial read and the
    /// transactional re-read.
    RecordVanished,

    /// The UPDATE hit a unique constraint, almost certainly a member number
    /// collision that survived the generator's own retry loop.
    UniqueViolation,

    /// Any other persistence failure during the commit.
    Other,
}

impl CompletionWriteKind {
    fn as_str(&self) -> &'static str {
        match self {
            CompletionWriteKind::RecordVanished => "record_vanished",
            CompletionWriteKind::UniqueViolation => "unique_violation",
            CompletionWriteKind::Other => "write_failed",
        }
    }
}

/// Application-wide error type.
///
/// Each variant maps to a specific HTTP status code and machine-readable
/// error code.
///
/// # Error Categories
///
/// - **Validation errors**: malformed or missing input, rejected before any
///   side effect
/// - **Not-found errors**: unknown affiliation or order
/// - **Rate limiting**: rejected with a retry-after hint, never queued
/// - **External-dependency errors**: payment provider or email API failures
/// - **Critical-write errors**: the payment succeeded externally but the
///   membership state failed to transition
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed (connection error, query error).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Request body or parameters are invalid.
    ///
    /// Returns HTTP 400 Bad Request with details in the message.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Requested affiliation does not exist.
    ///
    /// Returns HTTP 404 Not Found.
    #[error("Affiliation not found")]
    AffiliationNotFound,

    /// No affiliation matches the given payment order reference.
    ///
    /// Returns HTTP 404 Not Found.
    #[error("Order not found")]
    OrderNotFound,

    /// The email does not belong to a completed, currently valid membership.
    ///
    /// Returns HTTP 403 Forbidden. This deliberately tells the caller more
    /// than a uniform "check your email" would; see DESIGN.md.
    #[error("Not an active member")]
    NotActiveMember,

    /// Too many requests for this client identity inside the current window.
    ///
    /// Returns HTTP 429 Too Many Requests with a Retry-After header.
    #[error("Too many requests, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// The payment provider rejected a call or was unreachable.
    ///
    /// Returns HTTP 502 Bad Gateway.
    #[error("Payment provider error: {0}")]
    PaymentProvider(String),

    /// The email API rejected the magic-link delivery.
    ///
    /// Returns HTTP 502 Bad Gateway. Only the login-request path escalates
    /// email failures; post-completion sends are downgraded to warnings.
    #[error("Email delivery failed: {0}")]
    EmailDelivery(String),

    /// The signing secret is missing from the environment.
    ///
    /// Operator mistake, not a data mistake. Returns HTTP 500.
    #[error("Token signing secret is not configured")]
    MissingTokenSecret,

    /// The member number generator exhausted its retries.
    ///
    /// Returns HTTP 500. With a 16^6 space per year this means either a
    /// broken random source or a nearly full year bucket.
    #[error("Could not allocate a unique member number")]
    MemberNumberExhausted,

    /// The payment was captured externally but the membership record failed
    /// to transition. The single most critical failure mode in the system:
    /// the response must carry the order reference for manual recovery and
    /// must never imply the payment itself failed.
    #[error("Membership activation failed for order {order_reference} ({})", .kind.as_str())]
    CompletionWrite {
        kind: CompletionWriteKind,
        order_reference: String,
    },
}

impl From<crate::token::codec::TokenError> for AppError {
    fn from(_: crate::token::codec::TokenError) -> Self {
        AppError::MissingTokenSecret
    }
}

/// Convert AppError into an HTTP response.
///
/// All errors return JSON in this format:
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::InvalidRequest(ref msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }
            AppError::AffiliationNotFound => (
                StatusCode::NOT_FOUND,
                "affiliation_not_found",
                self.to_string(),
            ),
            AppError::OrderNotFound => (StatusCode::NOT_FOUND, "order_not_found", self.to_string()),
            AppError::NotActiveMember => (
                StatusCode::FORBIDDEN,
                "not_active_member",
                self.to_string(),
            ),
            AppError::RateLimited { retry_after_secs } => {
                let body = Json(json!({
                    "error": {
                        "code": "rate_limited",
                        "message": self.to_string(),
                        "retry_after_secs": retry_after_secs
                    }
                }));
                return (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(header::RETRY_AFTER, retry_after_secs.to_string())],
                    body,
                )
                    .into_response();
            }
            AppError::PaymentProvider(ref msg) => (
                StatusCode::BAD_GATEWAY,
                "payment_provider_error",
                msg.clone(),
            ),
            AppError::EmailDelivery(ref msg) => {
                (StatusCode::BAD_GATEWAY, "email_delivery_failed", msg.clone())
            }
            AppError::MissingTokenSecret => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "configuration_error",
                self.to_string(),
            ),
            AppError::MemberNumberExhausted => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "member_number_exhausted",
                self.to_string(),
            ),
            AppError::CompletionWrite {
                ref order_reference,
                ..
            } => {
                // The payment went through; the message must say so and give
                // support enough to reconcile manually.
                let message = format!(
                    "Your payment for order {order_reference} was received, but the membership \
                     could not be activated automatically. Please contact support and quote the \
                     order reference."
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "completion_write_failed",
                    message,
                )
            }
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "An internal error occurred".to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
