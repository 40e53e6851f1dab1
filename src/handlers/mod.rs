//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, query params, headers)
//! 2. Delegates to the service layer
//! 3. Returns an HTTP response (JSON, or a redirect for the browser flows)

/// Affiliation creation and payment completion
pub mod affiliations;

/// Cross-site handoff issuance
pub mod handoff;

/// Service health probe
pub mod health;

/// Magic-link request and verification
pub mod login;
