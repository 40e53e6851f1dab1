//! HTTP middleware components.

/// Fixed-window request rate limiting
pub mod rate_limit;
