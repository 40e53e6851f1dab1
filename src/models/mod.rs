//! Data models representing database entities.
//!
//! This module contains all data structures that map to database tables,
//! plus the request/response types of the HTTP API.

/// Membership application/record and its API types
pub mod affiliation;

/// One-time magic-link token
pub mod login_token;
