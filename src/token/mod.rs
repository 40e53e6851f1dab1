//! Signed token protocols.
//!
//! `codec` is the generic sign/verify primitive; `handoff` and `session`
//! are the two protocols built on top of it.

pub mod codec;
pub mod handoff;
pub mod session;
