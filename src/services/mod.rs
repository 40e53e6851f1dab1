//! Business logic services.
//!
//! Services contain the core membership logic separated from HTTP handlers:
//! the completion state machine, the notification dispatcher, the magic-link
//! flow and their supporting pieces.

pub mod completion;
pub mod login;
pub mod member_number;
pub mod return_url;
pub mod side_effects;
