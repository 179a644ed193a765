//! Difficulty retargeting and header proof-of-work verification.

pub mod difficulty;
pub mod validation;

pub use difficulty::{compute_target, CompactError, DifficultyError, Target};
pub use validation::{verify_header, verify_headers, VerifyHeaderError, VerifyReason};
