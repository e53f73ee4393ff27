//! Error types the engine matches on.
//!
//! Everything else travels as `anyhow::Error`; these are recovered with
//! `downcast_ref` where the distinction changes control flow.

use thiserror::Error;

/// A step judged the ticket's work unsuccessful.
///
/// Not an execution error: the routine stops and the ticket follows its
/// state's fail transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("negative outcome: {reason}")]
pub struct NegativeOutcome {
    pub reason: String,
}

impl NegativeOutcome {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Failure that retrying cannot fix (bad credentials, missing tooling).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HardFailure {
    #[error("{tool} rejected its credentials: {detail}")]
    BadCredentials { tool: String, detail: String },
    #[error("command '{command}' hit a hard failure ({pattern}): {detail}")]
    Tooling {
        command: String,
        pattern: String,
        detail: String,
    },
}

/// True if `err` (or anything it wraps) is a [`HardFailure`].
pub fn is_hard_failure(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<HardFailure>())
}

/// The [`NegativeOutcome`] carried by `err`, if any.
pub fn negative_outcome(err: &anyhow::Error) -> Option<&NegativeOutcome> {
    err.chain().find_map(|cause| cause.downcast_ref::<NegativeOutcome>())
}
