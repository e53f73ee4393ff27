//! Stable exit codes for autopilot CLI commands.

/// Command succeeded (for `run-once`: a ticket was selected).
pub const OK: i32 = 0;
/// Invalid config or workflow, or any other error.
pub const INVALID: i32 = 1;
/// `run-once` found nothing to select.
pub const IDLE: i32 = 2;
