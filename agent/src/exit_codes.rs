//! Stable exit codes for agent CLI commands.

/// Command succeeded (`run` returned a result, `parse` decoded an action).
pub const OK: i32 = 0;
/// Invalid input, config, model failure or other errors.
pub const INVALID: i32 = 1;
/// `run` used its whole step budget without a completed `finish`.
pub const STEP_LIMIT: i32 = 2;
