//! Step budget helpers for the control loop.

/// Hard ceiling on model turns per run, regardless of the requested budget.
pub const STEP_CEILING: u32 = 100;

/// Clamp a caller-requested step budget to [`STEP_CEILING`].
pub fn clamp_steps(requested: u32) -> u32 {
    requested.min(STEP_CEILING)
}
