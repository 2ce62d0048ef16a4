//! Stable exit codes for `tfci` commands.

/// Command succeeded and every invocation reported `SUCCESS`.
pub const OK: i32 = 0;
/// At least one invocation reported `FAILURE`.
pub const FAILURE: i32 = 1;
/// Invalid arguments, configuration or trigger input.
pub const INVALID: i32 = 2;
