//! Bounded reinitialization policy for the tool invoker.
//!
//! ```text
//! SELECT_WORKSPACE -> RUN_TOOL -> DONE
//!                              -> REINIT -> SELECT_WORKSPACE -> RUN_TOOL -> DONE
//! ```
//!
//! At most [`MAX_REINITS`] REINIT transitions happen per invocation; a
//! recoverable error seen after that is terminal.

/// Reinitializations allowed per top-level invocation.
pub const MAX_REINITS: u32 = 1;

/// What the invoker does after one select-workspace/run-tool attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptVerdict {
    /// No recoverable error; the attempt's output is final.
    Complete,
    /// Clear the state cache, initialize, and run the attempt again.
    Reinitialize,
    /// The recoverable error recurred after the allowed reinitializations.
    Exhausted,
}

pub fn judge_attempt(recoverable_error: bool, reinits_used: u32) -> AttemptVerdict {
    if !recoverable_error {
        AttemptVerdict::Complete
    } else if reinits_used < MAX_REINITS {
        AttemptVerdict::Reinitialize
    } else {
        AttemptVerdict::Exhausted
    }
}
