//! Scheduler policy constants and the per-run state machine.
//!
//! This module lives in `core` (zero internal deps) so it can be used by the
//! repository layer, the worker, and the admin API alike.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Policy constants
// ---------------------------------------------------------------------------

/// Maximum concurrently running instances of one job name, system-wide.
pub const DEFAULT_LOCK_LIMIT: u32 = 5;

/// Wall-clock budget for a single handler invocation.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Lease length for a job lock.
///
/// Must exceed [`DEFAULT_JOB_TIMEOUT`]: a lease that expires while a healthy
/// handler is still inside its timeout lets a second instance of the same job
/// identity start. Twice the handler timeout leaves room for the bookkeeping
/// that follows the handler (recording the outcome, releasing the lock).
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30 * 60);

/// Default polling interval for the scheduler loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of worker slots per scheduler process.
pub const DEFAULT_WORKER_SLOTS: usize = 10;

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Lifecycle of one execution attempt of a job.
///
/// `Failed` attempts of recurring jobs go back to `Pending` at the next
/// schedule tick; `Failed` one-shot attempts are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Pending,
    LockWait,
    Running,
    Succeeded,
    Failed,
}

impl RunState {
    pub fn name(self) -> &'static str {
        match self {
            RunState::Pending => "Pending",
            RunState::LockWait => "LockWait",
            RunState::Running => "Running",
            RunState::Succeeded => "Succeeded",
            RunState::Failed => "Failed",
        }
    }
}

/// Returns the states reachable from `from`.
///
/// `recurring` decides whether a finished attempt re-enters `Pending`.
pub fn valid_transitions(from: RunState, recurring: bool) -> &'static [RunState] {
    use RunState::*;
    match (from, recurring) {
        (Pending, _) => &[LockWait],
        // Lock denied: stay due and retry on the next poll tick.
        (LockWait, _) => &[Running, Pending],
        (Running, _) => &[Succeeded, Failed],
        (Succeeded | Failed, true) => &[Pending],
        (Succeeded | Failed, false) => &[],
    }
}

pub fn can_transition(from: RunState, to: RunState, recurring: bool) -> bool {
    valid_transitions(from, recurring).contains(&to)
}

/// Validate a state transition, returning an error message for invalid ones.
pub fn validate_transition(from: RunState, to: RunState, recurring: bool) -> Result<(), String> {
    if can_transition(from, to, recurring) {
        Ok(())
    } else {
        Err(format!(
            "Invalid transition: {} -> {}",
            from.name(),
            to.name()
        ))
    }
}
