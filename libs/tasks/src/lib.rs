//! Task polling primitives.
//!
//! Every mutating call against the cluster returns a handle to an
//! asynchronous remote task. This library waits for such tasks:
//!
//! - **Status source**: anything that can report a task's [`TaskStatus`].
//! - **Clock**: the time base the waiter samples and sleeps on, injectable so
//!   deadline behaviour is testable without real sleeps.
//! - **Waiter**: a bounded polling loop driven by the [`WaitState`] machine.
//!
//! # Invariants
//!
//! - At least one status check happens before a wait can time out
//! - No status query is issued after a terminal status is observed
//! - The remote task is never cancelled; a timeout only abandons the wait

mod clock;
mod waiter;

use std::time::Duration;

pub use clock::{Clock, ManualClock, TokioClock};
pub use waiter::{StatusSource, TaskWaiter, WaitError, WaitOutcome, WaitState};

/// Observed status of a remote task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// Still running.
    Pending,

    /// Finished successfully.
    Success,

    /// Finished with an error; carries the remote detail verbatim.
    Failure(String),
}

impl TaskStatus {
    /// Returns true if no further transition will occur.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Success => f.write_str("success"),
            Self::Failure(detail) => write!(f, "failure: {detail}"),
        }
    }
}

/// Sampling period and absolute deadline for one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Time between two status checks.
    pub poll_interval: Duration,

    /// Total time allowed, measured from the first check.
    pub deadline: Duration,
}

impl WaitPolicy {
    /// Create a policy. Intervals below [`MIN_POLL_INTERVAL`] are raised to it.
    pub const fn new(poll_interval: Duration, deadline: Duration) -> Self {
        let poll_interval = if poll_interval.as_nanos() < MIN_POLL_INTERVAL.as_nanos() {
            MIN_POLL_INTERVAL
        } else {
            poll_interval
        };
        Self {
            poll_interval,
            deadline,
        }
    }

    /// Delay before the next check after a pending observation at `elapsed`.
    ///
    /// Never overshoots the deadline, so the final check lands on it. The
    /// interval is floored at [`MIN_POLL_INTERVAL`] even when the field was
    /// set directly.
    pub fn next_delay(&self, elapsed: Duration) -> Duration {
        let interval = self.poll_interval.max(MIN_POLL_INTERVAL);
        interval.min(self.deadline.saturating_sub(elapsed))
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            deadline: DEFAULT_DEADLINE,
        }
    }
}

/// Default interval between status checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Shortest interval between status checks.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Default deadline for a single task.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);
