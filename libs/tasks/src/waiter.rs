//! Bounded polling loop.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::{Clock, TaskStatus, TokioClock, WaitPolicy};

/// Something that can report the status of a task handle `T`.
#[async_trait]
pub trait StatusSource<T: ?Sized + Sync>: Send + Sync {
    /// Error returned when the status cannot be queried at all.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Query the current status of `task`.
    async fn task_status(&self, task: &T) -> Result<TaskStatus, Self::Error>;
}

/// Errors ending a wait without success.
#[derive(Debug, Error)]
pub enum WaitError<E>
where
    E: std::error::Error + 'static,
{
    /// The task finished and reported a failure.
    #[error("task failed: {detail}")]
    TaskFailed { detail: String, polls: u32 },

    /// The deadline passed while the task was still pending.
    #[error("timed out after {elapsed:?} ({polls} status checks, deadline {deadline:?})")]
    TimedOut {
        elapsed: Duration,
        deadline: Duration,
        polls: u32,
    },

    /// The status could not be queried.
    #[error("task status query failed: {source}")]
    Query {
        #[source]
        source: E,
        polls: u32,
    },
}

impl<E> WaitError<E>
where
    E: std::error::Error + 'static,
{
    /// Number of status queries issued before the wait ended.
    pub fn polls(&self) -> u32 {
        match self {
            Self::TaskFailed { polls, .. }
            | Self::TimedOut { polls, .. }
            | Self::Query { polls, .. } => *polls,
        }
    }

    /// Returns true if the wait gave up on the deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

/// Result of a successful wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOutcome {
    /// Status queries issued, including the one that saw success.
    pub polls: u32,

    /// Time from the first check to the successful one.
    pub elapsed: Duration,
}

/// State of a single wait.
///
/// ```text
/// Pending ──success──▶ Succeeded
///    │ ────failure──▶ Failed
///    └─ deadline ───▶ TimedOut
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitState {
    /// No terminal status seen yet.
    Pending { polls: u32 },

    /// The task reported success.
    Succeeded { polls: u32 },

    /// The task reported failure.
    Failed { polls: u32, detail: String },

    /// The deadline passed with the task still pending.
    TimedOut { polls: u32, elapsed: Duration },
}

impl WaitState {
    /// Initial state, before any check.
    pub fn start() -> Self {
        Self::Pending { polls: 0 }
    }

    /// Fold one status observation made at `elapsed` into the state.
    ///
    /// Terminal states absorb further observations unchanged.
    pub fn observe(self, status: TaskStatus, elapsed: Duration, deadline: Duration) -> Self {
        let Self::Pending { polls } = self else {
            return self;
        };
        let polls = polls + 1;

        match status {
            TaskStatus::Success => Self::Succeeded { polls },
            TaskStatus::Failure(detail) => Self::Failed { polls, detail },
            TaskStatus::Pending if elapsed >= deadline => Self::TimedOut { polls, elapsed },
            TaskStatus::Pending => Self::Pending { polls },
        }
    }

    /// Status checks folded in so far.
    pub fn polls(&self) -> u32 {
        match self {
            Self::Pending { polls }
            | Self::Succeeded { polls }
            | Self::Failed { polls, .. }
            | Self::TimedOut { polls, .. } => *polls,
        }
    }

    /// Returns true once no further checks are needed.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending { .. })
    }
}

/// Waits for tasks by polling a [`StatusSource`].
#[derive(Clone)]
pub struct TaskWaiter {
    clock: Arc<dyn Clock>,
}

impl TaskWaiter {
    /// Create a waiter on the given clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Block until `task` reaches a terminal status or `policy.deadline`
    /// passes.
    pub async fn wait<T, S>(
        &self,
        source: &S,
        task: &T,
        policy: &WaitPolicy,
    ) -> Result<WaitOutcome, WaitError<S::Error>>
    where
        T: Display + ?Sized + Sync,
        S: StatusSource<T> + ?Sized,
    {
        let start = self.clock.now();
        let mut state = WaitState::start();

        debug!(
            task = %task,
            poll_interval_ms = policy.poll_interval.as_millis() as u64,
            deadline_ms = policy.deadline.as_millis() as u64,
            "Waiting for task"
        );

        loop {
            let status = match source.task_status(task).await {
                Ok(status) => status,
                Err(source) => {
                    warn!(task = %task, error = %source, "Task status query failed");
                    return Err(WaitError::Query {
                        source,
                        polls: state.polls() + 1,
                    });
                }
            };

            let elapsed = self.clock.now().saturating_duration_since(start);
            trace!(
                task = %task,
                status = %status,
                elapsed_ms = elapsed.as_millis() as u64,
                "Polled task"
            );

            match state.observe(status, elapsed, policy.deadline) {
                pending @ WaitState::Pending { .. } => {
                    state = pending;
                    self.clock.sleep(policy.next_delay(elapsed)).await;
                }
                WaitState::Succeeded { polls } => {
                    debug!(
                        task = %task,
                        polls,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Task succeeded"
                    );
                    return Ok(WaitOutcome { polls, elapsed });
                }
                WaitState::Failed { polls, detail } => {
                    warn!(task = %task, polls, detail = %detail, "Task failed");
                    return Err(WaitError::TaskFailed { detail, polls });
                }
                WaitState::TimedOut { polls, elapsed } => {
                    warn!(
                        task = %task,
                        polls,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Task wait timed out"
                    );
                    return Err(WaitError::TimedOut {
                        elapsed,
                        deadline: policy.deadline,
                        polls,
                    });
                }
            }
        }
    }
}

impl Default for TaskWaiter {
    fn default() -> Self {
        Self::new(Arc::new(TokioClock))
    }
}

impl std::fmt::Debug for TaskWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskWaiter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEADLINE: Duration = Duration::from_secs(10);

    #[test]
    fn test_observe_pending_counts_polls() {
        let state = WaitState::start()
            .observe(TaskStatus::Pending, Duration::ZERO, DEADLINE)
            .observe(TaskStatus::Pending, Duration::from_secs(1), DEADLINE);

        assert_eq!(state, WaitState::Pending { polls: 2 });
    }

    #[test]
    fn test_observe_success() {
        let state = WaitState::start().observe(TaskStatus::Success, Duration::ZERO, DEADLINE);
        assert_eq!(state, WaitState::Succeeded { polls: 1 });
        assert!(state.is_terminal());
    }

    #[test]
    fn test_observe_failure_keeps_detail() {
        let state = WaitState::start().observe(
            TaskStatus::Failure("unable to find configuration file".to_string()),
            Duration::ZERO,
            DEADLINE,
        );

        assert_eq!(
            state,
            WaitState::Failed {
                polls: 1,
                detail: "unable to find configuration file".to_string()
            }
        );
    }

    #[test]
    fn test_observe_pending_at_deadline_times_out() {
        let state = WaitState::start().observe(TaskStatus::Pending, DEADLINE, DEADLINE);
        assert_eq!(
            state,
            WaitState::TimedOut {
                polls: 1,
                elapsed: DEADLINE
            }
        );
    }

    #[test]
    fn test_success_at_deadline_wins() {
        let state = WaitState::start().observe(TaskStatus::Success, DEADLINE * 2, DEADLINE);
        assert_eq!(state, WaitState::Succeeded { polls: 1 });
    }

    #[test]
    fn test_terminal_state_absorbs() {
        let done = WaitState::Succeeded { polls: 3 };
        let after = done
            .clone()
            .observe(TaskStatus::Failure("late".to_string()), DEADLINE, DEADLINE);
        assert_eq!(after, done);
    }
}
