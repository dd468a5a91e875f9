//! Flow tuning knobs.

use std::time::Duration;

use vmlab_tasks::WaitPolicy;

use crate::service::TaskKind;

/// Poll interval and per-operation deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowTimings {
    /// Interval between task status checks.
    pub poll_interval: Duration,

    /// Deadline for VM creation.
    pub create: Duration,

    /// Deadline for configuration (includes disk import).
    pub configure: Duration,

    /// Deadline for start.
    pub start: Duration,

    /// Deadline for stop.
    pub stop: Duration,

    /// Deadline for image download.
    pub image: Duration,
}

impl Default for FlowTimings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            create: Duration::from_secs(10),
            configure: Duration::from_secs(40),
            start: Duration::from_secs(30),
            stop: Duration::from_secs(15),
            image: Duration::from_secs(600),
        }
    }
}

impl FlowTimings {
    /// Wait policy for tasks of `kind`.
    pub fn policy(&self, kind: TaskKind) -> WaitPolicy {
        let deadline = match kind {
            TaskKind::Create => self.create,
            TaskKind::Configure => self.configure,
            TaskKind::Start => self.start,
            TaskKind::Stop => self.stop,
            TaskKind::Download => self.image,
        };
        WaitPolicy::new(self.poll_interval, deadline)
    }

    /// Scale every deadline by `factor` (slow clusters).
    #[must_use]
    pub fn scaled(self, factor: u32) -> Self {
        Self {
            poll_interval: self.poll_interval,
            create: self.create * factor,
            configure: self.configure * factor,
            start: self.start * factor,
            stop: self.stop * factor,
            image: self.image * factor,
        }
    }
}

/// What to do when a VM reports `running` but does not answer the probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReachabilityPolicy {
    /// Treat it as a verification failure.
    #[default]
    Strict,

    /// Log a warning and accept the reported status.
    Warn,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_deadlines() {
        let timings = FlowTimings::default();
        assert_eq!(timings.policy(TaskKind::Create).deadline, Duration::from_secs(10));
        assert_eq!(timings.policy(TaskKind::Configure).deadline, Duration::from_secs(40));
        assert_eq!(timings.policy(TaskKind::Start).deadline, Duration::from_secs(30));
        assert_eq!(timings.policy(TaskKind::Stop).deadline, Duration::from_secs(15));
    }

    #[test]
    fn test_scaled_keeps_poll_interval() {
        let timings = FlowTimings::default().scaled(3);
        assert_eq!(timings.poll_interval, Duration::from_secs(1));
        assert_eq!(timings.stop, Duration::from_secs(45));
    }
}
