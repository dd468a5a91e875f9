//! The orchestration flow.
//!
//! ```text
//! [stage image → wait] → allocate → create → wait → configure → wait
//!     → start → wait → verify running → stop → wait → verify stopped
//! ```
//!
//! Fail-fast: the first error ends the run. Nothing is rolled back and no
//! step is retried; a VM created before the failure is left in place.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, info_span, Instrument};
use vmlab_id::{Upid, VmId};
use vmlab_tasks::{TaskWaiter, WaitError, WaitOutcome};

use crate::allocator::{AllocationError, IdentifierAllocator};
use crate::config::{FlowTimings, ReachabilityPolicy};
use crate::plan::FlowPlan;
use crate::provisioner::{Provisioner, SubmissionError, Task, TaskProbe};
use crate::service::{ClusterService, ServiceError, VmStatus};
use crate::verifier::{LifecycleVerifier, Observation, VerificationError};

/// Named step of the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    StageImage,
    Allocate,
    Create,
    Configure,
    Start,
    VerifyRunning,
    Stop,
    VerifyStopped,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StageImage => "stage_image",
            Self::Allocate => "allocate",
            Self::Create => "create",
            Self::Configure => "configure",
            Self::Start => "start",
            Self::VerifyRunning => "verify_running",
            Self::Stop => "stop",
            Self::VerifyStopped => "verify_stopped",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a step failed.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    /// The remote task completed with an error.
    #[error("task {upid} failed after {polls} checks: {detail}")]
    TaskFailed {
        upid: Upid,
        detail: String,
        polls: u32,
    },

    /// The task was still pending at the deadline.
    #[error("task {upid} still pending after {elapsed:?} (deadline {deadline:?})")]
    Timeout {
        upid: Upid,
        elapsed: Duration,
        deadline: Duration,
        polls: u32,
    },

    /// The task status could not be read.
    #[error("status of task {upid} unavailable: {source}")]
    TaskStatus {
        upid: Upid,
        #[source]
        source: ServiceError,
    },

    #[error(transparent)]
    Verification(#[from] VerificationError),
}

impl StepError {
    fn from_wait(upid: &Upid, err: WaitError<ServiceError>) -> Self {
        match err {
            WaitError::TaskFailed { detail, polls } => Self::TaskFailed {
                upid: upid.clone(),
                detail,
                polls,
            },
            WaitError::TimedOut {
                elapsed,
                deadline,
                polls,
            } => Self::Timeout {
                upid: upid.clone(),
                elapsed,
                deadline,
                polls,
            },
            WaitError::Query { source, .. } => Self::TaskStatus {
                upid: upid.clone(),
                source,
            },
        }
    }
}

/// A flow run aborted at `step`.
#[derive(Debug, Error)]
pub struct FlowError {
    pub step: Step,
    pub vm_id: Option<VmId>,
    #[source]
    pub source: StepError,
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step '{}' failed", self.step)?;
        if let Some(id) = self.vm_id {
            write!(f, " for VM {id}")?;
        }
        write!(f, ": {}", self.source)
    }
}

/// One completed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub step: Step,

    /// Task the step waited on, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upid: Option<Upid>,

    /// Status checks spent waiting.
    pub polls: u32,

    /// Time spent waiting, in milliseconds.
    pub elapsed_ms: u64,

    /// Observation made by a verify step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed: Option<Observation>,
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowReport {
    pub vm_id: VmId,
    pub name: String,
    pub final_status: VmStatus,
    pub steps: Vec<StepRecord>,
}

/// Runs the lifecycle flow against a cluster service.
pub struct Flow<S: ?Sized> {
    allocator: IdentifierAllocator<S>,
    provisioner: Provisioner<S>,
    verifier: LifecycleVerifier<S>,
    service: Arc<S>,
    waiter: TaskWaiter,
}

impl<S> Flow<S>
where
    S: ClusterService + ?Sized,
{
    /// Flow with default timings, strict reachability and the tokio clock.
    pub fn new(service: Arc<S>) -> Self {
        Self::with_settings(
            service,
            TaskWaiter::default(),
            FlowTimings::default(),
            ReachabilityPolicy::default(),
        )
    }

    pub fn with_settings(
        service: Arc<S>,
        waiter: TaskWaiter,
        timings: FlowTimings,
        reachability: ReachabilityPolicy,
    ) -> Self {
        Self {
            allocator: IdentifierAllocator::new(Arc::clone(&service)),
            provisioner: Provisioner::new(Arc::clone(&service), timings),
            verifier: LifecycleVerifier::new(Arc::clone(&service), reachability),
            service,
            waiter,
        }
    }

    /// Block on `task` with its own wait policy.
    pub async fn wait(&self, task: &Task) -> Result<WaitOutcome, StepError> {
        self.waiter
            .wait(&TaskProbe(&*self.service), task, &task.policy)
            .await
            .map_err(|err| StepError::from_wait(&task.upid, err))
    }

    /// Run every step of `plan`.
    pub async fn run(&self, plan: &FlowPlan) -> Result<FlowReport, FlowError> {
        let span = info_span!("flow", name = %plan.name);
        self.run_steps(plan).instrument(span).await
    }

    async fn run_steps(&self, plan: &FlowPlan) -> Result<FlowReport, FlowError> {
        let mut steps = Vec::new();

        if let Some(image) = &plan.image {
            let record = self
                .submit_and_wait(Step::StageImage, None, || {
                    self.provisioner.download(&image.download)
                })
                .await?;
            steps.push(record);
        }

        let vm_id = self
            .allocator
            .next_id()
            .await
            .map_err(|e| fail(Step::Allocate, None, e.into()))?;
        steps.push(StepRecord::instant(Step::Allocate));

        let create_options = plan.create_options();
        steps.push(
            self.submit_and_wait(Step::Create, Some(vm_id), || {
                self.provisioner.create(vm_id, &create_options)
            })
            .await?,
        );

        let configure_options = plan.configure_options();
        steps.push(
            self.submit_and_wait(Step::Configure, Some(vm_id), || {
                self.provisioner.configure(vm_id, &configure_options)
            })
            .await?,
        );

        steps.push(
            self.submit_and_wait(Step::Start, Some(vm_id), || self.provisioner.start(vm_id))
                .await?,
        );

        let running = self
            .verifier
            .verify_running(vm_id)
            .await
            .map_err(|e| fail(Step::VerifyRunning, Some(vm_id), e.into()))?;
        steps.push(StepRecord::verified(Step::VerifyRunning, running));

        steps.push(
            self.submit_and_wait(Step::Stop, Some(vm_id), || self.provisioner.stop(vm_id))
                .await?,
        );

        let stopped = self
            .verifier
            .verify_stopped(vm_id)
            .await
            .map_err(|e| fail(Step::VerifyStopped, Some(vm_id), e.into()))?;
        steps.push(StepRecord::verified(Step::VerifyStopped, stopped));

        info!(vmid = %vm_id, steps = steps.len(), "Flow completed");

        Ok(FlowReport {
            vm_id,
            name: plan.name.clone(),
            final_status: stopped.status,
            steps,
        })
    }

    async fn submit_and_wait<F, Fut>(
        &self,
        step: Step,
        vm_id: Option<VmId>,
        submit: F,
    ) -> Result<StepRecord, FlowError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Task, SubmissionError>>,
    {
        let task = submit()
            .await
            .map_err(|e| fail(step, vm_id, e.into()))?;

        let outcome = self
            .wait(&task)
            .await
            .map_err(|e| fail(step, vm_id, e))?;

        info!(
            step = %step,
            upid = %task.upid,
            polls = outcome.polls,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "Step completed"
        );

        Ok(StepRecord {
            step,
            upid: Some(task.upid),
            polls: outcome.polls,
            elapsed_ms: outcome.elapsed.as_millis() as u64,
            observed: None,
        })
    }
}

impl StepRecord {
    fn instant(step: Step) -> Self {
        Self {
            step,
            upid: None,
            polls: 0,
            elapsed_ms: 0,
            observed: None,
        }
    }

    fn verified(step: Step, observed: Observation) -> Self {
        Self {
            observed: Some(observed),
            ..Self::instant(step)
        }
    }
}

fn fail(step: Step, vm_id: Option<VmId>, source: StepError) -> FlowError {
    error!(step = %step, vmid = ?vm_id.map(|id| id.value()), error = %source, "Flow step failed");
    FlowError {
        step,
        vm_id,
        source,
    }
}
