//! VM lifecycle orchestration.
//!
//! Drives one virtual machine through its whole life against a cluster
//! service and verifies the observable state after each transition:
//!
//! - **Allocator**: asks the cluster for a free VM id.
//! - **Provisioner**: submits create / configure / start / stop and returns
//!   a [`Task`] handle without waiting.
//! - **Verifier**: checks reported status and reachability after start and
//!   stop.
//! - **Flow**: sequences the above, blocking on every task with the waiter
//!   from `vmlab-tasks`.
//!
//! The cluster itself sits behind [`ClusterService`]; [`fake::FakeCluster`]
//! is an in-memory implementation for tests and dry runs.
//!
//! # Invariants
//!
//! - Steps run strictly in order; a step starts only after the previous
//!   task reached a terminal status
//! - The first failure ends the run; nothing is retried or rolled back
//! - Every failure names the step it happened in

pub mod allocator;
pub mod config;
pub mod fake;
pub mod flow;
pub mod plan;
pub mod provisioner;
pub mod service;
pub mod verifier;

pub use allocator::{AllocationError, IdentifierAllocator};
pub use config::{FlowTimings, ReachabilityPolicy};
pub use flow::{Flow, FlowError, FlowReport, Step, StepError, StepRecord};
pub use plan::{default_options, random_name, FlowPlan, ImageSource, NAME_LENGTH};
pub use provisioner::{Provisioner, SubmissionError, Task, TaskProbe};
pub use service::{
    ClusterService, ImageDownload, OptionValue, ServiceError, TaskKind, VmOptions, VmStatus,
};
pub use verifier::{LifecycleVerifier, Observation, VerificationError};
