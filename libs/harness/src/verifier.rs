//! Post-condition checks after start and stop.
//!
//! The running and stopped checks are deliberately asymmetric:
//!
//! - running: the VM must report `running` *and* answer the probe. A VM that
//!   reports `running` but is unreachable is a split-brain signal and is
//!   reported as [`VerificationError::Unreachable`], separate from a plain
//!   status mismatch.
//! - stopped: only the reported status counts. The host side of a stopped
//!   guest may well stay reachable, so the probe result is logged and ignored.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use vmlab_id::VmId;

use crate::config::ReachabilityPolicy;
use crate::service::{ClusterService, ServiceError, VmStatus};

/// A post-condition did not hold.
#[derive(Debug, Error)]
pub enum VerificationError {
    /// Reported status differs from the expected one.
    #[error("VM {vm_id} reports '{actual}', expected '{expected}'")]
    StatusMismatch {
        vm_id: VmId,
        expected: VmStatus,
        actual: VmStatus,
    },

    /// Status says running but the probe got no answer.
    #[error("VM {vm_id} reports '{declared}' but is unreachable")]
    Unreachable { vm_id: VmId, declared: VmStatus },

    /// The probe or status query itself failed.
    #[error("could not observe VM {vm_id}: {source}")]
    Probe {
        vm_id: VmId,
        #[source]
        source: ServiceError,
    },
}

/// What the verifier saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Observation {
    pub status: VmStatus,
    pub reachable: bool,
}

/// Checks reachability and reported status of a VM.
pub struct LifecycleVerifier<S: ?Sized> {
    service: Arc<S>,
    policy: ReachabilityPolicy,
}

impl<S> LifecycleVerifier<S>
where
    S: ClusterService + ?Sized,
{
    pub fn new(service: Arc<S>, policy: ReachabilityPolicy) -> Self {
        Self { service, policy }
    }

    /// The VM must report running and answer the probe.
    pub async fn verify_running(&self, vm_id: VmId) -> Result<Observation, VerificationError> {
        let observed = self.observe(vm_id).await?;

        if observed.status != VmStatus::Running {
            return Err(VerificationError::StatusMismatch {
                vm_id,
                expected: VmStatus::Running,
                actual: observed.status,
            });
        }

        if !observed.reachable {
            match self.policy {
                ReachabilityPolicy::Strict => {
                    return Err(VerificationError::Unreachable {
                        vm_id,
                        declared: observed.status,
                    });
                }
                ReachabilityPolicy::Warn => {
                    warn!(vmid = %vm_id, "VM reports running but is unreachable");
                }
            }
        }

        info!(vmid = %vm_id, reachable = observed.reachable, "Verified VM running");
        Ok(observed)
    }

    /// The VM must report stopped; reachability is not a failure signal.
    pub async fn verify_stopped(&self, vm_id: VmId) -> Result<Observation, VerificationError> {
        let observed = self.observe(vm_id).await?;

        if observed.status != VmStatus::Stopped {
            return Err(VerificationError::StatusMismatch {
                vm_id,
                expected: VmStatus::Stopped,
                actual: observed.status,
            });
        }

        info!(vmid = %vm_id, reachable = observed.reachable, "Verified VM stopped");
        Ok(observed)
    }

    async fn observe(&self, vm_id: VmId) -> Result<Observation, VerificationError> {
        let probe = |source| VerificationError::Probe { vm_id, source };

        let reachable = self.service.ping_vm(vm_id).await.map_err(probe)?;
        let status = self.service.vm_status(vm_id).await.map_err(probe)?;

        debug!(vmid = %vm_id, status = %status, reachable, "Observed VM");
        Ok(Observation { status, reachable })
    }
}
