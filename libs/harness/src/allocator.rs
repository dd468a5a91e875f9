//! Identifier allocation.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;
use vmlab_id::VmId;

use crate::service::{ClusterService, ServiceError};

/// No VM id could be obtained.
#[derive(Debug, Error)]
#[error("VM id allocation failed: {0}")]
pub struct AllocationError(#[source] pub ServiceError);

/// Obtains cluster-unique VM ids.
///
/// Uniqueness under concurrent callers is the cluster's guarantee; the id is
/// only reserved once a create request using it is accepted.
pub struct IdentifierAllocator<S: ?Sized> {
    service: Arc<S>,
}

impl<S> IdentifierAllocator<S>
where
    S: ClusterService + ?Sized,
{
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }

    pub async fn next_id(&self) -> Result<VmId, AllocationError> {
        let id = self.service.next_id().await.map_err(AllocationError)?;
        info!(vmid = %id, "Allocated VM id");
        Ok(id)
    }
}
