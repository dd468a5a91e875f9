//! Provisioner: submits lifecycle operations and hands back task handles.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};
use vmlab_id::{Upid, VmId};
use vmlab_tasks::{StatusSource, TaskStatus, WaitPolicy};

use crate::config::FlowTimings;
use crate::service::{ClusterService, ImageDownload, ServiceError, TaskKind, VmOptions};

/// The service refused a request synchronously.
#[derive(Debug, Error)]
#[error("{kind} request for {target} rejected: {source}")]
pub struct SubmissionError {
    pub kind: TaskKind,
    pub target: String,
    #[source]
    pub source: ServiceError,
}

/// An in-flight remote operation.
///
/// Owned by the step that submitted it; its status is only ever observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Remote handle.
    pub upid: Upid,

    /// What the task does.
    pub kind: TaskKind,

    /// VM the task targets (none for image downloads).
    pub vm_id: Option<VmId>,

    /// When the request was accepted.
    pub submitted_at: DateTime<Utc>,

    /// Poll interval and deadline to wait with.
    pub policy: WaitPolicy,
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.upid, self.kind)
    }
}

/// Adapts a [`ClusterService`] into a status source for [`Task`]s and bare
/// task ids.
pub struct TaskProbe<'a, S: ?Sized>(pub &'a S);

#[async_trait]
impl<S> StatusSource<Upid> for TaskProbe<'_, S>
where
    S: ClusterService + ?Sized,
{
    type Error = ServiceError;

    async fn task_status(&self, upid: &Upid) -> Result<TaskStatus, ServiceError> {
        self.0.task_status(upid).await
    }
}

#[async_trait]
impl<S> StatusSource<Task> for TaskProbe<'_, S>
where
    S: ClusterService + ?Sized,
{
    type Error = ServiceError;

    async fn task_status(&self, task: &Task) -> Result<TaskStatus, ServiceError> {
        self.0.task_status(&task.upid).await
    }
}

/// Submits create / configure / start / stop requests.
///
/// Every call returns as soon as the service accepted the request; waiting
/// is the caller's job.
pub struct Provisioner<S: ?Sized> {
    service: Arc<S>,
    timings: FlowTimings,
}

impl<S> Provisioner<S>
where
    S: ClusterService + ?Sized,
{
    pub fn new(service: Arc<S>, timings: FlowTimings) -> Self {
        Self { service, timings }
    }

    /// Submit creation of VM `id` with initial `options` (typically the name).
    pub async fn create(&self, id: VmId, options: &VmOptions) -> Result<Task, SubmissionError> {
        info!(vmid = %id, options = options.len(), "Submitting VM create");
        let result = self.service.create_vm(id, options).await;
        self.accept(TaskKind::Create, Some(id), result)
    }

    /// Submit a configuration change for VM `id`.
    pub async fn configure(&self, id: VmId, options: &VmOptions) -> Result<Task, SubmissionError> {
        info!(vmid = %id, options = options.len(), "Submitting VM configure");
        let result = self.service.configure_vm(id, options).await;
        self.accept(TaskKind::Configure, Some(id), result)
    }

    /// Submit a start of VM `id`.
    pub async fn start(&self, id: VmId) -> Result<Task, SubmissionError> {
        info!(vmid = %id, "Submitting VM start");
        let result = self.service.start_vm(id).await;
        self.accept(TaskKind::Start, Some(id), result)
    }

    /// Submit a stop of VM `id`.
    pub async fn stop(&self, id: VmId) -> Result<Task, SubmissionError> {
        info!(vmid = %id, "Submitting VM stop");
        let result = self.service.stop_vm(id).await;
        self.accept(TaskKind::Stop, Some(id), result)
    }

    /// Submit a disk image download.
    pub async fn download(&self, request: &ImageDownload) -> Result<Task, SubmissionError> {
        info!(
            storage = %request.storage,
            url = %request.url,
            filename = %request.filename,
            "Submitting image download"
        );
        let result = self.service.download_image(request).await;
        self.accept(TaskKind::Download, None, result)
    }

    fn accept(
        &self,
        kind: TaskKind,
        vm_id: Option<VmId>,
        result: Result<Upid, ServiceError>,
    ) -> Result<Task, SubmissionError> {
        let upid = result.map_err(|source| SubmissionError {
            kind,
            target: vm_id.map_or_else(|| "image".to_string(), |id| format!("VM {id}")),
            source,
        })?;

        debug!(upid = %upid, kind = %kind, "Request accepted");

        Ok(Task {
            upid,
            kind,
            vm_id,
            submitted_at: Utc::now(),
            policy: self.timings.policy(kind),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::fake::FakeCluster;

    fn provisioner(cluster: &Arc<FakeCluster>) -> Provisioner<FakeCluster> {
        Provisioner::new(Arc::clone(cluster), FlowTimings::default())
    }

    #[tokio::test]
    async fn test_create_returns_task_with_policy() {
        let cluster = Arc::new(FakeCluster::new(142));
        let id = VmId::new(142).unwrap();

        let task = provisioner(&cluster)
            .create(id, &VmOptions::new().with("name", "vmlab-test"))
            .await
            .unwrap();

        assert_eq!(task.kind, TaskKind::Create);
        assert_eq!(task.vm_id, Some(id));
        assert_eq!(task.upid.task_type(), "qmcreate");
        assert_eq!(task.policy.deadline, Duration::from_secs(10));
        assert_eq!(task.policy.poll_interval, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_rejection_is_submission_error() {
        let cluster = Arc::new(FakeCluster::new(142));
        cluster.reject(TaskKind::Start, "VM 142 not running: missing config");
        let id = VmId::new(142).unwrap();
        let provisioner = provisioner(&cluster);
        provisioner.create(id, &VmOptions::new()).await.unwrap();

        let err = provisioner.start(id).await.unwrap_err();

        assert_eq!(err.kind, TaskKind::Start);
        assert_eq!(err.target, "VM 142");
        assert!(matches!(err.source, ServiceError::Rejected { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_submission_does_not_wait() {
        let cluster = Arc::new(FakeCluster::new(142));
        cluster.script(TaskKind::Stop, crate::fake::TaskScript::never());
        let id = VmId::new(142).unwrap();
        let provisioner = provisioner(&cluster);
        provisioner.create(id, &VmOptions::new()).await.unwrap();

        let task = provisioner.stop(id).await.unwrap();

        assert_eq!(cluster.status_queries(&task.upid), 0);
    }

    #[tokio::test]
    async fn test_probe_reads_task_and_bare_upid() {
        let cluster = Arc::new(FakeCluster::new(142));
        cluster.script(TaskKind::Create, crate::fake::TaskScript::succeed_after(1));
        let task = provisioner(&cluster)
            .create(VmId::new(142).unwrap(), &VmOptions::new())
            .await
            .unwrap();

        let probe = TaskProbe(&*cluster);
        assert_eq!(probe.task_status(&task).await.unwrap(), TaskStatus::Pending);
        assert_eq!(
            probe.task_status(&task.upid).await.unwrap(),
            TaskStatus::Success
        );
        assert_eq!(cluster.status_queries(&task.upid), 2);
    }
}
