//! In-memory cluster for tests and dry runs.
//!
//! Tasks complete according to a per-kind [`TaskScript`]: a number of pending
//! polls followed by a terminal outcome. Side effects on the VM (status,
//! options) are applied when the terminal status is first observed, which
//! mirrors how the real cluster only changes state once a worker finishes.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;
use vmlab_id::{Upid, VmId};
use vmlab_tasks::TaskStatus;

use crate::service::{ClusterService, ImageDownload, ServiceError, TaskKind, VmOptions, VmStatus};

/// How tasks of one kind behave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskScript {
    /// Pending observations before the outcome is reported.
    pub pending_polls: u32,

    /// Terminal status, or `None` to stay pending forever.
    pub outcome: Option<TaskStatus>,
}

impl TaskScript {
    /// Succeed on the first status query.
    pub fn immediate() -> Self {
        Self::succeed_after(0)
    }

    /// Report pending `pending_polls` times, then success.
    pub fn succeed_after(pending_polls: u32) -> Self {
        Self {
            pending_polls,
            outcome: Some(TaskStatus::Success),
        }
    }

    /// Report pending `pending_polls` times, then failure with `detail`.
    pub fn fail_after(pending_polls: u32, detail: impl Into<String>) -> Self {
        Self {
            pending_polls,
            outcome: Some(TaskStatus::Failure(detail.into())),
        }
    }

    /// Never finish.
    pub fn never() -> Self {
        Self {
            pending_polls: 0,
            outcome: None,
        }
    }
}

impl Default for TaskScript {
    fn default() -> Self {
        Self::immediate()
    }
}

#[derive(Debug)]
struct FakeVm {
    status: VmStatus,
    options: VmOptions,
}

#[derive(Debug)]
struct FakeTask {
    kind: TaskKind,
    vm_id: Option<VmId>,
    script: TaskScript,
    pending_options: VmOptions,
    queries: u32,
    settled: bool,
}

#[derive(Debug, Default)]
struct FakeState {
    next_id: Option<u32>,
    vms: BTreeMap<VmId, FakeVm>,
    tasks: HashMap<String, FakeTask>,
    scripts: HashMap<TaskKind, TaskScript>,
    rejections: HashMap<TaskKind, String>,
    unreachable: bool,
    images: Vec<ImageDownload>,
    submitted: Vec<(TaskKind, Option<VmId>)>,
    pid: u32,
}

/// Scriptable in-memory [`ClusterService`].
#[derive(Debug)]
pub struct FakeCluster {
    node: String,
    state: Mutex<FakeState>,
}

impl FakeCluster {
    /// Cluster whose next free id is `next_id`.
    pub fn new(next_id: u32) -> Self {
        Self {
            node: "fake".to_string(),
            state: Mutex::new(FakeState {
                next_id: Some(next_id),
                ..Default::default()
            }),
        }
    }

    /// Cluster that cannot hand out ids.
    pub fn exhausted() -> Self {
        Self {
            node: "fake".to_string(),
            state: Mutex::new(FakeState::default()),
        }
    }

    /// Use `script` for tasks of `kind` submitted from now on.
    pub fn script(&self, kind: TaskKind, script: TaskScript) {
        self.lock().scripts.insert(kind, script);
    }

    /// Synchronously reject requests of `kind`.
    pub fn reject(&self, kind: TaskKind, message: impl Into<String>) {
        self.lock().rejections.insert(kind, message.into());
    }

    /// Make every VM fail the reachability probe.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Force the reported status of an existing VM.
    pub fn force_status(&self, id: VmId, status: VmStatus) {
        if let Some(vm) = self.lock().vms.get_mut(&id) {
            vm.status = status;
        }
    }

    /// Status queries issued for `task` so far.
    pub fn status_queries(&self, task: &Upid) -> u32 {
        self.lock()
            .tasks
            .get(task.as_str())
            .map_or(0, |t| t.queries)
    }

    /// Every accepted request, in order.
    pub fn submitted(&self) -> Vec<(TaskKind, Option<VmId>)> {
        self.lock().submitted.clone()
    }

    /// Options currently applied to `id`.
    pub fn options(&self, id: VmId) -> Option<VmOptions> {
        self.lock().vms.get(&id).map(|vm| vm.options.clone())
    }

    /// Images downloaded so far.
    pub fn images(&self) -> Vec<ImageDownload> {
        self.lock().images.clone()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn submit(
        &self,
        state: &mut FakeState,
        kind: TaskKind,
        vm_id: Option<VmId>,
        pending_options: VmOptions,
    ) -> Result<Upid, ServiceError> {
        if let Some(message) = state.rejections.get(&kind) {
            return Err(ServiceError::Rejected {
                status: 400,
                message: message.clone(),
            });
        }

        state.pid += 1;
        let raw = format!(
            "UPID:{}:{:08X}:00000000:{:08X}:{}:{}:root@pam:",
            self.node,
            state.pid,
            state.pid,
            kind.worker_type(),
            vm_id.map(|id| id.to_string()).unwrap_or_default(),
        );
        let upid = Upid::parse(&raw).map_err(|e| ServiceError::Protocol(e.to_string()))?;

        let script = state.scripts.get(&kind).cloned().unwrap_or_default();
        state.tasks.insert(
            raw,
            FakeTask {
                kind,
                vm_id,
                script,
                pending_options,
                queries: 0,
                settled: false,
            },
        );
        state.submitted.push((kind, vm_id));

        debug!(upid = %upid, kind = %kind, "[FAKE] Task submitted");
        Ok(upid)
    }

    fn require_vm(state: &FakeState, id: VmId) -> Result<(), ServiceError> {
        if state.vms.contains_key(&id) {
            Ok(())
        } else {
            Err(ServiceError::NotFound(format!(
                "configuration file 'nodes/fake/qemu-server/{id}.conf' does not exist"
            )))
        }
    }
}

/// Apply the side effects of a task that just reached `status`.
fn settle(vms: &mut BTreeMap<VmId, FakeVm>, task: &FakeTask, status: &TaskStatus) {
    let Some(vm) = task.vm_id.and_then(|id| vms.get_mut(&id)) else {
        return;
    };

    match (task.kind, status) {
        (TaskKind::Create, TaskStatus::Failure(_)) => vm.status = VmStatus::Failed,
        (TaskKind::Configure, TaskStatus::Success) => vm.options.merge(&task.pending_options),
        (TaskKind::Start, TaskStatus::Success) => vm.status = VmStatus::Running,
        (TaskKind::Stop, TaskStatus::Success) => vm.status = VmStatus::Stopped,
        _ => {}
    }
}

#[async_trait]
impl ClusterService for FakeCluster {
    async fn next_id(&self) -> Result<VmId, ServiceError> {
        let mut state = self.lock();
        let Some(next) = state.next_id else {
            return Err(ServiceError::Exhausted("no free VM id".to_string()));
        };

        let id = VmId::new(next).map_err(|e| ServiceError::Exhausted(e.to_string()))?;
        state.next_id = next.checked_add(1);
        Ok(id)
    }

    async fn create_vm(&self, id: VmId, options: &VmOptions) -> Result<Upid, ServiceError> {
        let mut state = self.lock();
        if state.vms.contains_key(&id) {
            return Err(ServiceError::Rejected {
                status: 500,
                message: format!("VM {id} already exists"),
            });
        }

        let upid = self.submit(&mut state, TaskKind::Create, Some(id), VmOptions::new())?;
        state.vms.insert(
            id,
            FakeVm {
                status: VmStatus::Provisioning,
                options: options.clone(),
            },
        );
        Ok(upid)
    }

    async fn configure_vm(&self, id: VmId, options: &VmOptions) -> Result<Upid, ServiceError> {
        let mut state = self.lock();
        Self::require_vm(&state, id)?;
        self.submit(&mut state, TaskKind::Configure, Some(id), options.clone())
    }

    async fn start_vm(&self, id: VmId) -> Result<Upid, ServiceError> {
        let mut state = self.lock();
        Self::require_vm(&state, id)?;
        self.submit(&mut state, TaskKind::Start, Some(id), VmOptions::new())
    }

    async fn stop_vm(&self, id: VmId) -> Result<Upid, ServiceError> {
        let mut state = self.lock();
        Self::require_vm(&state, id)?;
        self.submit(&mut state, TaskKind::Stop, Some(id), VmOptions::new())
    }

    async fn task_status(&self, task: &Upid) -> Result<TaskStatus, ServiceError> {
        let mut state = self.lock();
        let FakeState { tasks, vms, .. } = &mut *state;

        let Some(entry) = tasks.get_mut(task.as_str()) else {
            return Err(ServiceError::NotFound(format!("no such task '{task}'")));
        };
        entry.queries += 1;

        let status = match &entry.script.outcome {
            Some(outcome) if entry.queries > entry.script.pending_polls => outcome.clone(),
            _ => TaskStatus::Pending,
        };

        if status.is_terminal() && !entry.settled {
            entry.settled = true;
            settle(vms, entry, &status);
        }

        Ok(status)
    }

    async fn vm_status(&self, id: VmId) -> Result<VmStatus, ServiceError> {
        Ok(self
            .lock()
            .vms
            .get(&id)
            .map_or(VmStatus::Absent, |vm| vm.status))
    }

    async fn ping_vm(&self, id: VmId) -> Result<bool, ServiceError> {
        let state = self.lock();
        Ok(!state.unreachable && state.vms.contains_key(&id))
    }

    async fn download_image(&self, request: &ImageDownload) -> Result<Upid, ServiceError> {
        let mut state = self.lock();
        let upid = self.submit(&mut state, TaskKind::Download, None, VmOptions::new())?;
        state.images.push(request.clone());
        Ok(upid)
    }
}
