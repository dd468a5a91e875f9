//! Cluster VM management service interface.
//!
//! The harness never talks HTTP itself; it drives whatever implements
//! [`ClusterService`]. `vmlab-proxmox` provides the real implementation and
//! [`crate::fake::FakeCluster`] an in-memory one for tests.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vmlab_id::{Upid, VmId};
use vmlab_tasks::TaskStatus;

/// Errors reported by a cluster service call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// The service could not be reached.
    #[error("cluster unreachable: {0}")]
    Unreachable(String),

    /// The service rejected the request synchronously.
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The referenced VM, task, or storage does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// No identifier could be allocated.
    #[error("identifier pool exhausted: {0}")]
    Exhausted(String),

    /// The service answered with something we could not interpret.
    #[error("unexpected response: {0}")]
    Protocol(String),
}

/// Reported status of a VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmStatus {
    /// No VM with this id exists.
    Absent,

    /// The VM exists but is locked by a create or configure operation.
    Provisioning,

    /// The VM is defined and not running.
    Stopped,

    /// The VM is running.
    Running,

    /// The VM is in an error state.
    Failed,
}

impl VmStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Provisioning => "provisioning",
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of asynchronous operation a task represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Create,
    Configure,
    Start,
    Stop,
    Download,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Configure => "configure",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Download => "download",
        }
    }

    /// Worker type Proxmox records in the task handle.
    pub fn worker_type(&self) -> &'static str {
        match self {
            Self::Create => "qmcreate",
            Self::Configure => "qmconfig",
            Self::Start => "qmstart",
            Self::Stop => "qmstop",
            Self::Download => "download",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single VM configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Int(i64),
    Str(String),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Str(v) => f.write_str(v),
        }
    }
}

impl From<i64> for OptionValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for OptionValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for OptionValue {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// VM configuration: option name to value.
///
/// Applied additively; submitting a subset never removes earlier options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VmOptions(BTreeMap<String, OptionValue>);

impl VmOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Set an option, returning the previous value.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<OptionValue>,
    ) -> Option<OptionValue> {
        self.0.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Overlay `other` on top of `self`.
    pub fn merge(&mut self, other: &VmOptions) {
        for (name, value) in &other.0 {
            self.0.insert(name.clone(), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Flatten into `name=value` string pairs for form encoding.
    pub fn to_form(&self) -> Vec<(String, String)> {
        self.0
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect()
    }
}

impl<K, V> FromIterator<(K, V)> for VmOptions
where
    K: Into<String>,
    V: Into<OptionValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Request to fetch a disk image onto node storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDownload {
    /// Storage that receives the file (must allow `import` content).
    pub storage: String,

    /// Source URL.
    pub url: String,

    /// File name on the storage.
    pub filename: String,
}

impl ImageDownload {
    /// Volume id under which the downloaded file can be imported.
    pub fn volume_id(&self) -> String {
        format!("{}:import/{}", self.storage, self.filename)
    }
}

/// Remote VM management service.
#[async_trait]
pub trait ClusterService: Send + Sync {
    /// Allocate a cluster-unique VM id.
    async fn next_id(&self) -> Result<VmId, ServiceError>;

    /// Submit VM creation.
    async fn create_vm(&self, id: VmId, options: &VmOptions) -> Result<Upid, ServiceError>;

    /// Submit a configuration change.
    async fn configure_vm(&self, id: VmId, options: &VmOptions) -> Result<Upid, ServiceError>;

    /// Submit a start.
    async fn start_vm(&self, id: VmId) -> Result<Upid, ServiceError>;

    /// Submit a stop.
    async fn stop_vm(&self, id: VmId) -> Result<Upid, ServiceError>;

    /// Query a task's status.
    async fn task_status(&self, task: &Upid) -> Result<TaskStatus, ServiceError>;

    /// Query a VM's reported status.
    async fn vm_status(&self, id: VmId) -> Result<VmStatus, ServiceError>;

    /// Probe whether the VM answers at all.
    async fn ping_vm(&self, id: VmId) -> Result<bool, ServiceError>;

    /// Submit a download of a disk image onto node storage.
    async fn download_image(&self, request: &ImageDownload) -> Result<Upid, ServiceError>;
}
