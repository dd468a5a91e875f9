//! HTTP client for the Proxmox VE API.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, COOKIE};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use vmlab_harness::{ClusterService, ImageDownload, ServiceError, VmOptions, VmStatus};
use vmlab_id::{Upid, VmId};
use vmlab_tasks::TaskStatus;

use crate::config::{AuthMode, Config};
use crate::error::ApiError;

/// Header carrying the CSRF token on mutating ticket-authenticated requests.
const CSRF_HEADER: &str = "CSRFPreventionToken";

/// Per-request timeout. Long operations run as tasks, so requests are short.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Proxmox VE API client bound to one node.
pub struct ProxmoxClient {
    http: reqwest::Client,
    config: Config,
    session: Mutex<Option<Session>>,
}

#[derive(Clone)]
struct Session {
    ticket: String,
    csrf_token: String,
}

/// Every response body is wrapped in `{"data": ...}`.
#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct TicketData {
    ticket: String,
    #[serde(rename = "CSRFPreventionToken")]
    csrf_token: String,
}

#[derive(Debug, Deserialize)]
struct TaskStatusData {
    status: String,
    #[serde(default)]
    exitstatus: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VmStatusData {
    status: String,
    #[serde(default)]
    lock: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    errors: Option<BTreeMap<String, String>>,
}

impl ProxmoxClient {
    /// Create a client. Ticket logins happen lazily on the first request.
    pub fn new(config: Config) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        if config.auth_mode() == AuthMode::ApiToken {
            let mut value = HeaderValue::from_str(&format!(
                "PVEAPIToken={}={}",
                config.username,
                config.password.expose()
            ))
            .map_err(|_| ApiError::Auth("API token contains invalid characters".to_string()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        if config.insecure_tls {
            warn!(url = %config.url, "TLS certificate verification disabled");
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(config.insecure_tls)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            config,
            session: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Obtain a fresh ticket with the configured password.
    pub async fn login(&self) -> Result<(), ApiError> {
        let session = self.request_ticket().await?;
        *self.session.lock().await = Some(session);
        Ok(())
    }

    async fn request_ticket(&self) -> Result<Session, ApiError> {
        debug!(username = %self.config.username, "Requesting API ticket");

        let response = self
            .http
            .post(self.config.endpoint("access/ticket"))
            .form(&[
                ("username", self.config.username.as_str()),
                ("password", self.config.password.expose()),
            ])
            .send()
            .await?;

        let ticket: TicketData = match Self::handle_response(response).await {
            Ok(ticket) => ticket,
            Err(ApiError::Api { status: 401, message }) => return Err(ApiError::Auth(message)),
            Err(e) => return Err(e),
        };

        info!(username = %self.config.username, "Logged in to Proxmox VE");
        Ok(Session {
            ticket: ticket.ticket,
            csrf_token: ticket.csrf_token,
        })
    }

    /// Current ticket session, logging in first if needed. `None` for token
    /// auth.
    async fn session(&self) -> Result<Option<Session>, ApiError> {
        if self.config.auth_mode() == AuthMode::ApiToken {
            return Ok(None);
        }

        let mut session = self.session.lock().await;
        if session.is_none() {
            *session = Some(self.request_ticket().await?);
        }
        Ok(session.clone())
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(Method::GET, path, &[]).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(String, String)],
    ) -> Result<T, ApiError> {
        self.send(Method::POST, path, form).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        form: &[(String, String)],
    ) -> Result<T, ApiError> {
        let mut request = self
            .http
            .request(method.clone(), self.config.endpoint(path));

        if let Some(session) = self.session().await? {
            request = request.header(COOKIE, format!("PVEAuthCookie={}", session.ticket));
            if method != Method::GET {
                request = request.header(CSRF_HEADER, session.csrf_token.as_str());
            }
        }

        if method != Method::GET {
            request = request.form(form);
        }

        debug!(method = %method, path = path, fields = form.len(), "Proxmox API request");

        let response = request.send().await?;
        Self::handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            let envelope: Envelope<T> = serde_json::from_str(&body)
                .map_err(|e| ApiError::Decode(format!("{e}: {body}")))?;
            return Ok(envelope.data);
        }

        let message = error_message(&body)
            .or_else(|| status.canonical_reason().map(str::to_string))
            .unwrap_or_else(|| "unknown error".to_string());

        debug!(status = status.as_u16(), message = %message, "Proxmox API error");
        Err(ApiError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn vm_status_data(&self, id: VmId) -> Result<VmStatusData, ApiError> {
        self.get(&format!(
            "nodes/{}/qemu/{}/status/current",
            self.config.node, id
        ))
        .await
    }

    async fn vm_action(&self, id: VmId, action: &str) -> Result<Upid, ServiceError> {
        let path = format!("nodes/{}/qemu/{}/status/{}", self.config.node, id, action);
        Ok(self.post(&path, &[]).await?)
    }
}

/// Message and per-parameter errors from an error body.
fn error_message(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let mut message = parsed
        .message
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty());

    if let Some(errors) = parsed.errors.filter(|e| !e.is_empty()) {
        let detail = errors
            .iter()
            .map(|(param, error)| format!("{param}: {}", error.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        message = Some(match message {
            Some(m) => format!("{m} ({detail})"),
            None => detail,
        });
    }

    message
}

/// Map a task status record. `WARNINGS: n` counts as success.
fn task_status(data: TaskStatusData) -> Result<TaskStatus, ApiError> {
    match data.status.as_str() {
        "running" => Ok(TaskStatus::Pending),
        "stopped" => match data.exitstatus.as_deref() {
            Some("OK") => Ok(TaskStatus::Success),
            Some(exit) if exit.starts_with("WARNINGS") => Ok(TaskStatus::Success),
            Some(exit) => Ok(TaskStatus::Failure(exit.to_string())),
            None => Ok(TaskStatus::Failure(
                "task stopped without exit status".to_string(),
            )),
        },
        other => Err(ApiError::Decode(format!("unknown task status '{other}'"))),
    }
}

/// Map a VM status record. A held lock means an operation is still applying.
fn vm_status(data: VmStatusData) -> Result<VmStatus, ApiError> {
    if data.lock.is_some() {
        return Ok(VmStatus::Provisioning);
    }

    match data.status.as_str() {
        "running" => Ok(VmStatus::Running),
        "stopped" => Ok(VmStatus::Stopped),
        other => Err(ApiError::Decode(format!("unknown VM status '{other}'"))),
    }
}

#[async_trait]
impl ClusterService for ProxmoxClient {
    async fn next_id(&self) -> Result<VmId, ServiceError> {
        let id: VmId = self.get("cluster/nextid").await?;
        debug!(vmid = %id, "Cluster returned next id");
        Ok(id)
    }

    async fn create_vm(&self, id: VmId, options: &VmOptions) -> Result<Upid, ServiceError> {
        let mut form = vec![("vmid".to_string(), id.to_string())];
        form.extend(options.to_form());

        let path = format!("nodes/{}/qemu", self.config.node);
        Ok(self.post(&path, &form).await?)
    }

    async fn configure_vm(&self, id: VmId, options: &VmOptions) -> Result<Upid, ServiceError> {
        let path = format!("nodes/{}/qemu/{}/config", self.config.node, id);
        Ok(self.post(&path, &options.to_form()).await?)
    }

    async fn start_vm(&self, id: VmId) -> Result<Upid, ServiceError> {
        self.vm_action(id, "start").await
    }

    async fn stop_vm(&self, id: VmId) -> Result<Upid, ServiceError> {
        self.vm_action(id, "stop").await
    }

    async fn task_status(&self, task: &Upid) -> Result<TaskStatus, ServiceError> {
        let path = format!("nodes/{}/tasks/{}/status", task.node(), task);
        let data: TaskStatusData = self.get(&path).await?;
        Ok(task_status(data)?)
    }

    async fn vm_status(&self, id: VmId) -> Result<VmStatus, ServiceError> {
        match self.vm_status_data(id).await {
            Ok(data) => Ok(vm_status(data)?),
            Err(e) if e.is_not_found() => Ok(VmStatus::Absent),
            Err(e) => Err(e.into()),
        }
    }

    /// Re-reads `status/current`, so a VM that reports a status also answers
    /// the probe. A running-but-unreachable verdict is only possible here if
    /// the VM disappears between the two reads.
    async fn ping_vm(&self, id: VmId) -> Result<bool, ServiceError> {
        match self.vm_status_data(id).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn download_image(&self, request: &ImageDownload) -> Result<Upid, ServiceError> {
        let path = format!(
            "nodes/{}/storage/{}/download-url",
            self.config.node, request.storage
        );
        let form = [
            ("content".to_string(), "import".to_string()),
            ("filename".to_string(), request.filename.clone()),
            ("url".to_string(), request.url.clone()),
        ];
        Ok(self.post(&path, &form).await?)
    }
}
