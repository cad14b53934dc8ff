//! A REST client for the control plane's `/v1` surface (§6).
//!
//! This is the one supported way to drive Fluid.sh from Rust code that
//! isn't itself the control plane or a host daemon — the CLI
//! (`fluidsh-cli`) is built on exactly this client.

use base64::Engine;
use fluidsh_types::{AgentId, CommandRecord, HostId, HostRecord, Sandbox, SandboxId, SourceVm};
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// Parameters for [`Client::create_sandbox`]. Exactly one of
/// `base_image` or `source_vm` must be set.
#[derive(Debug, Clone)]
pub struct CreateSandboxRequest {
    pub agent_id: AgentId,
    pub base_image: Option<String>,
    pub source_vm: Option<String>,
    pub name: Option<String>,
    pub vcpu: u32,
    pub memory_mb: u32,
    pub ttl_seconds: u64,
}

impl CreateSandboxRequest {
    pub fn new(agent_id: AgentId) -> Self {
        Self {
            agent_id,
            base_image: None,
            source_vm: None,
            name: None,
            vcpu: 2,
            memory_mb: 2048,
            ttl_seconds: 3600,
        }
    }

    #[must_use]
    pub fn base_image(mut self, image: impl Into<String>) -> Self {
        self.base_image = Some(image.into());
        self
    }

    #[must_use]
    pub fn source_vm(mut self, vm: impl Into<String>) -> Self {
        self.source_vm = Some(vm.into());
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn vcpu(mut self, vcpu: u32) -> Self {
        self.vcpu = vcpu;
        self
    }

    #[must_use]
    pub fn memory_mb(mut self, memory_mb: u32) -> Self {
        self.memory_mb = memory_mb;
        self
    }

    #[must_use]
    pub fn ttl_seconds(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }
}

/// The outcome of a read-only command run against a source VM, as
/// opposed to a [`CommandRecord`] (which is persisted against a
/// sandbox).
#[derive(Debug, Clone, Deserialize)]
pub struct SourceCommandOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

/// A client bound to one control plane's REST address.
///
/// Cheap to clone: it wraps a pooled [`reqwest::Client`].
#[derive(Clone)]
pub struct Client {
    base_url: String,
    http: reqwest::Client,
}

impl Client {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn check(resp: reqwest::Response) -> ClientResult<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let message = resp
            .json::<ErrorBody>()
            .await
            .map(|b| b.error)
            .unwrap_or_else(|_| status.to_string());
        Err(ClientError::Api { status, message })
    }

    async fn decode<T: for<'de> Deserialize<'de>>(resp: reqwest::Response) -> ClientResult<T> {
        resp.json().await.map_err(|e| ClientError::Decode(e.to_string()))
    }

    pub async fn create_sandbox(&self, req: CreateSandboxRequest) -> ClientResult<Sandbox> {
        let body = CreateSandboxBody {
            agent_id: req.agent_id,
            base_image: req.base_image,
            source_vm: req.source_vm,
            name: req.name,
            vcpu: req.vcpu,
            memory_mb: req.memory_mb,
            ttl_seconds: req.ttl_seconds,
        };
        let resp = self.http.post(self.url("/v1/sandboxes")).json(&body).send().await?;
        Self::decode(Self::check(resp).await?).await
    }

    pub async fn list_sandboxes(&self, host_id: Option<HostId>) -> ClientResult<Vec<Sandbox>> {
        let mut req = self.http.get(self.url("/v1/sandboxes"));
        if let Some(host_id) = host_id {
            req = req.query(&[("host_id", host_id.to_string())]);
        }
        let resp = req.send().await?;
        Self::decode(Self::check(resp).await?).await
    }

    pub async fn get_sandbox(&self, id: SandboxId) -> ClientResult<Sandbox> {
        let resp = self.http.get(self.url(&format!("/v1/sandboxes/{}", id.as_uuid()))).send().await?;
        Self::decode(Self::check(resp).await?).await
    }

    pub async fn destroy_sandbox(&self, id: SandboxId) -> ClientResult<()> {
        let resp = self.http.delete(self.url(&format!("/v1/sandboxes/{}", id.as_uuid()))).send().await?;
        Self::check(resp).await?;
        Ok(())
    }

    pub async fn start_sandbox(&self, id: SandboxId) -> ClientResult<Sandbox> {
        let resp = self.http.post(self.url(&format!("/v1/sandboxes/{}/start", id.as_uuid()))).send().await?;
        Self::decode(Self::check(resp).await?).await
    }

    pub async fn stop_sandbox(&self, id: SandboxId, force: bool) -> ClientResult<Sandbox> {
        let resp = self
            .http
            .post(self.url(&format!("/v1/sandboxes/{}/stop", id.as_uuid())))
            .json(&StopSandboxBody { force })
            .send()
            .await?;
        Self::decode(Self::check(resp).await?).await
    }

    pub async fn run_command(&self, id: SandboxId, command: impl Into<String>, timeout_secs: u64) -> ClientResult<CommandRecord> {
        let resp = self
            .http
            .post(self.url(&format!("/v1/sandboxes/{}/run", id.as_uuid())))
            .json(&RunCommandBody { command: command.into(), timeout_secs })
            .send()
            .await?;
        Self::decode(Self::check(resp).await?).await
    }

    pub async fn snapshot_sandbox(&self, id: SandboxId, snapshot_name: impl Into<String>) -> ClientResult<String> {
        let resp = self
            .http
            .post(self.url(&format!("/v1/sandboxes/{}/snapshot", id.as_uuid())))
            .json(&SnapshotBody { snapshot_name: snapshot_name.into() })
            .send()
            .await?;
        let body: SnapshotResponse = Self::decode(Self::check(resp).await?).await?;
        Ok(body.snapshot_name)
    }

    pub async fn get_ip(&self, id: SandboxId) -> ClientResult<String> {
        let resp = self.http.get(self.url(&format!("/v1/sandboxes/{}/ip", id.as_uuid()))).send().await?;
        let body: IpResponse = Self::decode(Self::check(resp).await?).await?;
        Ok(body.ip)
    }

    pub async fn list_commands(&self, id: SandboxId) -> ClientResult<Vec<CommandRecord>> {
        let resp = self.http.get(self.url(&format!("/v1/sandboxes/{}/commands", id.as_uuid()))).send().await?;
        Self::decode(Self::check(resp).await?).await
    }

    pub async fn list_hosts(&self) -> ClientResult<Vec<HostRecord>> {
        let resp = self.http.get(self.url("/v1/hosts")).send().await?;
        Self::decode(Self::check(resp).await?).await
    }

    pub async fn get_host(&self, id: HostId) -> ClientResult<HostRecord> {
        let resp = self.http.get(self.url(&format!("/v1/hosts/{}", id.as_uuid()))).send().await?;
        Self::decode(Self::check(resp).await?).await
    }

    pub async fn list_vms(&self) -> ClientResult<Vec<String>> {
        let resp = self.http.get(self.url("/v1/vms")).send().await?;
        Self::decode(Self::check(resp).await?).await
    }

    pub async fn prepare_source_vm(&self, vm: &str) -> ClientResult<SourceVm> {
        let resp = self.http.post(self.url(&format!("/v1/sources/{vm}/prepare"))).send().await?;
        Self::decode(Self::check(resp).await?).await
    }

    pub async fn validate_source_command(&self, vm: &str, command: impl Into<String>) -> ClientResult<()> {
        let resp = self
            .http
            .post(self.url(&format!("/v1/sources/{vm}/validate")))
            .json(&SourceCommandBody { command: command.into(), timeout_secs: 300 })
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    pub async fn run_source_command(
        &self,
        vm: &str,
        command: impl Into<String>,
        timeout_secs: u64,
    ) -> ClientResult<SourceCommandOutcome> {
        let resp = self
            .http
            .post(self.url(&format!("/v1/sources/{vm}/run")))
            .json(&SourceCommandBody { command: command.into(), timeout_secs })
            .send()
            .await?;
        Self::decode(Self::check(resp).await?).await
    }

    pub async fn read_source_file(&self, vm: &str, path: &str) -> ClientResult<Vec<u8>> {
        let resp = self
            .http
            .post(self.url(&format!("/v1/sources/{vm}/read")))
            .json(&ReadFileBody { path: path.to_string() })
            .send()
            .await?;
        let body: ReadFileResponse = Self::decode(Self::check(resp).await?).await?;
        base64::engine::general_purpose::STANDARD
            .decode(body.contents_base64)
            .map_err(|e| ClientError::Decode(e.to_string()))
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Serialize)]
struct CreateSandboxBody {
    agent_id: AgentId,
    base_image: Option<String>,
    source_vm: Option<String>,
    name: Option<String>,
    vcpu: u32,
    memory_mb: u32,
    ttl_seconds: u64,
}

#[derive(Serialize)]
struct StopSandboxBody {
    force: bool,
}

#[derive(Serialize)]
struct RunCommandBody {
    command: String,
    timeout_secs: u64,
}

#[derive(Serialize)]
struct SnapshotBody {
    snapshot_name: String,
}

#[derive(Deserialize)]
struct SnapshotResponse {
    snapshot_name: String,
}

#[derive(Deserialize)]
struct IpResponse {
    ip: String,
}

#[derive(Serialize)]
struct SourceCommandBody {
    command: String,
    timeout_secs: u64,
}

#[derive(Serialize)]
struct ReadFileBody {
    path: String,
}

#[derive(Deserialize)]
struct ReadFileResponse {
    contents_base64: String,
}
