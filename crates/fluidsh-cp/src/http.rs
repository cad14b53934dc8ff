//! The control plane's REST boundary (§6 "CP REST surface (boundary
//! only; handlers delegate to the orchestrator)"). Every handler here
//! does request/response shaping only — placement, `SendAndWait`, and
//! persistence all live in [`crate::orchestrator::Orchestrator`].

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use base64::Engine;
use fluidsh_types::{AgentId, HostId, SandboxId};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::error::CpResult;
use crate::orchestrator::{CreateSandboxParams, Orchestrator};

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/v1/sandboxes", post(create_sandbox).get(list_sandboxes))
        .route("/v1/sandboxes/{id}", get(get_sandbox).delete(destroy_sandbox))
        .route("/v1/sandboxes/{id}/start", post(start_sandbox))
        .route("/v1/sandboxes/{id}/stop", post(stop_sandbox))
        .route("/v1/sandboxes/{id}/run", post(run_command))
        .route("/v1/sandboxes/{id}/snapshot", post(snapshot_sandbox))
        .route("/v1/sandboxes/{id}/ip", get(get_ip))
        .route("/v1/sandboxes/{id}/commands", get(list_commands))
        .route("/v1/hosts", get(list_hosts))
        .route("/v1/hosts/{id}", get(get_host))
        .route("/v1/vms", get(list_vms))
        .route("/v1/sources/{vm}/prepare", post(prepare_source_vm))
        .route("/v1/sources/{vm}/validate", post(validate_source_command))
        .route("/v1/sources/{vm}/run", post(run_source_command))
        .route("/v1/sources/{vm}/read", post(read_source_file))
        .layer(TraceLayer::new_for_http())
        .with_state(orchestrator)
}

#[derive(Deserialize)]
struct CreateSandboxBody {
    agent_id: AgentId,
    base_image: Option<String>,
    source_vm: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default = "default_vcpu")]
    vcpu: u32,
    #[serde(default = "default_memory_mb")]
    memory_mb: u32,
    #[serde(default = "default_ttl_seconds")]
    ttl_seconds: u64,
}

fn default_vcpu() -> u32 {
    2
}
fn default_memory_mb() -> u32 {
    2048
}
fn default_ttl_seconds() -> u64 {
    3600
}

async fn create_sandbox(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(body): Json<CreateSandboxBody>,
) -> CpResult<Json<fluidsh_types::Sandbox>> {
    let name = body.name.unwrap_or_else(|| format!("sbx-{}", body.agent_id));
    let sandbox = orchestrator
        .create_sandbox(CreateSandboxParams {
            agent_id: body.agent_id,
            base_image: body.base_image,
            source_vm: body.source_vm,
            name,
            vcpu: body.vcpu,
            memory_mb: body.memory_mb,
            ttl_seconds: body.ttl_seconds,
        })
        .await?;
    Ok(Json(sandbox))
}

#[derive(Deserialize)]
struct ListSandboxesQuery {
    host_id: Option<HostId>,
}

async fn list_sandboxes(
    State(orchestrator): State<Arc<Orchestrator>>,
    Query(query): Query<ListSandboxesQuery>,
) -> CpResult<Json<Vec<fluidsh_types::Sandbox>>> {
    Ok(Json(orchestrator.list_sandboxes(query.host_id).await?))
}

async fn get_sandbox(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(id): Path<SandboxId>,
) -> CpResult<Json<fluidsh_types::Sandbox>> {
    Ok(Json(orchestrator.get_sandbox(id).await?))
}

async fn destroy_sandbox(State(orchestrator): State<Arc<Orchestrator>>, Path(id): Path<SandboxId>) -> CpResult<()> {
    orchestrator.destroy_sandbox(id).await
}

async fn start_sandbox(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(id): Path<SandboxId>,
) -> CpResult<Json<fluidsh_types::Sandbox>> {
    Ok(Json(orchestrator.start_sandbox(id).await?))
}

#[derive(Deserialize, Default)]
struct StopSandboxBody {
    #[serde(default)]
    force: bool,
}

async fn stop_sandbox(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(id): Path<SandboxId>,
    body: Option<Json<StopSandboxBody>>,
) -> CpResult<Json<fluidsh_types::Sandbox>> {
    let force = body.map(|Json(b)| b.force).unwrap_or_default();
    Ok(Json(orchestrator.stop_sandbox(id, force).await?))
}

#[derive(Deserialize)]
struct RunCommandBody {
    command: String,
    #[serde(default = "default_run_command_timeout_secs")]
    timeout_secs: u64,
}

fn default_run_command_timeout_secs() -> u64 {
    300
}

async fn run_command(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(id): Path<SandboxId>,
    Json(body): Json<RunCommandBody>,
) -> CpResult<Json<fluidsh_types::CommandRecord>> {
    Ok(Json(orchestrator.run_command(id, body.command, body.timeout_secs).await?))
}

#[derive(Deserialize)]
struct SnapshotBody {
    snapshot_name: String,
}

#[derive(Serialize)]
struct SnapshotResponse {
    snapshot_name: String,
}

async fn snapshot_sandbox(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(id): Path<SandboxId>,
    Json(body): Json<SnapshotBody>,
) -> CpResult<Json<SnapshotResponse>> {
    let snapshot_name = orchestrator.snapshot_sandbox(id, body.snapshot_name).await?;
    Ok(Json(SnapshotResponse { snapshot_name }))
}

#[derive(Serialize)]
struct IpResponse {
    ip: String,
}

async fn get_ip(State(orchestrator): State<Arc<Orchestrator>>, Path(id): Path<SandboxId>) -> CpResult<Json<IpResponse>> {
    Ok(Json(IpResponse {
        ip: orchestrator.get_ip(id).await?,
    }))
}

async fn list_commands(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(id): Path<SandboxId>,
) -> CpResult<Json<Vec<fluidsh_types::CommandRecord>>> {
    Ok(Json(orchestrator.list_commands(id).await?))
}

async fn list_hosts(State(orchestrator): State<Arc<Orchestrator>>) -> CpResult<Json<Vec<fluidsh_types::HostRecord>>> {
    Ok(Json(orchestrator.list_hosts().await?))
}

async fn get_host(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(id): Path<HostId>,
) -> CpResult<Json<fluidsh_types::HostRecord>> {
    Ok(Json(orchestrator.get_host(id).await?))
}

async fn list_vms(State(orchestrator): State<Arc<Orchestrator>>) -> CpResult<Json<Vec<String>>> {
    Ok(Json(orchestrator.list_source_vm_names().await?))
}

async fn prepare_source_vm(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(vm): Path<String>,
) -> CpResult<Json<fluidsh_types::SourceVm>> {
    Ok(Json(orchestrator.prepare_source_vm(&vm).await?))
}

#[derive(Deserialize)]
struct SourceCommandBody {
    command: String,
    #[serde(default = "default_run_command_timeout_secs")]
    timeout_secs: u64,
}

async fn validate_source_command(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(vm): Path<String>,
    Json(body): Json<SourceCommandBody>,
) -> CpResult<()> {
    orchestrator.validate_source_command(&vm, body.command).await
}

async fn run_source_command(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(vm): Path<String>,
    Json(body): Json<SourceCommandBody>,
) -> CpResult<Json<crate::orchestrator::SourceCommandOutcome>> {
    Ok(Json(
        orchestrator.run_source_command(&vm, body.command, body.timeout_secs).await?,
    ))
}

#[derive(Deserialize)]
struct ReadFileBody {
    path: String,
}

#[derive(Serialize)]
struct ReadFileResponse {
    /// Base64-encoded file contents — source VM files are not
    /// guaranteed to be valid UTF-8, so the REST boundary encodes
    /// rather than assumes text (§6 "all request and response bodies
    /// are JSON").
    contents_base64: String,
}

async fn read_source_file(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(vm): Path<String>,
    Json(body): Json<ReadFileBody>,
) -> CpResult<Json<ReadFileResponse>> {
    let contents = orchestrator.read_source_file(&vm, &body.path).await?;
    Ok(Json(ReadFileResponse {
        contents_base64: base64::engine::general_purpose::STANDARD.encode(contents),
    }))
}
