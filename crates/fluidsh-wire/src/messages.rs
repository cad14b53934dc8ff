//! The Host<->CP message envelopes (§6).
//!
//! A [`HostMessage`] carries a host-originated payload — responses and
//! async reports. A [`ControlMessage`] carries a CP-originated command.
//! Every command/response pair shares a [`RequestId`].

use fluidsh_types::{HostId, RequestId, SandboxId};
use serde::{Deserialize, Serialize};

/// Envelope for every message a host sends upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostMessage {
    pub request_id: RequestId,
    pub payload: HostPayload,
}

/// Envelope for every message the control plane sends to a host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlMessage {
    pub request_id: RequestId,
    pub payload: ControlPayload,
}

/// Resource figures a host advertises at registration and on every
/// heartbeat (§3 Host entity, §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSnapshotWire {
    pub available_cpus: u32,
    pub available_memory_mb: u32,
    pub active_sandboxes: u32,
}

/// Host-originated payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HostPayload {
    Registration {
        host_id: Option<HostId>,
        hostname: String,
        version: String,
        advertised_images: Vec<String>,
        source_vms: Vec<String>,
        resources: ResourceSnapshotWire,
    },
    RegistrationAck {
        accepted: bool,
        assigned_host_id: Option<HostId>,
        reason: Option<String>,
    },
    Heartbeat {
        available_cpus: u32,
        active_sandboxes: u32,
        source_vm_count: u32,
    },
    SandboxCreated {
        sandbox_id: SandboxId,
        mac: String,
        tap_name: String,
        ip: Option<String>,
    },
    SandboxStarted {
        sandbox_id: SandboxId,
        ip: Option<String>,
    },
    SandboxStopped {
        sandbox_id: SandboxId,
    },
    SandboxDestroyed {
        sandbox_id: SandboxId,
    },
    CommandResult {
        sandbox_id: SandboxId,
        stdout: String,
        stderr: String,
        exit_code: i32,
        duration_ms: u64,
    },
    SnapshotCreated {
        sandbox_id: SandboxId,
        snapshot_name: String,
    },
    SourceVmsList {
        names: Vec<String>,
    },
    SourceVmValidation {
        accepted: bool,
        reason: Option<String>,
    },
    SourceVmPrepared {
        name: String,
        ca_fingerprint: String,
    },
    SourceCommandResult {
        stdout: String,
        stderr: String,
        exit_code: i32,
        duration_ms: u64,
    },
    SourceFileResult {
        contents: Vec<u8>,
    },
    DiscoverHostsResult {
        hosts: Vec<HostId>,
    },
    ErrorReport {
        kind: ErrorKind,
        message: String,
    },
}

/// Command payloads the control plane sends to a host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlPayload {
    CreateSandbox {
        agent_id: fluidsh_types::AgentId,
        base_image: Option<String>,
        source_vm: Option<String>,
        name: String,
        vcpu: u32,
        memory_mb: u32,
        ttl_seconds: u64,
    },
    StartSandbox {
        sandbox_id: SandboxId,
    },
    StopSandbox {
        sandbox_id: SandboxId,
        force: bool,
    },
    DestroySandbox {
        sandbox_id: SandboxId,
    },
    RunCommand {
        sandbox_id: SandboxId,
        command: String,
        timeout_secs: u64,
    },
    SnapshotSandbox {
        sandbox_id: SandboxId,
        snapshot_name: String,
    },
    ListSourceVms,
    ValidateSourceCommand {
        vm_name: String,
        command: String,
    },
    PrepareSourceVm {
        vm_name: String,
    },
    RunSourceCommand {
        vm_name: String,
        command: String,
        timeout_secs: u64,
    },
    ReadSourceFile {
        vm_name: String,
        path: String,
    },
    DiscoverHosts,
}

/// Error kinds surfaced by a host in an `ErrorReport` (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    TransientTransport,
    PlacementExhausted,
    HostError,
    Validation,
    Timeout,
    Fatal,
}
