//! Translates REST requests into placement decisions and
//! `SendAndWait` calls against the registry, then persists the
//! result (§2 "Data flow for a sandbox operation": client -> CP ->
//! placement -> send-over-stream(HD) -> hypervisor driver ->
//! response-over-stream -> CP -> persist -> reply to client).
//!
//! This is the one module every REST handler in [`crate::http`]
//! delegates to — handlers themselves do no placement or persistence
//! of their own (§6 "handlers delegate to the orchestrator").

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fluidsh_registry::Registry;
use fluidsh_store::StateStore;
use fluidsh_types::{
    AgentId, CommandId, CommandRecord, HostId, Sandbox, SandboxId, SandboxState, SourceVm,
};
use fluidsh_wire::{ControlPayload, HostPayload};
use tracing::instrument;

use crate::error::{CpError, CpResult};

/// Placement's fixed resource floor (§4.1 "Placement"): a host must
/// advertise at least this much free capacity to be considered at
/// all, independent of what the caller actually requested. The
/// precise per-sandbox fit is re-checked by the host's own
/// `CheckResources` call before it commits to cloning.
const PLACEMENT_MIN_CPU: u32 = 1;
const PLACEMENT_MIN_MEMORY_MB: u32 = 512;

pub struct CreateSandboxParams {
    pub agent_id: AgentId,
    pub base_image: Option<String>,
    pub source_vm: Option<String>,
    pub name: String,
    pub vcpu: u32,
    pub memory_mb: u32,
    pub ttl_seconds: u64,
}

/// Timeouts the orchestrator applies to each kind of `SendAndWait`
/// call (§5 "Timeouts"). Threaded through explicitly at construction
/// rather than read from a global so tests can shrink them.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorTimeouts {
    pub create: Duration,
    pub lifecycle: Duration,
    pub run_command_transport_slack: Duration,
    pub generic: Duration,
}

impl Default for OrchestratorTimeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(300),
            lifecycle: Duration::from_secs(120),
            run_command_transport_slack: Duration::from_secs(30),
            generic: Duration::from_secs(120),
        }
    }
}

/// The result of a source-VM `RunCommand` (read-only path), mirroring
/// the sandbox-side `CommandRecord` shape without the audit
/// persistence — source VM commands are not sandboxes and have no
/// `SandboxId` to key an append-only record on (§3).
#[derive(Debug, Clone, serde::Serialize)]
pub struct SourceCommandOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

pub struct Orchestrator {
    registry: Arc<Registry>,
    store: Arc<dyn StateStore>,
    timeouts: OrchestratorTimeouts,
}

impl Orchestrator {
    pub fn new(registry: Arc<Registry>, store: Arc<dyn StateStore>, timeouts: OrchestratorTimeouts) -> Self {
        Self {
            registry,
            store,
            timeouts,
        }
    }

    #[instrument(skip(self, params), fields(agent_id = %params.agent_id))]
    pub async fn create_sandbox(&self, params: CreateSandboxParams) -> CpResult<Sandbox> {
        let CreateSandboxParams {
            agent_id,
            base_image,
            source_vm,
            name,
            vcpu,
            memory_mb,
            ttl_seconds,
        } = params;

        if base_image.is_some() == source_vm.is_some() {
            return Err(CpError::AmbiguousSource);
        }

        let hosts = self.registry.list_hosts().await?;
        let host_id = match (&base_image, &source_vm) {
            (Some(image), None) => {
                fluidsh_registry::select_for_image(&hosts, image, PLACEMENT_MIN_CPU, PLACEMENT_MIN_MEMORY_MB, Utc::now())?.id
            }
            (None, Some(vm)) => fluidsh_registry::select_for_source_vm(&hosts, vm)?.id,
            _ => unreachable!("checked above"),
        };

        let payload = ControlPayload::CreateSandbox {
            agent_id,
            base_image,
            source_vm,
            name,
            vcpu,
            memory_mb,
            ttl_seconds,
        };
        let reply = self
            .registry
            .send_and_wait(host_id, payload, self.timeouts.create)
            .await?;

        match reply {
            HostPayload::SandboxCreated {
                sandbox_id,
                mac,
                tap_name,
                ip,
            } => {
                let now = Utc::now();
                let source = base_image.clone().or_else(|| source_vm.clone()).unwrap_or_default();
                let mut sandbox = Sandbox::new(
                    sandbox_id,
                    host_id,
                    agent_id,
                    source,
                    source_vm,
                    mac,
                    tap_name,
                    vcpu,
                    memory_mb,
                    ttl_seconds,
                    now,
                );
                if ip.is_some() {
                    sandbox.state = SandboxState::Running;
                }
                sandbox.ip = ip;
                self.store.upsert_sandbox(sandbox.clone()).await?;
                Ok(sandbox)
            }
            HostPayload::ErrorReport { message, .. } => Err(CpError::HostError(message)),
            _ => Err(CpError::HostError("unexpected reply to CreateSandbox".to_string())),
        }
    }

    #[instrument(skip(self))]
    pub async fn start_sandbox(&self, id: SandboxId) -> CpResult<Sandbox> {
        let mut sandbox = self.active_sandbox(id).await?;
        let reply = self
            .registry
            .send_and_wait(sandbox.host_id, ControlPayload::StartSandbox { sandbox_id: id }, self.timeouts.lifecycle)
            .await?;
        match reply {
            HostPayload::SandboxStarted { ip, .. } => {
                sandbox.ip = ip;
                sandbox.transition(SandboxState::Running, Utc::now());
                self.store.upsert_sandbox(sandbox.clone()).await?;
                Ok(sandbox)
            }
            HostPayload::ErrorReport { message, .. } => Err(CpError::HostError(message)),
            _ => Err(CpError::HostError("unexpected reply to StartSandbox".to_string())),
        }
    }

    #[instrument(skip(self))]
    pub async fn stop_sandbox(&self, id: SandboxId, force: bool) -> CpResult<Sandbox> {
        let mut sandbox = self.active_sandbox(id).await?;
        let reply = self
            .registry
            .send_and_wait(
                sandbox.host_id,
                ControlPayload::StopSandbox { sandbox_id: id, force },
                self.timeouts.lifecycle,
            )
            .await?;
        match reply {
            HostPayload::SandboxStopped { .. } => {
                sandbox.transition(SandboxState::Stopped, Utc::now());
                self.store.upsert_sandbox(sandbox.clone()).await?;
                Ok(sandbox)
            }
            HostPayload::ErrorReport { message, .. } => Err(CpError::HostError(message)),
            _ => Err(CpError::HostError("unexpected reply to StopSandbox".to_string())),
        }
    }

    #[instrument(skip(self))]
    pub async fn destroy_sandbox(&self, id: SandboxId) -> CpResult<()> {
        let sandbox = self.active_sandbox(id).await?;
        let reply = self
            .registry
            .send_and_wait(sandbox.host_id, ControlPayload::DestroySandbox { sandbox_id: id }, self.timeouts.lifecycle)
            .await?;
        match reply {
            HostPayload::SandboxDestroyed { .. } => {
                self.store.soft_delete_sandbox(id).await?;
                Ok(())
            }
            HostPayload::ErrorReport { message, .. } => Err(CpError::HostError(message)),
            _ => Err(CpError::HostError("unexpected reply to DestroySandbox".to_string())),
        }
    }

    #[instrument(skip(self, command))]
    pub async fn run_command(&self, id: SandboxId, command: String, timeout_secs: u64) -> CpResult<CommandRecord> {
        let sandbox = self.active_sandbox(id).await?;
        let wait_timeout = Duration::from_secs(timeout_secs) + self.timeouts.run_command_transport_slack;
        let started_at = Utc::now();
        let reply = self
            .registry
            .send_and_wait(
                sandbox.host_id,
                ControlPayload::RunCommand {
                    sandbox_id: id,
                    command: command.clone(),
                    timeout_secs,
                },
                wait_timeout,
            )
            .await?;
        match reply {
            HostPayload::CommandResult {
                stdout,
                stderr,
                exit_code,
                duration_ms,
                ..
            } => {
                let record = CommandRecord {
                    id: CommandId::generate(),
                    sandbox_id: id,
                    command,
                    stdout,
                    stderr,
                    exit_code,
                    duration_ms,
                    started_at,
                    ended_at: Utc::now(),
                };
                self.store.append_command(record.clone()).await?;
                Ok(record)
            }
            HostPayload::ErrorReport { message, .. } => Err(CpError::HostError(message)),
            _ => Err(CpError::HostError("unexpected reply to RunCommand".to_string())),
        }
    }

    #[instrument(skip(self))]
    pub async fn snapshot_sandbox(&self, id: SandboxId, snapshot_name: String) -> CpResult<String> {
        let sandbox = self.active_sandbox(id).await?;
        let reply = self
            .registry
            .send_and_wait(
                sandbox.host_id,
                ControlPayload::SnapshotSandbox {
                    sandbox_id: id,
                    snapshot_name: snapshot_name.clone(),
                },
                self.timeouts.lifecycle,
            )
            .await?;
        match reply {
            HostPayload::SnapshotCreated { snapshot_name, .. } => Ok(snapshot_name),
            HostPayload::ErrorReport { message, .. } => Err(CpError::HostError(message)),
            _ => Err(CpError::HostError("unexpected reply to SnapshotSandbox".to_string())),
        }
    }

    pub async fn get_sandbox(&self, id: SandboxId) -> CpResult<Sandbox> {
        self.active_sandbox(id).await
    }

    pub async fn list_sandboxes(&self, host_id: Option<HostId>) -> CpResult<Vec<Sandbox>> {
        Ok(self.store.list_active_sandboxes(host_id).await?)
    }

    pub async fn get_ip(&self, id: SandboxId) -> CpResult<String> {
        let sandbox = self.active_sandbox(id).await?;
        sandbox.ip.clone().ok_or(CpError::NoIpYet(id))
    }

    pub async fn list_commands(&self, id: SandboxId) -> CpResult<Vec<CommandRecord>> {
        // Commands survive a sandbox's soft-delete for audit (§3), so
        // this intentionally does not require the sandbox be active.
        Ok(self.store.list_commands_for_sandbox(id).await?)
    }

    pub async fn list_hosts(&self) -> CpResult<Vec<fluidsh_types::HostRecord>> {
        Ok(self.registry.list_hosts().await?)
    }

    pub async fn get_host(&self, id: HostId) -> CpResult<fluidsh_types::HostRecord> {
        self.registry.get_host(id).await.map_err(|_| CpError::HostNotFound(id))
    }

    /// Every source VM name any connected host advertises, deduped.
    /// Distinct from the persisted `SourceVm` rows (which only exist
    /// once a VM has been prepared) — this is "what could we prepare",
    /// the store is "what has been prepared" (§3).
    pub async fn list_source_vm_names(&self) -> CpResult<Vec<String>> {
        let hosts = self.registry.list_hosts().await?;
        let mut names: Vec<String> = hosts.into_iter().flat_map(|h| h.source_vms).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    #[instrument(skip(self))]
    pub async fn prepare_source_vm(&self, vm_name: &str) -> CpResult<SourceVm> {
        let host_id = self.host_for_source_vm(vm_name).await?;
        let reply = self
            .registry
            .send_and_wait(
                host_id,
                ControlPayload::PrepareSourceVm { vm_name: vm_name.to_string() },
                self.timeouts.generic,
            )
            .await?;
        match reply {
            HostPayload::SourceVmPrepared { name, ca_fingerprint } => {
                let mut vm = self.store.get_source_vm(&name).await.unwrap_or_else(|_| SourceVm::new(&name));
                vm.prepared = true;
                vm.ca_fingerprint_at_prepare = Some(ca_fingerprint);
                self.store.upsert_source_vm(vm.clone()).await?;
                Ok(vm)
            }
            HostPayload::ErrorReport { message, .. } => Err(CpError::HostError(message)),
            _ => Err(CpError::HostError("unexpected reply to PrepareSourceVm".to_string())),
        }
    }

    #[instrument(skip(self, command))]
    pub async fn validate_source_command(&self, vm_name: &str, command: String) -> CpResult<()> {
        let host_id = self.host_for_source_vm(vm_name).await?;
        let reply = self
            .registry
            .send_and_wait(
                host_id,
                ControlPayload::ValidateSourceCommand {
                    vm_name: vm_name.to_string(),
                    command,
                },
                self.timeouts.generic,
            )
            .await?;
        match reply {
            HostPayload::SourceVmValidation { accepted: true, .. } => Ok(()),
            HostPayload::SourceVmValidation { accepted: false, reason } => {
                Err(CpError::ReadonlyRejected(reason.unwrap_or_default()))
            }
            HostPayload::ErrorReport { message, .. } => Err(CpError::HostError(message)),
            _ => Err(CpError::HostError("unexpected reply to ValidateSourceCommand".to_string())),
        }
    }

    #[instrument(skip(self, command))]
    pub async fn run_source_command(
        &self,
        vm_name: &str,
        command: String,
        timeout_secs: u64,
    ) -> CpResult<SourceCommandOutcome> {
        let host_id = self.host_for_source_vm(vm_name).await?;
        let wait_timeout = Duration::from_secs(timeout_secs) + self.timeouts.run_command_transport_slack;
        let reply = self
            .registry
            .send_and_wait(
                host_id,
                ControlPayload::RunSourceCommand {
                    vm_name: vm_name.to_string(),
                    command,
                    timeout_secs,
                },
                wait_timeout,
            )
            .await?;
        match reply {
            HostPayload::SourceCommandResult {
                stdout,
                stderr,
                exit_code,
                duration_ms,
            } => Ok(SourceCommandOutcome {
                stdout,
                stderr,
                exit_code,
                duration_ms,
            }),
            HostPayload::ErrorReport { message, .. } => Err(CpError::HostError(message)),
            _ => Err(CpError::HostError("unexpected reply to RunSourceCommand".to_string())),
        }
    }

    #[instrument(skip(self))]
    pub async fn read_source_file(&self, vm_name: &str, path: &str) -> CpResult<Vec<u8>> {
        let host_id = self.host_for_source_vm(vm_name).await?;
        let reply = self
            .registry
            .send_and_wait(
                host_id,
                ControlPayload::ReadSourceFile {
                    vm_name: vm_name.to_string(),
                    path: path.to_string(),
                },
                self.timeouts.generic,
            )
            .await?;
        match reply {
            HostPayload::SourceFileResult { contents } => Ok(contents),
            HostPayload::ErrorReport { message, .. } => Err(CpError::HostError(message)),
            _ => Err(CpError::HostError("unexpected reply to ReadSourceFile".to_string())),
        }
    }

    async fn active_sandbox(&self, id: SandboxId) -> CpResult<Sandbox> {
        self.store
            .get_active_sandbox(id)
            .await
            .map_err(|_| CpError::SandboxNotFound(id))
    }

    async fn host_for_source_vm(&self, vm_name: &str) -> CpResult<HostId> {
        let hosts = self.registry.list_hosts().await?;
        Ok(fluidsh_registry::select_for_source_vm(&hosts, vm_name)?.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluidsh_store::InMemoryStore;
    use fluidsh_types::{HostHealth, HostRecord, ResourceSnapshot};

    async fn registry_with_host(image: &str) -> (Arc<Registry>, Arc<dyn StateStore>) {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
        let _ = HostHealth::Healthy;
        store
            .upsert_host(HostRecord {
                id: HostId::generate(),
                hostname: "hv-1".to_string(),
                version: "0.3.0".to_string(),
                advertised_images: vec![image.to_string()],
                source_vms: vec![],
                resources: ResourceSnapshot {
                    available_cpus: 4,
                    available_memory_mb: 4096,
                    active_sandboxes: 0,
                },
                last_heartbeat: Utc::now(),
                connected: false,
            })
            .await
            .unwrap();
        (Arc::new(Registry::new(store.clone())), store)
    }

    #[tokio::test]
    async fn create_sandbox_rejects_ambiguous_source() {
        let (registry, store) = registry_with_host("ubuntu-22.04").await;
        let orchestrator = Orchestrator::new(registry, store, OrchestratorTimeouts::default());

        let result = orchestrator
            .create_sandbox(CreateSandboxParams {
                agent_id: AgentId::generate(),
                base_image: Some("ubuntu-22.04".to_string()),
                source_vm: Some("prod-db".to_string()),
                name: "sbx".to_string(),
                vcpu: 2,
                memory_mb: 2048,
                ttl_seconds: 3600,
            })
            .await;

        assert!(matches!(result, Err(CpError::AmbiguousSource)));
    }

    #[tokio::test]
    async fn create_sandbox_fails_placement_when_no_host_is_connected() {
        let (registry, store) = registry_with_host("ubuntu-22.04").await;
        let orchestrator = Orchestrator::new(registry, store, OrchestratorTimeouts::default());

        let result = orchestrator
            .create_sandbox(CreateSandboxParams {
                agent_id: AgentId::generate(),
                base_image: Some("ubuntu-22.04".to_string()),
                source_vm: None,
                name: "sbx".to_string(),
                vcpu: 2,
                memory_mb: 2048,
                ttl_seconds: 3600,
            })
            .await;

        assert!(matches!(result, Err(CpError::Registry(_))));
    }

    #[tokio::test]
    async fn get_sandbox_on_unknown_id_is_not_found() {
        let (registry, store) = registry_with_host("ubuntu-22.04").await;
        let orchestrator = Orchestrator::new(registry, store, OrchestratorTimeouts::default());

        let result = orchestrator.get_sandbox(SandboxId::generate()).await;
        assert!(matches!(result, Err(CpError::SandboxNotFound(_))));
    }
}
