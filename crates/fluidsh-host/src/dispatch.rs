//! Maps an inbound `ControlPayload` to the matching `SandboxManager`,
//! `SourceVmService`, or hypervisor call, and folds the result back
//! into a `HostPayload` (§6 "Host<->CP wire protocol").
//!
//! One [`Dispatcher`] is shared (behind `Arc`) by every handler-pool
//! worker; it owns no connection state of its own.

use std::sync::Arc;
use std::time::Duration;

use fluidsh_hypervisor::HypervisorDriver;
use fluidsh_sandbox::{CreateSandboxRequest, SandboxManager};
use fluidsh_types::HostId;
use fluidsh_wire::{ControlPayload, ErrorKind, HostPayload};
use tracing::{instrument, warn};

use crate::source_vm::SourceVmService;

pub struct Dispatcher {
    host_id: HostId,
    manager: Arc<SandboxManager>,
    driver: Arc<dyn HypervisorDriver>,
    source_vms: Arc<SourceVmService>,
    run_command_transport_slack: Duration,
    network: String,
}

impl Dispatcher {
    pub fn new(
        host_id: HostId,
        manager: Arc<SandboxManager>,
        driver: Arc<dyn HypervisorDriver>,
        source_vms: Arc<SourceVmService>,
        run_command_transport_slack: Duration,
        network: String,
    ) -> Self {
        Self {
            host_id,
            manager,
            driver,
            source_vms,
            run_command_transport_slack,
            network,
        }
    }

    /// Handles one `ControlPayload`, never propagating an error out —
    /// every failure becomes an `ErrorReport` with the `ErrorKind` the
    /// caller (the CP orchestrator) needs to decide whether to retry
    /// elsewhere (§7 "Error taxonomy").
    #[instrument(skip(self, payload))]
    pub async fn handle(&self, payload: ControlPayload) -> HostPayload {
        match self.handle_inner(payload).await {
            Ok(response) => response,
            Err((kind, message)) => {
                warn!(?kind, %message, "control command failed");
                HostPayload::ErrorReport { kind, message }
            }
        }
    }

    async fn handle_inner(&self, payload: ControlPayload) -> Result<HostPayload, (ErrorKind, String)> {
        match payload {
            ControlPayload::CreateSandbox {
                agent_id,
                base_image,
                source_vm,
                name: _,
                vcpu,
                memory_mb,
                ttl_seconds,
            } => self.create_sandbox(agent_id, base_image, source_vm, vcpu, memory_mb, ttl_seconds).await,

            ControlPayload::StartSandbox { sandbox_id } => {
                let sandbox = self.manager.start(sandbox_id).await.map_err(sandbox_err)?;
                Ok(HostPayload::SandboxStarted {
                    sandbox_id,
                    ip: sandbox.ip,
                })
            }

            ControlPayload::StopSandbox { sandbox_id, force } => {
                self.manager.stop(sandbox_id, force).await.map_err(sandbox_err)?;
                Ok(HostPayload::SandboxStopped { sandbox_id })
            }

            ControlPayload::DestroySandbox { sandbox_id } => {
                self.manager.destroy(sandbox_id).await.map_err(sandbox_err)?;
                Ok(HostPayload::SandboxDestroyed { sandbox_id })
            }

            ControlPayload::RunCommand {
                sandbox_id,
                command,
                timeout_secs,
            } => {
                let timeout = Duration::from_secs(timeout_secs) + self.run_command_transport_slack;
                let record = self
                    .manager
                    .run_command(sandbox_id, &command, timeout)
                    .await
                    .map_err(sandbox_err)?;
                Ok(HostPayload::CommandResult {
                    sandbox_id,
                    stdout: record.stdout,
                    stderr: record.stderr,
                    exit_code: record.exit_code,
                    duration_ms: record.duration_ms,
                })
            }

            ControlPayload::SnapshotSandbox { sandbox_id, snapshot_name } => {
                self.manager
                    .snapshot(sandbox_id, &snapshot_name)
                    .await
                    .map_err(sandbox_err)?;
                Ok(HostPayload::SnapshotCreated { sandbox_id, snapshot_name })
            }

            ControlPayload::ListSourceVms => Ok(HostPayload::SourceVmsList {
                names: self.source_vms.names().await,
            }),

            ControlPayload::ValidateSourceCommand { vm_name, command } => {
                match self.source_vms.validate(&vm_name, &command) {
                    Ok(()) => Ok(HostPayload::SourceVmValidation {
                        accepted: true,
                        reason: None,
                    }),
                    Err(err) => Ok(HostPayload::SourceVmValidation {
                        accepted: false,
                        reason: Some(err.to_string()),
                    }),
                }
            }

            ControlPayload::PrepareSourceVm { vm_name } => {
                let ca_fingerprint = self.source_vms.prepare(&vm_name).await.map_err(host_err)?;
                Ok(HostPayload::SourceVmPrepared {
                    name: vm_name,
                    ca_fingerprint,
                })
            }

            ControlPayload::RunSourceCommand {
                vm_name,
                command,
                timeout_secs,
            } => {
                let outcome = self
                    .source_vms
                    .run_command(&vm_name, &command, Duration::from_secs(timeout_secs))
                    .await
                    .map_err(host_err)?;
                Ok(HostPayload::SourceCommandResult {
                    stdout: outcome.stdout,
                    stderr: outcome.stderr,
                    exit_code: outcome.exit_code,
                    duration_ms: outcome.duration_ms,
                })
            }

            ControlPayload::ReadSourceFile { vm_name, path } => {
                let contents = self
                    .source_vms
                    .read_file(&vm_name, &path, Duration::from_secs(60))
                    .await
                    .map_err(host_err)?;
                Ok(HostPayload::SourceFileResult { contents })
            }

            // A co-located client bypassing the CP may ask this host
            // directly to enumerate hosts (§2 "the HD can also be
            // addressed directly by a co-located client ... the same
            // operation contract applies"); a single host only knows
            // its own identity, so it reports just that.
            ControlPayload::DiscoverHosts => Ok(HostPayload::DiscoverHostsResult {
                hosts: vec![self.host_id],
            }),
        }
    }

    async fn create_sandbox(
        &self,
        agent_id: fluidsh_types::AgentId,
        base_image: Option<String>,
        source_vm: Option<String>,
        vcpu: u32,
        memory_mb: u32,
        ttl_seconds: u64,
    ) -> Result<HostPayload, (ErrorKind, String)> {
        let (source, is_source_vm) = match (base_image, source_vm) {
            (Some(image), None) => (image, false),
            (None, Some(vm)) => (vm, true),
            _ => {
                return Err((
                    ErrorKind::Validation,
                    "exactly one of base_image or source_vm must be set".to_string(),
                ));
            }
        };

        if !self.driver.check_resources(vcpu, memory_mb).await.map_err(hyp_err)? {
            return Err((
                ErrorKind::PlacementExhausted,
                format!("host has insufficient free resources for {vcpu} vcpu / {memory_mb}mb"),
            ));
        }
        self.driver.validate(&source).await.map_err(hyp_err)?;

        let network = self.default_network();
        let sandbox = self
            .manager
            .create(CreateSandboxRequest {
                agent_id,
                source,
                is_source_vm,
                vcpu,
                memory_mb,
                network,
                ttl_seconds,
            })
            .await
            .map_err(sandbox_err)?;

        Ok(HostPayload::SandboxCreated {
            sandbox_id: sandbox.id,
            mac: sandbox.mac,
            tap_name: sandbox.tap_name,
            ip: sandbox.ip,
        })
    }

    fn default_network(&self) -> String {
        // Held on the dispatcher only to keep `create_sandbox`'s
        // signature free of a config parameter; threaded through at
        // construction instead would also work, but every other field
        // here is already a shared service handle.
        self.network.clone()
    }
}

fn sandbox_err(err: fluidsh_sandbox::SandboxError) -> (ErrorKind, String) {
    use fluidsh_sandbox::SandboxError as E;
    let kind = match &err {
        E::NotFound(_) | E::AlreadyTerminal(_) | E::InvalidSource(_) | E::DuplicateIp(_) => ErrorKind::Validation,
        E::IpDiscoveryTimedOut(_) | E::SshProbeFailed(_) | E::Timeout(_) => ErrorKind::TransientTransport,
        E::Cancelled => ErrorKind::TransientTransport,
        E::Hypervisor(_) | E::Credential(_) | E::Store(_) | E::Io(_) | E::Metadata(_) => ErrorKind::HostError,
    };
    (kind, err.to_string())
}

fn hyp_err(err: fluidsh_hypervisor::HypervisorError) -> (ErrorKind, String) {
    (ErrorKind::HostError, err.to_string())
}

fn host_err(err: crate::error::HostError) -> (ErrorKind, String) {
    use crate::error::HostError as E;
    let kind = match &err {
        E::Readonly(fluidsh_readonly::ReadonlyError::Blocked(_)) => ErrorKind::Validation,
        E::Sandbox(inner) => return sandbox_err_ref(inner),
        E::Ca(_) | E::Readonly(_) | E::Store(_) | E::Config(_) | E::Io(_) => ErrorKind::HostError,
        E::Wire(_) | E::Registry(_) => ErrorKind::TransientTransport,
        E::RegistrationRejected(_) | E::HandshakeIncomplete => ErrorKind::Fatal,
        E::Hypervisor(_) => ErrorKind::HostError,
    };
    (kind, err.to_string())
}

fn sandbox_err_ref(err: &fluidsh_sandbox::SandboxError) -> (ErrorKind, String) {
    use fluidsh_sandbox::SandboxError as E;
    let kind = match err {
        E::NotFound(_) | E::AlreadyTerminal(_) | E::InvalidSource(_) | E::DuplicateIp(_) => ErrorKind::Validation,
        E::IpDiscoveryTimedOut(_) | E::SshProbeFailed(_) | E::Timeout(_) | E::Cancelled => ErrorKind::TransientTransport,
        E::Hypervisor(_) | E::Credential(_) | E::Store(_) | E::Io(_) | E::Metadata(_) => ErrorKind::HostError,
    };
    (kind, err.to_string())
}
