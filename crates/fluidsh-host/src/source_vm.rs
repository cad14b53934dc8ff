//! Read-only source VM enforcement, wired to a single host (§4.4).
//!
//! Combines Layer A (the client allowlist, [`fluidsh_readonly::validate_command`])
//! with Layer B (a `fluid-readonly`-principal credential from the shared
//! [`fluidsh_ca::CredentialCache`]) before ever touching the network;
//! Layer C (the restricted shell) lives on the VM itself, installed by
//! [`fluidsh_readonly::prepare`].

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use fluidsh_ca::{CredentialCache, Principal};
use fluidsh_config::KnownSourceVm;
use fluidsh_readonly::{AdminConnection, ReadonlyError, ReadonlyResult, TracingTelemetry};
use fluidsh_store::StateStore;
use fluidsh_types::{CredentialTarget, SourceVm};
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::instrument;

use crate::error::{HostError, HostResult};
use crate::ssh_admin::SshAdminConnection;

const SSH_TRANSPORT_EXIT_CODE: i32 = 255;
const READONLY_USER: &str = "fluid-readonly";

/// Outcome of one command run against a source VM's restricted shell.
pub struct SourceCommandOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

/// Per-host registry of known source VMs plus the machinery to
/// validate, prepare, and run read-only commands against them.
pub struct SourceVmService {
    store: Arc<dyn StateStore>,
    credentials: Arc<CredentialCache>,
    ca: Arc<fluidsh_ca::CertificateAuthority>,
    ips: RwLock<HashMap<String, String>>,
    admin_user: String,
    admin_key_path: std::path::PathBuf,
    connect_timeout: Duration,
    telemetry: TracingTelemetry,
}

impl SourceVmService {
    pub async fn new(
        store: Arc<dyn StateStore>,
        credentials: Arc<CredentialCache>,
        ca: Arc<fluidsh_ca::CertificateAuthority>,
        known_vms: &[KnownSourceVm],
        admin_user: impl Into<String>,
        admin_key_path: std::path::PathBuf,
        connect_timeout: Duration,
    ) -> HostResult<Self> {
        let mut ips = HashMap::new();
        for vm in known_vms {
            let sanitized = fluidsh_ca::sanitize_for_path(&vm.name);
            ips.insert(sanitized.clone(), vm.ip.clone());

            let mut record = store
                .get_source_vm(&sanitized)
                .await
                .unwrap_or_else(|_| SourceVm::new(sanitized.clone()));
            record.ip = Some(vm.ip.clone());
            store.upsert_source_vm(record).await?;
        }

        Ok(Self {
            store,
            credentials,
            ca,
            ips: RwLock::new(ips),
            admin_user: admin_user.into(),
            admin_key_path,
            connect_timeout,
            telemetry: TracingTelemetry,
        })
    }

    pub async fn names(&self) -> Vec<String> {
        self.ips.read().await.keys().cloned().collect()
    }

    async fn ip_for(&self, name: &str) -> HostResult<String> {
        self.ips
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| HostError::Sandbox(fluidsh_sandbox::SandboxError::InvalidSource(name.to_string())))
    }

    /// Layer A only — used by `ValidateSourceCommand`, which checks
    /// acceptability without running anything.
    pub fn validate(&self, vm_name: &str, command: &str) -> ReadonlyResult<()> {
        fluidsh_readonly::validate_command(vm_name, command, &self.telemetry)
    }

    /// Idempotent `Prepare(vm)` (§4.4): opens an admin connection and
    /// installs the restricted shell, the `fluid-readonly` user, and
    /// the CA trust directives. Detects CA rotation against the
    /// fingerprint recorded at the VM's last successful prepare.
    #[instrument(skip(self))]
    pub async fn prepare(&self, name: &str) -> HostResult<String> {
        let sanitized = fluidsh_ca::sanitize_for_path(name);
        let ip = self.ip_for(&sanitized).await?;

        let conn = SshAdminConnection::new(
            self.admin_user.clone(),
            self.admin_key_path.clone(),
            ip.clone(),
            self.connect_timeout,
        );
        let pubkey = self.ca.public_key_openssh()?;
        let fingerprint = self.ca.fingerprint_hex()?;
        let outcome = fluidsh_readonly::prepare(&conn, &pubkey, &fingerprint).await?;

        let mut record = self
            .store
            .get_source_vm(&sanitized)
            .await
            .unwrap_or_else(|_| SourceVm::new(sanitized.clone()));
        record.ip = Some(ip);
        record.prepared = true;
        record.ca_fingerprint_at_prepare = Some(outcome.ca_fingerprint.clone());
        self.store.upsert_source_vm(record).await?;

        Ok(outcome.ca_fingerprint)
    }

    /// `RunCommand` for a source VM (§4.4 Layers A + B, then the VM's
    /// own restricted shell enforces Layer C). Rejects at Layer A
    /// before any network I/O; never retries a Layer A rejection.
    #[instrument(skip(self, command))]
    pub async fn run_command(&self, name: &str, command: &str, timeout: Duration) -> HostResult<SourceCommandOutcome> {
        let sanitized = fluidsh_ca::sanitize_for_path(name);
        self.validate(&sanitized, command)?;

        let ip = self.ip_for(&sanitized).await?;
        let credential = self
            .credentials
            .get_or_refresh(
                &CredentialTarget::SourceVm(sanitized.clone()),
                Principal::FluidReadonly,
                "fluidsh",
                &sanitized,
                None,
            )
            .await?;

        let started = std::time::Instant::now();
        let outcome = ssh_exec(&ip, &credential, command, self.connect_timeout, timeout).await?;
        Ok(SourceCommandOutcome {
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            exit_code: outcome.exit_code,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// `ReadSourceFile`: validated as a `cat --` invocation through
    /// the same Layer A allowlist as any other inspection command.
    #[instrument(skip(self))]
    pub async fn read_file(&self, name: &str, path: &str, timeout: Duration) -> HostResult<Vec<u8>> {
        let command = format!("cat -- {}", shell_quote(path));
        let outcome = self.run_command(name, &command, timeout).await?;
        if outcome.exit_code != 0 {
            return Err(HostError::Readonly(ReadonlyError::Blocked(format!(
                "remote read of {path:?} exited {}: {}",
                outcome.exit_code, outcome.stderr
            ))));
        }
        Ok(outcome.stdout.into_bytes())
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

struct SshOutcome {
    stdout: String,
    stderr: String,
    exit_code: i32,
}

async fn ssh_exec(
    ip: &str,
    credential: &fluidsh_types::SshCertificateCredential,
    command: &str,
    connect_timeout: Duration,
    command_timeout: Duration,
) -> HostResult<SshOutcome> {
    let dir = tempfile::tempdir()?;
    let key_path = dir.path().join("id");
    let cert_path = dir.path().join("id-cert.pub");
    tokio::fs::write(&key_path, &credential.private_key_bytes).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    tokio::fs::write(&cert_path, &credential.certificate_bytes).await?;

    let mut cmd = Command::new("ssh");
    cmd.arg("-i")
        .arg(&key_path)
        .arg("-o")
        .arg(format!("CertificateFile={}", cert_path.display()))
        .arg("-o")
        .arg("StrictHostKeyChecking=no")
        .arg("-o")
        .arg("UserKnownHostsFile=/dev/null")
        .arg("-o")
        .arg(format!("ConnectTimeout={}", connect_timeout.as_secs().max(1)))
        .arg("-o")
        .arg("BatchMode=yes")
        .arg(format!("{READONLY_USER}@{ip}"))
        .arg("--")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn()?;
    let output = match tokio::time::timeout(command_timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => {
            return Ok(SshOutcome {
                stdout: String::new(),
                stderr: "command timed out".to_string(),
                exit_code: SSH_TRANSPORT_EXIT_CODE,
            });
        }
    };

    Ok(SshOutcome {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(SSH_TRANSPORT_EXIT_CODE),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_quote_escapes_embedded_single_quotes() {
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote("/etc/passwd"), "'/etc/passwd'");
    }
}
