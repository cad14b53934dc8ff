//! `RunCommand` (§4.2 "Command execution"): re-discover the IP, check
//! uniqueness, fetch credentials, then shell out to the system `ssh`
//! binary with certificate auth — mirroring `fluidsh-hypervisor`'s
//! shell-out-to-`virsh` idiom rather than pulling in an SSH client
//! crate.

use std::process::Stdio;
use std::time::Duration;

use chrono::Utc;
use fluidsh_types::{CommandId, CommandRecord, CredentialTarget, SandboxId, SshCertificateCredential};
use tokio::process::Command;
use tracing::{instrument, warn};

use crate::error::{SandboxError, SandboxResult};
use crate::manager::SandboxManager;
use crate::metadata::SandboxMetadata;

const RUN_COMMAND_ATTEMPTS: u32 = 5;
const RUN_COMMAND_INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const RUN_COMMAND_MAX_BACKOFF: Duration = Duration::from_secs(30);
const PROBE_COMMAND: &str = "true";

/// ssh's own reserved exit code for a connection-class failure (the
/// OpenSSH client exits 255 when it cannot reach, authenticate to, or
/// maintain the session with the remote host, never for a command's
/// own nonzero exit).
const SSH_CLIENT_TRANSPORT_EXIT_CODE: i32 = 255;

struct CredentialFiles {
    _dir: tempfile::TempDir,
    key_path: std::path::PathBuf,
    cert_path: std::path::PathBuf,
}

async fn write_credential_files(credential: &SshCertificateCredential) -> SandboxResult<CredentialFiles> {
    let dir = tempfile::tempdir()?;
    let key_path = dir.path().join("id");
    let cert_path = dir.path().join("id-cert.pub");

    tokio::fs::write(&key_path, &credential.private_key_bytes).await?;
    set_owner_read_write(&key_path).await?;
    tokio::fs::write(&cert_path, &credential.certificate_bytes).await?;

    Ok(CredentialFiles {
        _dir: dir,
        key_path,
        cert_path,
    })
}

#[cfg(unix)]
async fn set_owner_read_write(path: &std::path::Path) -> SandboxResult<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_owner_read_write(_path: &std::path::Path) -> SandboxResult<()> {
    Ok(())
}

/// One SSH invocation's outcome, before it is wrapped into a persisted
/// [`CommandRecord`].
struct SshOutcome {
    stdout: String,
    stderr: String,
    exit_code: i32,
}

impl SshOutcome {
    fn is_transport_failure(&self) -> bool {
        self.exit_code == SSH_CLIENT_TRANSPORT_EXIT_CODE
    }
}

/// Runs one command over SSH to `user@ip` with certificate auth, host
/// key checking disabled (ephemeral VMs have no stable host key; trust
/// flows through the CA instead, §4.2 step 4).
async fn ssh_exec(
    user: &str,
    ip: &str,
    credential: &SshCertificateCredential,
    command: &str,
    connect_timeout: Duration,
    command_timeout: Duration,
) -> SandboxResult<SshOutcome> {
    let files = write_credential_files(credential).await?;

    let mut cmd = Command::new("ssh");
    cmd.arg("-i")
        .arg(&files.key_path)
        .arg("-o")
        .arg(format!("CertificateFile={}", files.cert_path.display()))
        .arg("-o")
        .arg("StrictHostKeyChecking=no")
        .arg("-o")
        .arg("UserKnownHostsFile=/dev/null")
        .arg("-o")
        .arg(format!("ConnectTimeout={}", connect_timeout.as_secs().max(1)))
        .arg("-o")
        .arg("BatchMode=yes")
        .arg(format!("{user}@{ip}"))
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
                exit_code: SSH_CLIENT_TRANSPORT_EXIT_CODE,
            });
        }
    };

    Ok(SshOutcome {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(SSH_CLIENT_TRANSPORT_EXIT_CODE),
    })
}

/// A single reachability probe, used by the create/start bring-up path
/// (§4.2 step 8). A probe failure is always transport-class by
/// definition — `true` has no other way to fail remotely.
pub(crate) async fn probe(
    id: SandboxId,
    ip: &str,
    credential: &SshCertificateCredential,
    connect_timeout: Duration,
) -> SandboxResult<()> {
    let outcome = ssh_exec(
        "sandbox",
        ip,
        credential,
        PROBE_COMMAND,
        connect_timeout,
        connect_timeout + Duration::from_secs(5),
    )
    .await?;

    if outcome.exit_code == 0 {
        Ok(())
    } else {
        Err(SandboxError::SshProbeFailed(id))
    }
}

impl SandboxManager {
    /// Runs `command` against a sandbox over SSH (§4.2 "Command
    /// execution", steps 1-6).
    #[instrument(skip(self, command))]
    pub async fn run_command(
        &self,
        id: SandboxId,
        command: &str,
        timeout: Duration,
    ) -> SandboxResult<CommandRecord> {
        let sandbox = self.store().get_active_sandbox(id).await?;
        if !sandbox.state.is_reachable() {
            return Err(SandboxError::SshProbeFailed(id));
        }

        let metadata = SandboxMetadata::read(&self.sandbox_dir(id)).await?;
        let ip = fluidsh_hypervisor::discover_ip_with_timeout(
            &metadata.domain_name,
            &metadata.mac,
            self.ip_discovery_timeout(),
        )
        .await
        .map_err(|_| SandboxError::IpDiscoveryTimedOut(id))?;

        if let Some(other) = self.store().find_active_sandbox_by_ip(&ip).await? {
            if other.id != id {
                return Err(SandboxError::DuplicateIp(ip));
            }
        }

        let target = CredentialTarget::Sandbox(id);
        let credential = self
            .credentials()
            .get_or_refresh(&target, fluidsh_ca::Principal::Sandbox, "fluidsh", &sandbox.base_image, None)
            .await?;

        let started_at = Utc::now();
        let outcome = self
            .run_with_retry(&ip, &credential, command, timeout)
            .await?;
        let ended_at = Utc::now();

        let record = CommandRecord {
            id: CommandId::generate(),
            sandbox_id: id,
            command: command.to_string(),
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            exit_code: if outcome.is_transport_failure() {
                CommandRecord::TRANSPORT_FAILURE_EXIT_CODE
            } else {
                outcome.exit_code
            },
            duration_ms: (ended_at - started_at).num_milliseconds().max(0) as u64,
            started_at,
            ended_at,
        };

        self.store().append_command(record.clone()).await?;
        Ok(record)
    }

    /// Retries only on the SSH-transport sentinel, never on the
    /// remote command's own nonzero exit (§4.2 step 5).
    async fn run_with_retry(
        &self,
        ip: &str,
        credential: &SshCertificateCredential,
        command: &str,
        timeout: Duration,
    ) -> SandboxResult<SshOutcome> {
        let mut backoff = RUN_COMMAND_INITIAL_BACKOFF;

        for attempt in 1..=RUN_COMMAND_ATTEMPTS {
            let outcome = ssh_exec(
                "sandbox",
                ip,
                credential,
                command,
                self.ssh_connect_timeout(),
                timeout,
            )
            .await?;

            if !outcome.is_transport_failure() || attempt == RUN_COMMAND_ATTEMPTS {
                return Ok(outcome);
            }

            warn!(attempt, "ssh transport failure, retrying");
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(RUN_COMMAND_MAX_BACKOFF);
        }
        unreachable!("loop always returns by the final attempt")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluidsh_types::CredentialTarget as Target;

    fn fake_credential() -> SshCertificateCredential {
        SshCertificateCredential {
            target: Target::Sandbox(SandboxId::generate()),
            principal: "sandbox".to_string(),
            private_key_bytes: b"not-a-real-key".to_vec(),
            certificate_bytes: b"not-a-real-cert".to_vec(),
            not_before: Utc::now(),
            not_after: Utc::now() + chrono::Duration::minutes(30),
            serial: 1,
        }
    }

    #[tokio::test]
    async fn credential_files_are_written_with_owner_only_key_permissions() {
        let credential = fake_credential();
        let files = write_credential_files(&credential).await.unwrap();

        assert!(tokio::fs::try_exists(&files.key_path).await.unwrap());
        assert!(tokio::fs::try_exists(&files.cert_path).await.unwrap());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let meta = tokio::fs::metadata(&files.key_path).await.unwrap();
            assert_eq!(meta.permissions().mode() & 0o777, 0o600);
        }
    }

    #[test]
    fn exit_code_255_is_recognized_as_transport_failure() {
        let outcome = SshOutcome {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 255,
        };
        assert!(outcome.is_transport_failure());
    }

    #[test]
    fn nonzero_remote_exit_is_not_a_transport_failure() {
        let outcome = SshOutcome {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 1,
        };
        assert!(!outcome.is_transport_failure());
    }
}
