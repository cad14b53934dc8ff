//! `Prepare(sourceVM)` (§4.4 "Idempotent preparation"): connects once
//! as an admin user and installs everything read-only access needs.
//! Every step checks for prior completion first, so re-running is
//! safe — §8's idempotence property.

use async_trait::async_trait;
use tracing::{info, instrument};

use crate::error::ReadonlyResult;
use crate::shell_script::{self, INSTALL_PATH};

pub const READONLY_USER: &str = "fluid-readonly";
pub const CA_PUBKEY_PATH: &str = "/etc/ssh/fluidsh_ca.pub";
const SSHD_CONFIG_PATH: &str = "/etc/ssh/sshd_config";
const PRINCIPALS_DIR: &str = "/etc/ssh/fluidsh_principals";
const TRUST_MARKER: &str = "# fluidsh: trust CA for fluid-readonly";

/// One command result from the admin connection used to prepare a VM.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// The admin-privileged connection `Prepare` runs its idempotent setup
/// steps over. A real implementation opens an SSH session with an
/// operator-supplied admin credential; tests use an in-memory fake.
#[async_trait]
pub trait AdminConnection: Send + Sync {
    async fn exec(&self, command: &str) -> ReadonlyResult<CommandOutput>;

    async fn upload(&self, path: &str, contents: &[u8], mode: u32) -> ReadonlyResult<()>;
}

/// What changed (or didn't) during one `Prepare` run, for logging and
/// for the caller to decide whether an sshd restart actually happened.
#[derive(Debug, Clone, Default)]
pub struct PrepareOutcome {
    pub shell_installed: bool,
    pub user_created: bool,
    pub ca_key_installed: bool,
    pub sshd_config_updated: bool,
    pub principals_file_written: bool,
    pub sshd_restarted: bool,
    pub ca_fingerprint: String,
}

/// Idempotently prepares `vm_name` for read-only inspection (§4.4).
#[instrument(skip(conn, ca_public_key_openssh, ca_fingerprint), fields(vm_name))]
pub async fn prepare(
    conn: &dyn AdminConnection,
    ca_public_key_openssh: &str,
    ca_fingerprint: &str,
) -> ReadonlyResult<PrepareOutcome> {
    let mut outcome = PrepareOutcome {
        ca_fingerprint: ca_fingerprint.to_string(),
        ..Default::default()
    };

    outcome.shell_installed = install_restricted_shell(conn).await?;
    outcome.user_created = ensure_readonly_user(conn).await?;
    outcome.ca_key_installed = install_ca_public_key(conn, ca_public_key_openssh).await?;

    let sshd_changed = ensure_sshd_directives(conn).await?;
    outcome.principals_file_written = write_principals_mapping(conn).await?;
    outcome.sshd_config_updated = sshd_changed;

    if sshd_changed || outcome.principals_file_written {
        conn.exec("systemctl reload sshd || service ssh reload").await?;
        outcome.sshd_restarted = true;
    }

    info!(?outcome, "source vm prepared for read-only access");
    Ok(outcome)
}

async fn install_restricted_shell(conn: &dyn AdminConnection) -> ReadonlyResult<bool> {
    let script = shell_script::render();
    let check = conn
        .exec(&format!("cat {INSTALL_PATH} 2>/dev/null"))
        .await?;
    if check.succeeded() && check.stdout == script {
        return Ok(false);
    }
    conn.upload(INSTALL_PATH, script.as_bytes(), 0o755).await?;
    Ok(true)
}

async fn ensure_readonly_user(conn: &dyn AdminConnection) -> ReadonlyResult<bool> {
    let check = conn.exec(&format!("id {READONLY_USER} >/dev/null 2>&1")).await?;
    if check.succeeded() {
        return Ok(false);
    }
    conn.exec(&format!(
        "useradd --system --no-create-home --shell {INSTALL_PATH} {READONLY_USER}"
    ))
    .await?;
    Ok(true)
}

async fn install_ca_public_key(conn: &dyn AdminConnection, ca_public_key_openssh: &str) -> ReadonlyResult<bool> {
    let check = conn.exec(&format!("cat {CA_PUBKEY_PATH} 2>/dev/null")).await?;
    if check.succeeded() && check.stdout.trim() == ca_public_key_openssh.trim() {
        return Ok(false);
    }
    conn.upload(CA_PUBKEY_PATH, ca_public_key_openssh.as_bytes(), 0o644).await?;
    Ok(true)
}

async fn ensure_sshd_directives(conn: &dyn AdminConnection) -> ReadonlyResult<bool> {
    let check = conn.exec(&format!("grep -F {TRUST_MARKER:?} {SSHD_CONFIG_PATH}")).await?;
    if check.succeeded() {
        return Ok(false);
    }

    let directives = format!(
        "\n{TRUST_MARKER}\nTrustedUserCAKeys {CA_PUBKEY_PATH}\nAuthorizedPrincipalsFile {PRINCIPALS_DIR}/%u\n"
    );
    conn.exec(&format!(
        "printf '%s' {directives:?} >> {SSHD_CONFIG_PATH}",
    ))
    .await?;
    Ok(true)
}

async fn write_principals_mapping(conn: &dyn AdminConnection) -> ReadonlyResult<bool> {
    let path = format!("{PRINCIPALS_DIR}/{READONLY_USER}");
    let check = conn.exec(&format!("cat {path} 2>/dev/null")).await?;
    if check.succeeded() && check.stdout.trim() == READONLY_USER {
        return Ok(false);
    }
    conn.exec(&format!("mkdir -p {PRINCIPALS_DIR}")).await?;
    conn.upload(&path, format!("{READONLY_USER}\n").as_bytes(), 0o644).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeConnection {
        files: Mutex<std::collections::HashMap<String, String>>,
        exec_log: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AdminConnection for FakeConnection {
        async fn exec(&self, command: &str) -> ReadonlyResult<CommandOutput> {
            self.exec_log.lock().unwrap().push(command.to_string());

            if let Some(path) = command.strip_prefix("cat ").and_then(|rest| rest.split(' ').next()) {
                let files = self.files.lock().unwrap();
                return Ok(match files.get(path) {
                    Some(contents) => CommandOutput { stdout: contents.clone(), exit_code: 0 },
                    None => CommandOutput { stdout: String::new(), exit_code: 1 },
                });
            }
            if command.starts_with("id ") {
                let created = self.files.lock().unwrap().contains_key("__user_created__");
                return Ok(CommandOutput {
                    stdout: String::new(),
                    exit_code: if created { 0 } else { 1 },
                });
            }
            if command.starts_with("useradd") {
                self.files
                    .lock()
                    .unwrap()
                    .insert("__user_created__".to_string(), "1".to_string());
                return Ok(CommandOutput { stdout: String::new(), exit_code: 0 });
            }
            if command.starts_with("grep -F") {
                let found = self.files.lock().unwrap().get(SSHD_CONFIG_PATH).is_some_and(|c| c.contains(TRUST_MARKER));
                return Ok(CommandOutput { stdout: String::new(), exit_code: if found { 0 } else { 1 } });
            }
            if command.starts_with("printf") {
                let mut files = self.files.lock().unwrap();
                let entry = files.entry(SSHD_CONFIG_PATH.to_string()).or_default();
                entry.push_str("appended");
                return Ok(CommandOutput { stdout: String::new(), exit_code: 0 });
            }
            Ok(CommandOutput { stdout: String::new(), exit_code: 0 })
        }

        async fn upload(&self, path: &str, contents: &[u8], _mode: u32) -> ReadonlyResult<()> {
            self.files
                .lock()
                .unwrap()
                .insert(path.to_string(), String::from_utf8_lossy(contents).into_owned());
            Ok(())
        }
    }

    #[tokio::test]
    async fn first_prepare_performs_every_step() {
        let conn = FakeConnection::default();
        let outcome = prepare(&conn, "ssh-ed25519 AAAA... ca", "abc123").await.unwrap();

        assert!(outcome.shell_installed);
        assert!(outcome.user_created);
        assert!(outcome.ca_key_installed);
        assert!(outcome.sshd_config_updated);
        assert!(outcome.principals_file_written);
        assert!(outcome.sshd_restarted);
    }

    #[tokio::test]
    async fn second_prepare_on_same_vm_changes_nothing() {
        let conn = FakeConnection::default();
        prepare(&conn, "ssh-ed25519 AAAA... ca", "abc123").await.unwrap();

        let second = prepare(&conn, "ssh-ed25519 AAAA... ca", "abc123").await.unwrap();

        assert!(!second.shell_installed);
        assert!(!second.user_created);
        assert!(!second.ca_key_installed);
        assert!(!second.sshd_config_updated);
        assert!(!second.principals_file_written);
        assert!(!second.sshd_restarted);
    }

    #[tokio::test]
    async fn ca_key_rotation_is_detected_and_reinstalled() {
        let conn = FakeConnection::default();
        prepare(&conn, "ssh-ed25519 AAAA... ca-v1", "fp1").await.unwrap();

        let rotated = prepare(&conn, "ssh-ed25519 BBBB... ca-v2", "fp2").await.unwrap();
        assert!(rotated.ca_key_installed);
    }
}
