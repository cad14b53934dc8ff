//! Shells out to the system `ssh` binary to drive `Prepare`'s
//! admin-privileged setup connection (§4.4 "Idempotent preparation"),
//! the same shell-out idiom `fluidsh-sandbox`'s command execution and
//! `fluidsh-hypervisor`'s `virsh` calls use rather than an SSH client
//! crate.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use fluidsh_readonly::{AdminConnection, CommandOutput};
use fluidsh_readonly::{ReadonlyError, ReadonlyResult};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

pub struct SshAdminConnection {
    user: String,
    key_path: PathBuf,
    ip: String,
    connect_timeout: Duration,
}

impl SshAdminConnection {
    pub fn new(user: impl Into<String>, key_path: PathBuf, ip: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            user: user.into(),
            key_path,
            ip: ip.into(),
            connect_timeout,
        }
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-i")
            .arg(&self.key_path)
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)))
            .arg("-o")
            .arg("BatchMode=yes")
            .arg(format!("{}@{}", self.user, self.ip));
        cmd
    }
}

#[async_trait]
impl AdminConnection for SshAdminConnection {
    async fn exec(&self, command: &str) -> ReadonlyResult<CommandOutput> {
        let output = self
            .base_command()
            .arg("--")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn upload(&self, path: &str, contents: &[u8], mode: u32) -> ReadonlyResult<()> {
        let mut child = self
            .base_command()
            .arg("--")
            .arg(format!("install -m {mode:o} /dev/stdin {path}"))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child.stdin.take().expect("stdin was piped");
        stdin.write_all(contents).await?;
        drop(stdin);

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(ReadonlyError::Connection(format!(
                "upload to {path:?} failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }
}
