//! On-disk per-sandbox metadata (§6 "Filesystem layout per sandbox"):
//! the JSON file crash recovery reads back, plus the domain's PID file.

use std::path::Path;

use chrono::{DateTime, Utc};
use fluidsh_types::{AgentId, SandboxId};
use serde::{Deserialize, Serialize};

use crate::error::SandboxResult;

pub const METADATA_FILENAME: &str = "metadata.json";
pub const PID_FILENAME: &str = "domain.pid";

/// The fields §6 names as "necessary for crash recovery" (name, TAP,
/// MAC, bridge, vCPU, memoryMB) plus everything else a [`Sandbox`]
/// record needs to be rebuilt whole from disk alone — the host
/// daemon's state store is in-memory and does not survive a restart,
/// so this file is crash recovery's only source of truth (§4.2 "Crash
/// recovery").
///
/// [`Sandbox`]: fluidsh_types::Sandbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxMetadata {
    pub sandbox_id: SandboxId,
    pub domain_name: String,
    pub tap_name: String,
    pub mac: String,
    pub bridge: String,
    pub vcpu: u32,
    pub memory_mb: u32,
    pub agent_id: AgentId,
    pub base_image: String,
    pub source_vm: Option<String>,
    pub ttl_seconds: u64,
    pub created_at: DateTime<Utc>,
    /// Last IP discovered for this sandbox, refreshed whenever
    /// [`Self::write`] is called after a successful discovery, so
    /// crash recovery can report it without re-probing (§8 scenario 6).
    pub ip: Option<String>,
}

impl SandboxMetadata {
    pub async fn write(&self, work_dir: &Path) -> SandboxResult<()> {
        let path = work_dir.join(METADATA_FILENAME);
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    pub async fn read(work_dir: &Path) -> SandboxResult<Self> {
        let path = work_dir.join(METADATA_FILENAME);
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

pub async fn write_pid(work_dir: &Path, pid: u32) -> SandboxResult<()> {
    tokio::fs::write(work_dir.join(PID_FILENAME), pid.to_string()).await?;
    Ok(())
}

pub async fn read_pid(work_dir: &Path) -> SandboxResult<Option<u32>> {
    let path = work_dir.join(PID_FILENAME);
    if !tokio::fs::try_exists(&path).await? {
        return Ok(None);
    }
    let contents = tokio::fs::read_to_string(path).await?;
    Ok(contents.trim().parse().ok())
}

/// Whether the process named by a PID file is still alive, via
/// `kill(pid, 0)` (§4.2 "Crash recovery": "Probe the PID with signal
/// 0").
#[cfg(unix)]
pub fn pid_is_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
pub fn pid_is_alive(_pid: u32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluidsh_types::SandboxId;
    use tempfile::tempdir;

    fn sample_metadata() -> SandboxMetadata {
        SandboxMetadata {
            sandbox_id: SandboxId::generate(),
            domain_name: "sbx-abc123".to_string(),
            tap_name: "tap-abc123".to_string(),
            mac: "52:54:00:aa:bb:cc".to_string(),
            bridge: "virbr0".to_string(),
            vcpu: 2,
            memory_mb: 2048,
            agent_id: fluidsh_types::AgentId::generate(),
            base_image: "ubuntu-22.04".to_string(),
            source_vm: None,
            ttl_seconds: 3600,
            created_at: chrono::Utc::now(),
            ip: Some("192.0.2.10".to_string()),
        }
    }

    #[tokio::test]
    async fn metadata_round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let metadata = sample_metadata();
        metadata.write(dir.path()).await.unwrap();

        let read_back = SandboxMetadata::read(dir.path()).await.unwrap();
        assert_eq!(read_back, metadata);
    }

    #[tokio::test]
    async fn missing_pid_file_reads_as_none() {
        let dir = tempdir().unwrap();
        assert_eq!(read_pid(dir.path()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn pid_round_trips() {
        let dir = tempdir().unwrap();
        write_pid(dir.path(), 12345).await.unwrap();
        assert_eq!(read_pid(dir.path()).await.unwrap(), Some(12345));
    }

    #[cfg(unix)]
    #[test]
    fn current_process_pid_reports_alive() {
        assert!(pid_is_alive(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn an_unlikely_pid_reports_not_alive() {
        assert!(!pid_is_alive(u32::MAX - 1));
    }
}
