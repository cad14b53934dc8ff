//! Crash recovery (§4.2 "Crash recovery"): on daemon restart, scan
//! `workDir` for per-sandbox subdirectories left over from before the
//! crash and reconcile each against the real process it names.

use fluidsh_types::{Sandbox, SandboxId, SandboxState};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::SandboxResult;
use crate::manager::SandboxManager;
use crate::metadata::{self, SandboxMetadata};

/// What crash recovery found, for the startup log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryReport {
    pub recovered: u32,
    pub skipped_dead: u32,
    pub skipped_unreadable: u32,
}

impl SandboxManager {
    /// Scans the working directory for sandboxes that survived a
    /// daemon restart and restores their in-memory state to match
    /// reality (§4.2 "Crash recovery").
    #[instrument(skip(self))]
    pub async fn recover(&self) -> SandboxResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let work_dir = self.work_dir_path();

        if !tokio::fs::try_exists(&work_dir).await? {
            return Ok(report);
        }

        let mut entries = tokio::fs::read_dir(&work_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }

            let dir_name = entry.file_name();
            let Some(id) = dir_name
                .to_str()
                .and_then(|s| Uuid::parse_str(s).ok())
                .map(SandboxId::from_uuid)
            else {
                warn!(dir = ?dir_name, "skipping non-sandbox directory in work dir");
                continue;
            };

            match self.recover_one(id, &entry.path()).await {
                Ok(true) => report.recovered += 1,
                Ok(false) => report.skipped_dead += 1,
                Err(err) => {
                    warn!(%id, error = %err, "could not recover sandbox, leaving for the janitor");
                    report.skipped_unreadable += 1;
                }
            }
        }

        info!(
            recovered = report.recovered,
            skipped_dead = report.skipped_dead,
            skipped_unreadable = report.skipped_unreadable,
            "crash recovery complete"
        );
        Ok(report)
    }

    /// Rebuilds one sandbox's record entirely from its on-disk
    /// metadata (§4.2 "Crash recovery"). The host daemon's state store
    /// is in-memory and does not survive the restart this function
    /// runs after, so `metadata.json` — not the store — is the source
    /// of truth here; this deliberately never reads the store before
    /// writing the recovered record back into it.
    async fn recover_one(&self, id: SandboxId, dir: &std::path::Path) -> SandboxResult<bool> {
        let metadata: SandboxMetadata = SandboxMetadata::read(dir).await?;
        let pid = match metadata::read_pid(dir).await? {
            Some(pid) => pid,
            None => return Ok(false),
        };

        if !metadata::pid_is_alive(pid) {
            return Ok(false);
        }

        let mut sandbox = Sandbox::new(
            id,
            self.host_id(),
            metadata.agent_id,
            metadata.base_image,
            metadata.source_vm,
            metadata.mac,
            metadata.tap_name,
            metadata.vcpu,
            metadata.memory_mb,
            metadata.ttl_seconds,
            metadata.created_at,
        );
        sandbox.ip = metadata.ip;
        sandbox.transition(SandboxState::Running, chrono::Utc::now());
        self.store().upsert_sandbox(sandbox).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fluidsh_ca::{CertificateAuthority, CredentialCache};
    use fluidsh_hypervisor::{
        CloneSpec, ClonedDomain, DomainState, HostResources, HypervisorDriver, HypervisorResult,
    };
    use fluidsh_store::{InMemoryStore, StateStore};
    use fluidsh_types::{AgentId, HostId};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    /// Crash recovery never touches the hypervisor driver; every
    /// method here is unreachable from these tests.
    struct NoopDriver;

    #[async_trait]
    impl HypervisorDriver for NoopDriver {
        async fn clone_from_vm(&self, _spec: CloneSpec) -> HypervisorResult<ClonedDomain> {
            unreachable!("crash recovery does not clone")
        }
        async fn start(&self, _domain_name: &str) -> HypervisorResult<()> {
            unreachable!()
        }
        async fn stop(&self, _domain_name: &str, _force: bool, _grace_period: Duration) -> HypervisorResult<()> {
            unreachable!()
        }
        async fn destroy(&self, _domain_name: &str) -> HypervisorResult<()> {
            unreachable!()
        }
        async fn snapshot(&self, _domain_name: &str, _snapshot_name: &str) -> HypervisorResult<()> {
            unreachable!()
        }
        async fn get_state(&self, _domain_name: &str) -> HypervisorResult<DomainState> {
            unreachable!()
        }
        async fn validate(&self, _source: &str) -> HypervisorResult<()> {
            unreachable!()
        }
        async fn check_resources(&self, _min_cpu: u32, _min_memory_mb: u32) -> HypervisorResult<bool> {
            unreachable!()
        }
        async fn host_resources(&self) -> HypervisorResult<HostResources> {
            unreachable!()
        }
        async fn forget_dhcp_lease(&self, _network: &str, _mac: &str) -> HypervisorResult<()> {
            unreachable!()
        }
    }

    async fn test_manager(work_dir: std::path::PathBuf) -> SandboxManager {
        let ca_dir = tempdir().unwrap();
        let ca = CertificateAuthority::init(
            ca_dir.path(),
            Duration::from_secs(60),
            Duration::from_secs(3600),
            Duration::from_secs(1800),
            Duration::from_secs(60),
        )
        .await
        .unwrap();
        let credentials = CredentialCache::new(Arc::new(ca), ca_dir.path().join("keys"), Duration::from_secs(30));

        SandboxManager::new(
            HostId::generate(),
            Arc::new(NoopDriver),
            Arc::new(InMemoryStore::new()),
            Arc::new(credentials),
            work_dir,
            Duration::from_secs(15),
            Duration::from_secs(120),
        )
    }

    fn metadata_for(id: SandboxId, ip: Option<&str>) -> SandboxMetadata {
        SandboxMetadata {
            sandbox_id: id,
            domain_name: "sbx-recovered".to_string(),
            tap_name: "tap-abc123".to_string(),
            mac: "52:54:00:aa:bb:cc".to_string(),
            bridge: "virbr0".to_string(),
            vcpu: 2,
            memory_mb: 2048,
            agent_id: AgentId::generate(),
            base_image: "ubuntu-22.04".to_string(),
            source_vm: None,
            ttl_seconds: 3600,
            created_at: chrono::Utc::now(),
            ip: ip.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn recover_rebuilds_a_running_sandbox_from_metadata_alone() {
        let root = tempdir().unwrap();
        let manager = test_manager(root.path().to_path_buf()).await;

        let id = SandboxId::generate();
        let dir = root.path().join(id.as_uuid().to_string());
        tokio::fs::create_dir_all(&dir).await.unwrap();

        metadata_for(id, Some("192.0.2.20")).write(&dir).await.unwrap();
        metadata::write_pid(&dir, std::process::id()).await.unwrap();

        // The store is empty, as it is after a real restart: this is
        // the case that used to make every live sandbox unreadable.
        let report = manager.recover().await.unwrap();
        assert_eq!(report.recovered, 1);
        assert_eq!(report.skipped_dead, 0);
        assert_eq!(report.skipped_unreadable, 0);

        let recovered = manager.store().get_sandbox(id).await.unwrap();
        assert_eq!(recovered.state, SandboxState::Running);
        assert_eq!(recovered.mac, "52:54:00:aa:bb:cc");
        assert_eq!(recovered.tap_name, "tap-abc123");
        assert_eq!(recovered.ip.as_deref(), Some("192.0.2.20"));
    }

    #[tokio::test]
    async fn recover_skips_a_directory_whose_pid_is_dead() {
        let root = tempdir().unwrap();
        let manager = test_manager(root.path().to_path_buf()).await;

        let id = SandboxId::generate();
        let dir = root.path().join(id.as_uuid().to_string());
        tokio::fs::create_dir_all(&dir).await.unwrap();

        metadata_for(id, None).write(&dir).await.unwrap();
        metadata::write_pid(&dir, u32::MAX - 1).await.unwrap();

        let report = manager.recover().await.unwrap();
        assert_eq!(report.recovered, 0);
        assert_eq!(report.skipped_dead, 1);
        assert!(manager.store().get_sandbox(id).await.is_err());
    }

    #[test]
    fn sandbox_id_round_trips_through_its_full_uuid_directory_name() {
        let id = SandboxId::generate();
        let dir_name = id.as_uuid().to_string();
        let parsed = Uuid::parse_str(&dir_name).map(SandboxId::from_uuid).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn non_sandbox_directory_names_fail_to_parse() {
        assert!(Uuid::parse_str("lost+found").is_err());
        assert!(Uuid::parse_str(".tmp12345").is_err());
    }
}
