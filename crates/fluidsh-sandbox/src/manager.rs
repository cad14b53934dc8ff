//! The per-host [`SandboxManager`] (§4.2): clone, start, stop, destroy,
//! and the state transitions between them. Held behind `Arc` by the
//! host daemon; every operation takes its own sandbox by ID so callers
//! never hold a lock across an SSH round trip.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fluidsh_ca::CredentialCache;
use fluidsh_hypervisor::{CloneSpec, HypervisorDriver};
use fluidsh_store::StateStore;
use fluidsh_types::{
    AgentId, CredentialTarget, HostId, Sandbox, SandboxId, SandboxState,
};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::error::{SandboxError, SandboxResult};
use crate::metadata::SandboxMetadata;

const SSH_PROBE_ATTEMPTS: u32 = 5;
const SSH_PROBE_INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const SSH_PROBE_MAX_BACKOFF: Duration = Duration::from_secs(30);
const DESTROY_GRACE_PERIOD: Duration = Duration::from_secs(20);

/// Inputs the caller (the host daemon's `ControlMessage` handler)
/// supplies for a new sandbox; everything else the manager derives.
#[derive(Debug, Clone)]
pub struct CreateSandboxRequest {
    pub agent_id: AgentId,
    pub source: String,
    pub is_source_vm: bool,
    pub vcpu: u32,
    pub memory_mb: u32,
    pub network: String,
    pub ttl_seconds: u64,
}

/// Per-host sandbox lifecycle manager (§4.2). Holds no sandbox state
/// of its own beyond in-flight per-sandbox locks; the authoritative
/// record lives in the [`StateStore`].
pub struct SandboxManager {
    host_id: HostId,
    driver: Arc<dyn HypervisorDriver>,
    store: Arc<dyn StateStore>,
    credentials: Arc<CredentialCache>,
    work_dir: PathBuf,
    ssh_connect_timeout: Duration,
    ip_discovery_timeout: Duration,
    /// One lock per sandbox so concurrent operations against the same
    /// sandbox (e.g. a stop racing a destroy) serialize instead of
    /// interleaving hypervisor calls.
    locks: Mutex<HashMap<SandboxId, Arc<Mutex<()>>>>,
}

impl SandboxManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        host_id: HostId,
        driver: Arc<dyn HypervisorDriver>,
        store: Arc<dyn StateStore>,
        credentials: Arc<CredentialCache>,
        work_dir: PathBuf,
        ssh_connect_timeout: Duration,
        ip_discovery_timeout: Duration,
    ) -> Self {
        Self {
            host_id,
            driver,
            store,
            credentials,
            work_dir,
            ssh_connect_timeout,
            ip_discovery_timeout,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, id: SandboxId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Directory name is the sandbox's full UUID rather than its
    /// `SBX-`-prefixed display form, so crash recovery can parse it
    /// back losslessly (the display form only carries 4 bytes).
    pub(crate) fn sandbox_dir(&self, id: SandboxId) -> PathBuf {
        self.work_dir.join(id.as_uuid().to_string())
    }

    pub(crate) fn work_dir_path(&self) -> &Path {
        &self.work_dir
    }

    pub(crate) fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub(crate) fn host_id(&self) -> HostId {
        self.host_id
    }

    pub(crate) fn credentials(&self) -> &Arc<CredentialCache> {
        &self.credentials
    }

    pub(crate) fn ssh_connect_timeout(&self) -> Duration {
        self.ssh_connect_timeout
    }

    pub(crate) fn ip_discovery_timeout(&self) -> Duration {
        self.ip_discovery_timeout
    }

    /// Clone, boot, and probe a new sandbox (§4.2 "Clone", steps 1-8).
    #[instrument(skip(self, request), fields(source = %request.source))]
    pub async fn create(&self, request: CreateSandboxRequest) -> SandboxResult<Sandbox> {
        let id = SandboxId::generate();
        let _guard = self.lock_for(id).await.lock_owned().await;
        let dir = self.sandbox_dir(id);
        tokio::fs::create_dir_all(&dir).await?;
        set_owner_only(&dir).await?;

        let clone_spec = CloneSpec {
            source: request.source.clone(),
            new_name: format!("sbx-{}", id.short_hex()),
            vcpu: request.vcpu,
            memory_mb: request.memory_mb,
            network: request.network.clone(),
            work_dir: dir.clone(),
        };

        let cloned = match self.driver.clone_from_vm(clone_spec).await {
            Ok(cloned) => cloned,
            Err(err) => {
                let _ = tokio::fs::remove_dir_all(&dir).await;
                return Err(err.into());
            }
        };

        let now = Utc::now();
        let mut sandbox = Sandbox::new(
            id,
            self.host_id,
            request.agent_id,
            request.source.clone(),
            request.is_source_vm.then_some(request.source.clone()),
            cloned.mac.clone(),
            cloned.tap_name.clone(),
            request.vcpu,
            request.memory_mb,
            request.ttl_seconds,
            now,
        );
        self.store.upsert_sandbox(sandbox.clone()).await?;

        let metadata = SandboxMetadata {
            sandbox_id: id,
            domain_name: cloned.domain_name.clone(),
            tap_name: cloned.tap_name.clone(),
            mac: cloned.mac.clone(),
            bridge: request.network.clone(),
            vcpu: request.vcpu,
            memory_mb: request.memory_mb,
            agent_id: request.agent_id,
            base_image: request.source.clone(),
            source_vm: request.is_source_vm.then_some(request.source.clone()),
            ttl_seconds: request.ttl_seconds,
            created_at: now,
            ip: None,
        };
        metadata.write(&dir).await?;

        if let Err(err) = self.bring_up(&mut sandbox, &cloned.domain_name, &dir).await {
            warn!(%id, error = %err, "create failed after domain definition; rolling back");
            let _ = self.driver.destroy(&cloned.domain_name).await;
            let _ = tokio::fs::remove_dir_all(&dir).await;
            sandbox.transition(SandboxState::Error, Utc::now());
            self.store.upsert_sandbox(sandbox.clone()).await?;
            return Err(err);
        }

        info!(%id, ip = ?sandbox.ip, "sandbox created");
        Ok(sandbox)
    }

    /// Steps 7-8 of Clone: IP discovery, then the SSH reachability
    /// probe with certificate auth. Shared with [`Self::start`], which
    /// re-runs the same two steps after a stopped domain reboots.
    ///
    /// `dir` is the sandbox's working directory; the discovered IP is
    /// written back into its metadata file so a crash recovery scan
    /// can report it without re-probing (§8 scenario 6).
    async fn bring_up(&self, sandbox: &mut Sandbox, domain_name: &str, dir: &Path) -> SandboxResult<()> {
        let ip = fluidsh_hypervisor::discover_ip_with_timeout(
            domain_name,
            &sandbox.mac,
            self.ip_discovery_timeout,
        )
        .await
        .map_err(|_| SandboxError::IpDiscoveryTimedOut(sandbox.id))?;

        sandbox.mark_ip(ip.clone(), Utc::now());
        self.store.upsert_sandbox(sandbox.clone()).await?;

        if let Ok(mut metadata) = SandboxMetadata::read(dir).await {
            metadata.ip = Some(ip.clone());
            metadata.write(dir).await?;
        }

        self.probe_ssh(sandbox.id, &ip).await?;

        sandbox.transition(SandboxState::Running, Utc::now());
        self.store.upsert_sandbox(sandbox.clone()).await?;
        Ok(())
    }

    /// Probes SSH reachability with certificate auth, retrying with
    /// backoff 2->30s capped, up to 5 attempts (§4.2 step 8).
    async fn probe_ssh(&self, id: SandboxId, ip: &str) -> SandboxResult<()> {
        let target = CredentialTarget::Sandbox(id);
        let mut backoff = SSH_PROBE_INITIAL_BACKOFF;

        for attempt in 1..=SSH_PROBE_ATTEMPTS {
            let credential = self
                .credentials
                .get_or_refresh(&target, fluidsh_ca::Principal::Sandbox, "fluidsh", "sandbox", None)
                .await?;

            match crate::command::probe(id, ip, &credential, self.ssh_connect_timeout).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt == SSH_PROBE_ATTEMPTS => {
                    warn!(%id, attempt, error = %err, "ssh probe exhausted retries");
                    return Err(SandboxError::SshProbeFailed(id));
                }
                Err(err) => {
                    warn!(%id, attempt, error = %err, "ssh probe failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(SSH_PROBE_MAX_BACKOFF);
                }
            }
        }
        Err(SandboxError::SshProbeFailed(id))
    }

    /// Boots a stopped domain and refreshes its IP (§4.2 "Start").
    #[instrument(skip(self))]
    pub async fn start(&self, id: SandboxId) -> SandboxResult<Sandbox> {
        let _guard = self.lock_for(id).await.lock_owned().await;
        let mut sandbox = self.store.get_active_sandbox(id).await?;
        if sandbox.state.is_terminal() {
            return Err(SandboxError::AlreadyTerminal(id));
        }

        let dir = self.sandbox_dir(id);
        let metadata = SandboxMetadata::read(&dir).await?;
        self.driver.start(&metadata.domain_name).await?;
        self.bring_up(&mut sandbox, &metadata.domain_name, &dir).await?;
        Ok(sandbox)
    }

    /// Gracefully shuts a domain down, escalating to force after a
    /// grace period (§4.2 "Stop").
    #[instrument(skip(self))]
    pub async fn stop(&self, id: SandboxId, force: bool) -> SandboxResult<Sandbox> {
        let _guard = self.lock_for(id).await.lock_owned().await;
        let mut sandbox = self.store.get_active_sandbox(id).await?;
        if sandbox.state.is_terminal() {
            return Err(SandboxError::AlreadyTerminal(id));
        }

        let metadata = SandboxMetadata::read(&self.sandbox_dir(id)).await?;
        self.driver
            .stop(&metadata.domain_name, force, DESTROY_GRACE_PERIOD)
            .await?;

        sandbox.transition(SandboxState::Stopped, Utc::now());
        self.store.upsert_sandbox(sandbox.clone()).await?;
        Ok(sandbox)
    }

    /// Tears a sandbox down completely (§4.2 "Destroy"): force-stop,
    /// undefine, forget the DHCP lease, delete the working directory,
    /// purge credentials, soft-delete the record.
    #[instrument(skip(self))]
    pub async fn destroy(&self, id: SandboxId) -> SandboxResult<()> {
        let _guard = self.lock_for(id).await.lock_owned().await;
        let mut sandbox = self.store.get_active_sandbox(id).await?;
        let dir = self.sandbox_dir(id);

        if let Ok(metadata) = SandboxMetadata::read(&dir).await {
            if let Err(err) = self.driver.destroy(&metadata.domain_name).await {
                warn!(%id, error = %err, "hypervisor destroy failed; continuing teardown");
            }
            if let Err(err) = self.driver.forget_dhcp_lease(&metadata.bridge, &metadata.mac).await {
                warn!(%id, error = %err, "failed to forget dhcp lease");
            }
        }

        if tokio::fs::try_exists(&dir).await? {
            tokio::fs::remove_dir_all(&dir).await?;
        }

        self.credentials
            .purge(&CredentialTarget::Sandbox(id))
            .await?;

        sandbox.soft_delete(Utc::now());
        self.store.upsert_sandbox(sandbox).await?;

        self.locks.lock().await.remove(&id);
        info!(%id, "sandbox destroyed");
        Ok(())
    }

    /// Takes an internal disk snapshot of a sandbox's domain, in
    /// whatever state it currently is (§4.2 "Snapshot").
    #[instrument(skip(self))]
    pub async fn snapshot(&self, id: SandboxId, snapshot_name: &str) -> SandboxResult<()> {
        let _guard = self.lock_for(id).await.lock_owned().await;
        // A destroyed sandbox's record is soft-deleted but its work
        // directory may still briefly exist during teardown; snapshot
        // only ever targets a live, non-deleted sandbox.
        self.store.get_active_sandbox(id).await?;

        let metadata = SandboxMetadata::read(&self.sandbox_dir(id)).await?;
        self.driver.snapshot(&metadata.domain_name, snapshot_name).await?;
        info!(%id, snapshot_name, "sandbox snapshot taken");
        Ok(())
    }
}

#[cfg(unix)]
async fn set_owner_only(dir: &std::path::Path) -> SandboxResult<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o700);
    tokio::fs::set_permissions(dir, perms).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_owner_only(_dir: &std::path::Path) -> SandboxResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_dir_is_scoped_under_work_dir_and_keyed_by_full_uuid() {
        // Exercises the pure path-joining logic without standing up a
        // full manager (which needs a driver/store/credential cache).
        let work_dir = PathBuf::from("/var/lib/fluidsh/sandboxes");
        let id = SandboxId::generate();
        let joined = work_dir.join(id.as_uuid().to_string());
        assert!(joined.starts_with(&work_dir));
        assert_eq!(
            joined.file_name().unwrap().to_str().unwrap(),
            id.as_uuid().to_string()
        );
    }
}
