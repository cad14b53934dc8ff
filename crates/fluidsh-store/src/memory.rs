//! In-memory [`StateStore`] used by the host daemon's embedded store
//! and by tests throughout the workspace.

use std::collections::HashMap;

use async_trait::async_trait;
use fluidsh_types::{CommandId, CommandRecord, HostId, HostRecord, Sandbox, SandboxId, SourceVm};
use tokio::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::StateStore;

#[derive(Debug, Default)]
struct Tables {
    sandboxes: HashMap<SandboxId, Sandbox>,
    commands: HashMap<CommandId, CommandRecord>,
    commands_by_sandbox: HashMap<SandboxId, Vec<CommandId>>,
    source_vms: HashMap<String, SourceVm>,
    hosts: HashMap<HostId, HostRecord>,
    host_token_hashes: HashMap<HostId, String>,
}

/// A lock-guarded, process-local [`StateStore`].
///
/// Suitable for the host daemon (one process, one set of sandboxes)
/// and for tests. A cluster-wide control plane store would implement
/// the same trait against a real database instead.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    async fn upsert_sandbox(&self, sandbox: Sandbox) -> StoreResult<()> {
        self.tables.write().await.sandboxes.insert(sandbox.id, sandbox);
        Ok(())
    }

    async fn get_sandbox(&self, id: SandboxId) -> StoreResult<Sandbox> {
        self.tables
            .read()
            .await
            .sandboxes
            .get(&id)
            .cloned()
            .ok_or(StoreError::SandboxNotFound(id))
    }

    async fn soft_delete_sandbox(&self, id: SandboxId) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let sandbox = tables
            .sandboxes
            .get_mut(&id)
            .ok_or(StoreError::SandboxNotFound(id))?;
        sandbox.soft_delete(chrono::Utc::now());
        Ok(())
    }

    async fn list_active_sandboxes(&self, host_id: Option<HostId>) -> StoreResult<Vec<Sandbox>> {
        let tables = self.tables.read().await;
        Ok(tables
            .sandboxes
            .values()
            .filter(|s| !s.is_deleted())
            .filter(|s| host_id.is_none_or(|h| s.host_id == h))
            .cloned()
            .collect())
    }

    async fn find_active_sandbox_by_ip(&self, ip: &str) -> StoreResult<Option<Sandbox>> {
        let tables = self.tables.read().await;
        Ok(tables
            .sandboxes
            .values()
            .find(|s| !s.is_deleted() && s.ip.as_deref() == Some(ip))
            .cloned())
    }

    async fn append_command(&self, record: CommandRecord) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables
            .commands_by_sandbox
            .entry(record.sandbox_id)
            .or_default()
            .push(record.id);
        tables.commands.insert(record.id, record);
        Ok(())
    }

    async fn get_command(&self, id: CommandId) -> StoreResult<Option<CommandRecord>> {
        Ok(self.tables.read().await.commands.get(&id).cloned())
    }

    async fn list_commands_for_sandbox(
        &self,
        sandbox_id: SandboxId,
    ) -> StoreResult<Vec<CommandRecord>> {
        let tables = self.tables.read().await;
        let Some(ids) = tables.commands_by_sandbox.get(&sandbox_id) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| tables.commands.get(id).cloned())
            .collect())
    }

    async fn upsert_source_vm(&self, vm: SourceVm) -> StoreResult<()> {
        self.tables.write().await.source_vms.insert(vm.name.clone(), vm);
        Ok(())
    }

    async fn get_source_vm(&self, name: &str) -> StoreResult<SourceVm> {
        self.tables
            .read()
            .await
            .source_vms
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::SourceVmNotFound(name.to_string()))
    }

    async fn list_source_vms(&self) -> StoreResult<Vec<SourceVm>> {
        Ok(self.tables.read().await.source_vms.values().cloned().collect())
    }

    async fn upsert_host(&self, host: HostRecord) -> StoreResult<()> {
        self.tables.write().await.hosts.insert(host.id, host);
        Ok(())
    }

    async fn get_host(&self, id: HostId) -> StoreResult<HostRecord> {
        self.tables
            .read()
            .await
            .hosts
            .get(&id)
            .cloned()
            .ok_or(StoreError::HostNotFound(id))
    }

    async fn list_hosts(&self) -> StoreResult<Vec<HostRecord>> {
        Ok(self.tables.read().await.hosts.values().cloned().collect())
    }

    async fn set_host_token_hash(&self, host_id: HostId, token_hash: String) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .host_token_hashes
            .insert(host_id, token_hash);
        Ok(())
    }

    async fn verify_host_token(&self, host_id: HostId, token_hash: &str) -> StoreResult<bool> {
        let tables = self.tables.read().await;
        Ok(tables
            .host_token_hashes
            .get(&host_id)
            .is_some_and(|stored| stored == token_hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fluidsh_types::{AgentId, HostId, ResourceSnapshot, SandboxId};

    fn sample_sandbox() -> Sandbox {
        Sandbox::new(
            SandboxId::generate(),
            HostId::generate(),
            AgentId::generate(),
            "base-ubuntu-22.04",
            None,
            "de:ad:be:ef:00:01",
            "tap-abc123",
            2,
            2048,
            3600,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn soft_deleted_sandboxes_are_excluded_from_active_listing() {
        let store = InMemoryStore::new();
        let sandbox = sample_sandbox();
        let id = sandbox.id;
        store.upsert_sandbox(sandbox).await.unwrap();

        assert_eq!(store.list_active_sandboxes(None).await.unwrap().len(), 1);

        store.soft_delete_sandbox(id).await.unwrap();

        assert!(store.list_active_sandboxes(None).await.unwrap().is_empty());
        // but still retrievable directly, and reported as deleted
        let err = store.get_active_sandbox(id).await.unwrap_err();
        assert!(matches!(err, StoreError::SandboxDeleted(_)));
    }

    #[tokio::test]
    async fn ip_uniqueness_lookup_only_considers_active_sandboxes() {
        let store = InMemoryStore::new();
        let mut sandbox = sample_sandbox();
        sandbox.mark_ip("10.1.2.3".to_string(), Utc::now());
        let id = sandbox.id;
        store.upsert_sandbox(sandbox).await.unwrap();

        assert!(store
            .find_active_sandbox_by_ip("10.1.2.3")
            .await
            .unwrap()
            .is_some());

        store.soft_delete_sandbox(id).await.unwrap();

        assert!(store
            .find_active_sandbox_by_ip("10.1.2.3")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn commands_are_retrievable_by_sandbox_in_append_order() {
        let store = InMemoryStore::new();
        let sandbox_id = SandboxId::generate();
        for i in 0..3 {
            let record = CommandRecord {
                id: CommandId::generate(),
                sandbox_id,
                command: format!("echo {i}"),
                stdout: format!("{i}\n"),
                stderr: String::new(),
                exit_code: 0,
                duration_ms: 5,
                started_at: Utc::now(),
                ended_at: Utc::now(),
            };
            store.append_command(record).await.unwrap();
        }

        let commands = store.list_commands_for_sandbox(sandbox_id).await.unwrap();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0].command, "echo 0");
        assert_eq!(commands[2].command, "echo 2");
    }

    #[tokio::test]
    async fn host_token_verification_matches_only_the_stored_hash() {
        let store = InMemoryStore::new();
        let host_id = HostId::generate();
        let host = HostRecord {
            id: host_id,
            hostname: "host-1".to_string(),
            version: "0.3.0".to_string(),
            advertised_images: vec!["base-ubuntu-22.04".to_string()],
            source_vms: vec![],
            resources: ResourceSnapshot {
                available_cpus: 8,
                available_memory_mb: 16_384,
                active_sandboxes: 0,
            },
            last_heartbeat: Utc::now(),
            connected: true,
        };
        store.upsert_host(host.clone()).await.unwrap();
        store
            .set_host_token_hash(host_id, "abc123".to_string())
            .await
            .unwrap();

        assert!(store.verify_host_token(host_id, "abc123").await.unwrap());
        assert!(!store.verify_host_token(host_id, "wrong").await.unwrap());
        assert_eq!(store.get_host(host_id).await.unwrap().hostname, host.hostname);
    }
}
