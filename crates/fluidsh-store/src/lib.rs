//! Persisted state for sandboxes, run commands, source VMs, and hosts.
//!
//! [`StateStore`] is the single trait both the host daemon (embedded,
//! per-host state) and the control plane (cluster-wide state) build on.
//! Schemas are never wire-visible (§6) — each side keeps its own store
//! and only exchanges [`fluidsh_wire`] messages. [`InMemoryStore`] is
//! the reference implementation; a production control plane would swap
//! in a store backed by a relational database behind the same trait.
//!
//! The soft-delete invariant (§3, §7) — a destroyed sandbox keeps its
//! row with `deleted_at` set rather than being removed — is enforced
//! here, once, at the query layer: every "active" query filters on
//! `deleted_at IS NULL`, so callers never have to remember to do it
//! themselves.

mod error;
mod memory;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;

use async_trait::async_trait;
use fluidsh_types::{CommandId, CommandRecord, HostId, HostRecord, Sandbox, SandboxId, SourceVm};

/// Persistence boundary for every entity in §3.
///
/// All methods are async so a production implementation can hold a
/// real connection pool; [`InMemoryStore`] just takes an uncontended
/// lock.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn upsert_sandbox(&self, sandbox: Sandbox) -> StoreResult<()>;

    /// Fetches a sandbox regardless of soft-delete state.
    async fn get_sandbox(&self, id: SandboxId) -> StoreResult<Sandbox>;

    /// Fetches a sandbox, failing if it has been soft-deleted.
    async fn get_active_sandbox(&self, id: SandboxId) -> StoreResult<Sandbox> {
        let sandbox = self.get_sandbox(id).await?;
        if sandbox.is_deleted() {
            return Err(StoreError::SandboxDeleted(id));
        }
        Ok(sandbox)
    }

    async fn soft_delete_sandbox(&self, id: SandboxId) -> StoreResult<()>;

    /// Lists non-deleted sandboxes, optionally scoped to one host.
    async fn list_active_sandboxes(&self, host_id: Option<HostId>) -> StoreResult<Vec<Sandbox>>;

    /// Looks up a non-deleted sandbox by its assigned IP, for the
    /// uniqueness check run before a new lease is accepted (§3, §4.6).
    async fn find_active_sandbox_by_ip(&self, ip: &str) -> StoreResult<Option<Sandbox>>;

    async fn append_command(&self, record: CommandRecord) -> StoreResult<()>;

    async fn get_command(&self, id: CommandId) -> StoreResult<Option<CommandRecord>>;

    async fn list_commands_for_sandbox(
        &self,
        sandbox_id: SandboxId,
    ) -> StoreResult<Vec<CommandRecord>>;

    async fn upsert_source_vm(&self, vm: SourceVm) -> StoreResult<()>;

    async fn get_source_vm(&self, name: &str) -> StoreResult<SourceVm>;

    async fn list_source_vms(&self) -> StoreResult<Vec<SourceVm>>;

    async fn upsert_host(&self, host: HostRecord) -> StoreResult<()>;

    async fn get_host(&self, id: HostId) -> StoreResult<HostRecord>;

    async fn list_hosts(&self) -> StoreResult<Vec<HostRecord>>;

    /// Records the SHA-256 hex digest of a host's bearer token. Only
    /// the digest is ever persisted (§6); the token itself never
    /// touches the store.
    async fn set_host_token_hash(&self, host_id: HostId, token_hash: String) -> StoreResult<()>;

    /// Compares a presented token's digest against the stored one in
    /// constant-ish time via string equality on hex digests (both
    /// sides are already fixed-length SHA-256 hex).
    async fn verify_host_token(&self, host_id: HostId, token_hash: &str) -> StoreResult<bool>;
}
