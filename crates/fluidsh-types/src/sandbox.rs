use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AgentId, HostId, SandboxId};

/// Lifecycle state of a sandbox.
///
/// Transitions: `Creating -> Running` (after the SSH probe succeeds),
/// `Running <-> Stopped`, any state `-> Error` on unrecoverable failure,
/// any state `-> Destroyed` on destroy. `Creating` only terminates on
/// failure if overlay/domain creation fails before start; later failures
/// roll back to the not-yet-defined side instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SandboxState {
    Creating,
    Running,
    Stopped,
    Error,
    Destroyed,
}

impl SandboxState {
    /// Whether a sandbox in this state may still serve `RunCommand`.
    pub fn is_reachable(&self) -> bool {
        matches!(self, SandboxState::Running)
    }

    /// Whether this state is terminal — no further lifecycle transitions
    /// are expected once reached.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SandboxState::Destroyed)
    }
}

/// A sandbox: an ephemeral VM cloned from a base image or source VM via a
/// CoW overlay.
///
/// Mutated on start/stop/ip-change; soft-deleted (via `deleted_at`) on
/// destroy. [`SandboxId`] is globally unique, never reused, and is not
/// scoped to a particular host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sandbox {
    pub id: SandboxId,
    pub host_id: HostId,
    pub agent_id: AgentId,
    pub base_image: String,
    /// Name of the source VM this sandbox was cloned from, if any (as
    /// opposed to a plain base image).
    pub source_vm: Option<String>,
    pub mac: String,
    pub tap_name: String,
    pub ip: Option<String>,
    pub state: SandboxState,
    pub vcpu: u32,
    pub memory_mb: u32,
    pub ttl_seconds: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Sandbox {
    /// Creates a new sandbox record in state `Creating`, with no IP yet
    /// discovered and no deletion timestamp.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: SandboxId,
        host_id: HostId,
        agent_id: AgentId,
        base_image: impl Into<String>,
        source_vm: Option<String>,
        mac: impl Into<String>,
        tap_name: impl Into<String>,
        vcpu: u32,
        memory_mb: u32,
        ttl_seconds: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            host_id,
            agent_id,
            base_image: base_image.into(),
            source_vm,
            mac: mac.into(),
            tap_name: tap_name.into(),
            ip: None,
            state: SandboxState::Creating,
            vcpu,
            memory_mb,
            ttl_seconds,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Whether this record has been soft-deleted. Soft-deleted sandboxes
    /// are filtered from all queries except the audit/compliance escape
    /// hatch.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether `CreatedAt + max(TTL, defaultTTL) < now`, i.e. the janitor
    /// should reap this sandbox.
    pub fn is_expired(&self, default_ttl_seconds: u64, now: DateTime<Utc>) -> bool {
        if self.is_deleted() {
            return false;
        }
        let ttl = self.ttl_seconds.max(default_ttl_seconds);
        let expires_at = self.created_at + chrono::Duration::seconds(ttl as i64);
        expires_at < now
    }

    pub fn mark_ip(&mut self, ip: String, now: DateTime<Utc>) {
        self.ip = Some(ip);
        self.updated_at = now;
    }

    pub fn transition(&mut self, state: SandboxState, now: DateTime<Utc>) {
        self.state = state;
        self.updated_at = now;
    }

    pub fn soft_delete(&mut self, now: DateTime<Utc>) {
        self.state = SandboxState::Destroyed;
        self.deleted_at = Some(now);
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox_at(created_at: DateTime<Utc>, ttl_seconds: u64) -> Sandbox {
        Sandbox::new(
            SandboxId::generate(),
            HostId::generate(),
            AgentId::generate(),
            "ubuntu-22.04",
            None,
            "52:54:00:aa:bb:cc",
            "tap-sbx0",
            2,
            2048,
            ttl_seconds,
            created_at,
        )
    }

    #[test]
    fn expiry_uses_max_of_sandbox_and_default_ttl() {
        let created_at = Utc::now() - chrono::Duration::seconds(100);
        let sbx = sandbox_at(created_at, 50);
        // sandbox TTL (50s) has passed but default (200s) has not.
        assert!(!sbx.is_expired(200, Utc::now()));
        assert!(sbx.is_expired(50, Utc::now()));
    }

    #[test]
    fn soft_deleted_sandboxes_are_never_reported_expired() {
        let created_at = Utc::now() - chrono::Duration::seconds(1000);
        let mut sbx = sandbox_at(created_at, 1);
        sbx.soft_delete(Utc::now());
        assert!(!sbx.is_expired(1, Utc::now()));
    }

    #[test]
    fn running_state_is_reachable_others_are_not() {
        assert!(SandboxState::Running.is_reachable());
        assert!(!SandboxState::Creating.is_reachable());
        assert!(!SandboxState::Stopped.is_reachable());
    }
}
