use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable opaque identifier for a registered host.
///
/// Assigned by the control plane on first successful registration and
/// never reused. Hosts persist their assigned ID locally so reconnects
/// keep the same identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HostId(Uuid);

impl HostId {
    /// Generates a fresh, random host ID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Restores a host ID from its wire/storage representation.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for HostId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<HostId> for Uuid {
    fn from(id: HostId) -> Self {
        id.0
    }
}

/// Opaque identifier for a sandbox, rendered as `SBX-<8 hex>`.
///
/// Globally unique: hosts never reuse IDs, and IDs are not scoped to a
/// particular host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SandboxId(Uuid);

impl SandboxId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// The short hex suffix used in the `SBX-<8 hex>` rendering and in
    /// filesystem paths under the host's working directory.
    pub fn short_hex(&self) -> String {
        let bytes = self.0.as_bytes();
        bytes[..4].iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SBX-{}", self.short_hex())
    }
}

impl From<Uuid> for SandboxId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<SandboxId> for Uuid {
    fn from(id: SandboxId) -> Self {
        id.0
    }
}

/// Identifier for the agent (the autonomous caller) that owns a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(Uuid);

impl AgentId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for AgentId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<AgentId> for Uuid {
    fn from(id: AgentId) -> Self {
        id.0
    }
}

/// Identifier for an append-only command record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommandId(Uuid);

impl CommandId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for CommandId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<CommandId> for Uuid {
    fn from(id: CommandId) -> Self {
        id.0
    }
}

/// Correlates one outgoing `ControlMessage` with its matching `HostMessage`
/// response on a host's stream. Scoped to a single `(HostId, RequestId)`
/// pending-request slot; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<RequestId> for Uuid {
    fn from(id: RequestId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_id_display_is_sbx_prefixed_8_hex() {
        let id = SandboxId::generate();
        let s = id.to_string();
        assert_eq!(s.len(), "SBX-".len() + 8);
        assert!(s.starts_with("SBX-"));
        assert!(s["SBX-".len()..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn ids_are_distinct_across_generate_calls() {
        assert_ne!(HostId::generate(), HostId::generate());
        assert_ne!(SandboxId::generate(), SandboxId::generate());
    }
}
