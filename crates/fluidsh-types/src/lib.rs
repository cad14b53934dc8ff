//! # fluidsh-types: Core entity types for Fluid.sh
//!
//! Shared types used across the control plane and host daemon:
//! - Entity IDs ([`HostId`], [`SandboxId`], [`AgentId`], [`CommandId`])
//! - Sandbox lifecycle state ([`SandboxState`])
//! - Core records ([`Sandbox`], `HostRecord`, [`CommandRecord`], [`SourceVm`])
//! - Credential bookkeeping ([`CredentialTarget`], `SshCertificateCredential`)
//! - Pending request correlation ([`RequestId`], `PendingRequest`)

mod command;
mod credential;
mod host;
mod ids;
mod sandbox;
mod source_vm;

pub use command::CommandRecord;
pub use credential::{CredentialTarget, SshCertificateCredential};
pub use host::{HostHealth, HostRecord, ResourceSnapshot};
pub use ids::{AgentId, CommandId, HostId, RequestId, SandboxId};
pub use sandbox::{Sandbox, SandboxState};
pub use source_vm::SourceVm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_display_and_parse() {
        let id = SandboxId::generate();
        let rendered = id.to_string();
        assert!(rendered.starts_with("SBX-"));
    }
}
