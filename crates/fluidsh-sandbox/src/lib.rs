//! # fluidsh-sandbox: Sandbox Lifecycle Manager (§4.2)
//!
//! Per-host clone/start/stop/destroy of ephemeral VMs, crash recovery
//! on daemon restart, TTL-based reaping, and `RunCommand` execution
//! over SSH with certificate auth via [`fluidsh_ca`].

mod command;
mod error;
mod janitor;
mod manager;
mod metadata;
mod recovery;

pub use error::{SandboxError, SandboxResult};
pub use janitor::spawn as spawn_janitor;
pub use manager::{CreateSandboxRequest, SandboxManager};
pub use metadata::SandboxMetadata;
pub use recovery::RecoveryReport;
