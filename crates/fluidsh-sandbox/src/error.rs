//! Sandbox lifecycle error types.

use fluidsh_types::SandboxId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("sandbox {0} not found")]
    NotFound(SandboxId),

    #[error("sandbox {0} is already in a terminal state")]
    AlreadyTerminal(SandboxId),

    #[error("placement target advertises no usable source for {0:?}")]
    InvalidSource(String),

    #[error("ip discovery for sandbox {0} timed out")]
    IpDiscoveryTimedOut(SandboxId),

    #[error("ssh probe for sandbox {0} did not succeed after retries")]
    SshProbeFailed(SandboxId),

    #[error("an active sandbox already holds ip {0}")]
    DuplicateIp(String),

    #[error("hypervisor error: {0}")]
    Hypervisor(#[from] fluidsh_hypervisor::HypervisorError),

    #[error("credential error: {0}")]
    Credential(#[from] fluidsh_ca::CaError),

    #[error("store error: {0}")]
    Store(#[from] fluidsh_store::StoreError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata serialization error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("operation cancelled")]
    Cancelled,
}

pub type SandboxResult<T> = std::result::Result<T, SandboxError>;
