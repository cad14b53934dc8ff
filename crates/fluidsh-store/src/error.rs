//! Store error types.

use fluidsh_types::{HostId, SandboxId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sandbox {0} not found")]
    SandboxNotFound(SandboxId),

    #[error("sandbox {0} has been deleted")]
    SandboxDeleted(SandboxId),

    #[error("host {0} not found")]
    HostNotFound(HostId),

    #[error("source vm {0:?} not found")]
    SourceVmNotFound(String),

    #[error("an active sandbox with ip {0} already exists")]
    DuplicateIp(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
