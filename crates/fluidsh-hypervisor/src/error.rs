//! Hypervisor driver error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HypervisorError {
    #[error("virsh invocation failed: {0}")]
    CommandFailed(String),

    #[error("domain {0:?} not found")]
    DomainNotFound(String),

    #[error("source {0:?} is not a valid clone source")]
    InvalidSource(String),

    #[error("ip discovery for domain {0:?} timed out after {1:?}")]
    IpDiscoveryTimedOut(String, std::time::Duration),

    #[error("domain xml for {0:?} had no usable disk definition")]
    MalformedDomainXml(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type HypervisorResult<T> = std::result::Result<T, HypervisorError>;
