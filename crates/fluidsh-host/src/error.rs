//! Host daemon error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("control plane rejected registration: {0}")]
    RegistrationRejected(String),

    #[error("control plane closed the stream before registration completed")]
    HandshakeIncomplete,

    #[error("wire error: {0}")]
    Wire(#[from] fluidsh_wire::WireError),

    #[error("registry handshake error: {0}")]
    Registry(#[from] fluidsh_registry::RegistryError),

    #[error("sandbox error: {0}")]
    Sandbox(#[from] fluidsh_sandbox::SandboxError),

    #[error("hypervisor error: {0}")]
    Hypervisor(#[from] fluidsh_hypervisor::HypervisorError),

    #[error("readonly error: {0}")]
    Readonly(#[from] fluidsh_readonly::ReadonlyError),

    #[error("ca error: {0}")]
    Ca(#[from] fluidsh_ca::CaError),

    #[error("store error: {0}")]
    Store(#[from] fluidsh_store::StoreError),

    #[error("config error: {0}")]
    Config(#[from] fluidsh_config::ConfigError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type HostResult<T> = std::result::Result<T, HostError>;
