//! SSH CA and credential cache error types.

use fluidsh_types::CredentialTarget;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaError {
    #[error("ca private key at {0:?} has group or world permission bits set; refusing to sign")]
    InsecureKeyPermissions(std::path::PathBuf),

    #[error("credential directory for {0} has group or world permission bits set")]
    InsecureCredentialPermissions(CredentialTarget),

    #[error("principal {0:?} is not one of the two recognized principals (sandbox, fluid-readonly)")]
    UnknownPrincipal(String),

    #[error("ssh key operation failed: {0}")]
    SshKey(#[from] ssh_key::Error),

    #[error("crypto error: {0}")]
    Crypto(#[from] fluidsh_crypto::CryptoError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CaResult<T> = std::result::Result<T, CaError>;
