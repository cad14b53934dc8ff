//! Registry and multiplexer error types.

use fluidsh_types::HostId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("host {0} is not currently connected")]
    HostNotConnected(HostId),

    #[error("send-and-wait to host {0} timed out")]
    Timeout(HostId),

    #[error("stream to host {0} dropped before a response arrived")]
    StreamDropped(HostId),

    #[error("host rejected registration: {0}")]
    RegistrationRejected(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("no host is eligible to run image {image:?}")]
    PlacementExhausted { image: String },

    #[error("no connected host advertises source vm {0:?}")]
    SourceVmNotPlaced(String),

    #[error("wire error: {0}")]
    Wire(#[from] fluidsh_wire::WireError),

    #[error("store error: {0}")]
    Store(#[from] fluidsh_store::StoreError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;
