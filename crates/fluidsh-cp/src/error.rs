//! Control plane error type and its `{"error": string}` REST mapping
//! (§6 "All request and response bodies are JSON; 4xx/5xx responses
//! carry `{"error": string}`").

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use fluidsh_types::SandboxId;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CpError {
    #[error("sandbox {0} was not found")]
    SandboxNotFound(SandboxId),

    #[error("source vm {0:?} was not found")]
    SourceVmNotFound(String),

    #[error("host {0} was not found")]
    HostNotFound(fluidsh_types::HostId),

    #[error("exactly one of base_image or source_vm must be set")]
    AmbiguousSource,

    #[error("sandbox {0} has no discovered ip yet")]
    NoIpYet(SandboxId),

    #[error("registry error: {0}")]
    Registry(#[from] fluidsh_registry::RegistryError),

    #[error("read-only validation rejected the command: {0}")]
    ReadonlyRejected(String),

    #[error("host reported an error: {0}")]
    HostError(String),

    #[error("store error: {0}")]
    Store(#[from] fluidsh_store::StoreError),
}

impl CpError {
    /// Maps this error to the `ErrorKind` a host-side failure would
    /// carry (§7), for callers that want to decide whether to retry
    /// without matching on every REST-only variant.
    fn status(&self) -> StatusCode {
        match self {
            CpError::SandboxNotFound(_) | CpError::SourceVmNotFound(_) | CpError::HostNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            CpError::AmbiguousSource | CpError::ReadonlyRejected(_) => StatusCode::BAD_REQUEST,
            CpError::NoIpYet(_) => StatusCode::CONFLICT,
            CpError::Registry(fluidsh_registry::RegistryError::PlacementExhausted { .. })
            | CpError::Registry(fluidsh_registry::RegistryError::SourceVmNotPlaced(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            CpError::Registry(fluidsh_registry::RegistryError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            CpError::Registry(_) | CpError::HostError(_) | CpError::Store(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for CpError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

pub type CpResult<T> = std::result::Result<T, CpError>;
