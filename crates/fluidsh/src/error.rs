use thiserror::Error;

/// Errors a [`crate::Client`] call can fail with.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to the control plane failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("control plane returned {status}: {message}")]
    Api { status: reqwest::StatusCode, message: String },

    #[error("decoding control plane response: {0}")]
    Decode(String),
}

pub type ClientResult<T> = Result<T, ClientError>;
