//! Wire protocol error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("encode failed: {0}")]
    Encode(postcard::Error),

    #[error("decode failed: {0}")]
    Decode(postcard::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stream closed")]
    StreamClosed,

    #[error("frame exceeded maximum length ({0} bytes)")]
    FrameTooLarge(usize),
}

pub type WireResult<T> = std::result::Result<T, WireError>;
