//! Read-only enforcement error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReadonlyError {
    #[error("blocked: {0}")]
    Blocked(String),

    #[error("command is empty after parsing")]
    EmptyCommand,

    #[error("unclosed quote in command")]
    UnclosedQuote,

    #[error("admin connection failed: {0}")]
    Connection(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ReadonlyResult<T> = std::result::Result<T, ReadonlyError>;
