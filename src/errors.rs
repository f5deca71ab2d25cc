//! Error types for the connection pool

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Failed to establish a new connection: {0}")]
    Dial(#[source] io::Error),

    #[error("Failed to close a pooled connection: {0}")]
    Close(#[source] io::Error),

    #[error("Failed to start the reaper thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("Operation was cancelled")]
    Cancelled,
}

impl PoolError {
    /// The underlying I/O error, if any.
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            PoolError::Dial(e) | PoolError::Close(e) | PoolError::Spawn(e) => Some(e),
            PoolError::Cancelled => None,
        }
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
