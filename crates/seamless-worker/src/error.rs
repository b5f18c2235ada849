//! Error type for the out-of-process worker runtime and its IPC transport.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to spawn worker process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("IPC transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode IPC message: {0}")]
    Encode(String),

    #[error("failed to decode IPC message: {0}")]
    Decode(String),

    #[error("IPC message exceeds the {0} byte limit")]
    MessageTooLarge(usize),

    #[error("worker process reported an error: {0}")]
    Remote(String),

    #[error("worker process exited unexpectedly")]
    ProcessGone,

    #[error(transparent)]
    Core(#[from] seamless_core::Error),
}
