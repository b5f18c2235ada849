//! Error taxonomy for the Seamless core.
//!
//! The kinds mirror the error-handling design: VALIDATION and EXECUTION
//! never unwind the caller (they mutate a cell's or worker's status and
//! leave the graph live); STRUCTURE surfaces to the caller and aborts the
//! enclosing macro-mode scope; AUTHORITY is a logged warning, not a hard
//! error, so it has no variant here (see [`crate::manager::SetOutcome`]).

use thiserror::Error;

use crate::id::{CellId, ConnectionId, ContextId, PinId, StructuredCellId, WorkerId};

/// Result type for Seamless core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A value failed dtype construct/parse/validate.
    #[error("validation failed for cell {cell:?}: {message}")]
    Validation { cell: CellId, message: String },

    /// Destroyed-entity access, slave write without force, type mismatch on
    /// connection, or any other structural invariant violation. Hard error;
    /// aborts the enclosing macro-mode scope.
    #[error("structural error: {0}")]
    Structure(String),

    /// A worker runtime raised while executing. Captured on the worker;
    /// downstream cells remain at their previous values.
    #[error("worker {worker:?} execution failed: {message}")]
    Execution { worker: WorkerId, message: String },

    /// File I/O failure in a mount sink. Never fatal to the core.
    #[error("mount error: {0}")]
    Mount(String),

    /// Reference to a cell that does not exist (or has been tombstoned).
    #[error("unknown or destroyed cell: {0:?}")]
    UnknownCell(CellId),

    /// Reference to a pin that does not exist (or has been tombstoned).
    #[error("unknown or destroyed pin: {0:?}")]
    UnknownPin(PinId),

    /// Reference to a worker that does not exist (or has been tombstoned).
    #[error("unknown or destroyed worker: {0:?}")]
    UnknownWorker(WorkerId),

    /// Reference to a connection that does not exist (or has been removed).
    #[error("unknown connection: {0:?}")]
    UnknownConnection(ConnectionId),

    /// Reference to a context that does not exist (or has been destroyed).
    #[error("unknown or destroyed context: {0:?}")]
    UnknownContext(ContextId),

    /// Reference to a structured cell that does not exist (or has been
    /// destroyed).
    #[error("unknown or destroyed structured cell: {0:?}")]
    UnknownStructuredCell(StructuredCellId),

    /// I/O error, generally surfaced from a mount sink.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn validation(cell: CellId, message: impl Into<String>) -> Self {
        Error::Validation {
            cell,
            message: message.into(),
        }
    }

    pub fn structure(message: impl Into<String>) -> Self {
        Error::Structure(message.into())
    }

    pub fn execution(worker: WorkerId, message: impl Into<String>) -> Self {
        Error::Execution {
            worker,
            message: message.into(),
        }
    }
}
