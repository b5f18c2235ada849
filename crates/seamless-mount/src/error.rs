//! Error types for the reference file-mirroring mount sink.
//!
//! Mount failures are never fatal to the core: this type exists only for
//! the sink's own fallible setup (`mount`/`unmount` wiring a watcher);
//! day-to-day export/import failures are swallowed and logged once per
//! distinct message inside [`crate::FileMountSink`] instead of propagated
//! as a `Result`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MountError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file watch error: {0}")]
    Watch(String),
}

pub type MountResult<T> = std::result::Result<T, MountError>;
