//! Core engine for the Seamless reactive dataflow runtime.
//!
//! # ⚠️ API Stability Warning
//!
//! **This crate contains internal APIs that are UNSTABLE and may change without notice.**
//!
//! For building graphs, use the `seamless` crate instead:
//! ```rust,ignore
//! use seamless::prelude::*;  // STABLE user-facing API
//! ```
//!
//! The `seamless-core` APIs are intended for:
//! - Building custom worker runtimes and mount sinks
//! - Advanced integrations with the Manager internals
//! - Contributing to Seamless development
//!
//! **Stability guarantees:**
//! - ❌ **No SemVer guarantees** - breaking changes may occur in minor versions (0.x.y)
//! - ❌ **No deprecation warnings** - APIs may be removed without warning
//! - ❌ **Internal implementation details** - subject to refactoring
//!
//! ---
//!
//! This crate provides:
//! - A single-authority [`manager::Manager`] that owns every cell, worker,
//!   pin, connection, context, and structured cell in a graph
//! - A closed-set [`dtype`] registry (plain text, JSON, CSON, Python source,
//!   arrays, the `mixed` wire format, and signal cells)
//! - [`worker::WorkerRuntime`] and [`mount::MountSink`] traits so external
//!   process execution and file mirroring stay pluggable collaborators
//! - Nested structural-edit transactions ([`macro_mode`]) and path-addressed
//!   composite values ([`structured_cell`])

pub mod cell;
pub mod connection;
pub mod context;
pub mod dtype;
pub mod error;
pub mod id;
pub mod macro_mode;
pub mod manager;
pub mod mount;
pub mod pin;
pub mod structured_cell;
pub mod worker;
pub mod workqueue;

pub use cell::{Authority, CellState, CellStatus};
pub use connection::{AliasDirection, Connection};
pub use context::ContextState;
pub use dtype::{BuiltinRegistry, CellKind, CellValue, Checksum, DtypeHandler, DtypeRegistry};
pub use error::{Error, Result};
pub use id::{CellId, ConnectionId, ContextId, PinId, StructuredCellId, WorkerId};
pub use manager::{EquilibrateReport, Manager, SetOutcome};
pub use mount::{MountAuthority, MountDescriptor, MountMode, MountSink, NullMountSink};
pub use pin::{PinKind, PinState, TransferMode};
pub use structured_cell::{Monitor, Path, StructuredCellState};
pub use worker::{EchoRuntime, WorkerRuntime, WorkerState, WorkerStatus};
