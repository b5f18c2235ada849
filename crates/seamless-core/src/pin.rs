//! Worker pins: the typed ports through which a [`crate::worker::WorkerState`]
//! exchanges values with cells.

use crate::dtype::CellKind;
use crate::id::{ConnectionId, PinId, WorkerId};

/// The direction (and feed/emit semantics) of a pin, mirroring the three
/// pin kinds a worker may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinKind {
    /// Cell value is fed into the worker whenever it changes.
    Input,
    /// Worker emits a value that is written into its connected cell(s).
    Output,
    /// Duplex: the worker both receives updates from, and emits updates to,
    /// the same cell. Used for in-place editing workers.
    Edit,
}

/// How eagerly an input pin is pushed to its worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Every accepted cell update is forwarded immediately.
    Immediate,
    /// Updates are coalesced; only the latest value is forwarded at
    /// equilibration, regardless of how many writes occurred in between.
    Coalesced,
}

impl Default for TransferMode {
    fn default() -> Self {
        TransferMode::Coalesced
    }
}

#[derive(Debug, Clone)]
pub struct PinState {
    pub id: PinId,
    pub owner: WorkerId,
    pub name: String,
    pub kind: PinKind,
    pub dtype: CellKind,
    pub transfer_mode: TransferMode,
    /// The connection feeding this pin (Feed, for Input and Edit pins), if any.
    pub connection: Option<ConnectionId>,
    /// The connection draining this pin (Emit, for Output and Edit pins),
    /// distinct from `connection` only for duplex Edit pins.
    pub emit_connection: Option<ConnectionId>,
    /// Number of `receive_input` calls issued to the worker runtime that
    /// have not yet produced a matching `poll_outputs` emission. Used by
    /// [`crate::manager::Manager::equilibrate`] to decide liveness.
    pub pending: usize,
}

impl PinState {
    pub fn new(id: PinId, owner: WorkerId, name: impl Into<String>, kind: PinKind, dtype: CellKind) -> Self {
        Self {
            id,
            owner,
            name: name.into(),
            kind,
            dtype,
            transfer_mode: TransferMode::default(),
            connection: None,
            emit_connection: None,
            pending: 0,
        }
    }

    pub fn is_input(&self) -> bool {
        matches!(self.kind, PinKind::Input | PinKind::Edit)
    }

    pub fn is_output(&self) -> bool {
        matches!(self.kind, PinKind::Output | PinKind::Edit)
    }
}
