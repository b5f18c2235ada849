//! Connections: the edges of a Seamless graph.
//!
//! Three kinds: cell-to-cell alias, cell-to-pin feed,
//! pin-to-cell emit. Each carries its own stable [`crate::id::ConnectionId`]
//! so it can be torn down independently of the cells/pins it touches.

use crate::id::{CellId, ConnectionId, PinId, StructuredCellId};
use crate::structured_cell::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasDirection {
    /// Both cells accept direct writes and propagate to each other.
    Bidirectional,
    /// `target` mirrors `source`; only `source` accepts direct writes
    /// (`target`'s authority is forced to Slave, invariant A2).
    OneWay,
}

#[derive(Debug, Clone)]
pub enum Connection {
    /// Cell-to-cell alias: writes to either side (subject to direction)
    /// propagate to the other.
    Alias {
        id: ConnectionId,
        source: CellId,
        target: CellId,
        direction: AliasDirection,
    },
    /// Cell-to-pin feed: the cell's value is pushed into the pin whenever
    /// the cell changes.
    Feed { id: ConnectionId, cell: CellId, pin: PinId },
    /// Pin-to-cell emit: the pin's output is written into the cell whenever
    /// the worker emits.
    Emit { id: ConnectionId, pin: PinId, cell: CellId },
    /// External write into a structured cell's inchannel: a plain cell's
    /// value is merged into the structured cell at `path` whenever `source`
    /// changes.
    ChannelIn {
        id: ConnectionId,
        source: CellId,
        structured_cell: StructuredCellId,
        path: Path,
    },
    /// Structured-cell outchannel fed into a plain cell: whenever the value
    /// at `path` changes, it is pushed into `target`.
    ChannelOutToCell {
        id: ConnectionId,
        structured_cell: StructuredCellId,
        path: Path,
        target: CellId,
    },
    /// Structured-cell outchannel fed into a worker pin: whenever the value
    /// at `path` changes, it is pushed into `target`.
    ChannelOutToPin {
        id: ConnectionId,
        structured_cell: StructuredCellId,
        path: Path,
        target: PinId,
    },
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        match self {
            Connection::Alias { id, .. } => *id,
            Connection::Feed { id, .. } => *id,
            Connection::Emit { id, .. } => *id,
            Connection::ChannelIn { id, .. } => *id,
            Connection::ChannelOutToCell { id, .. } => *id,
            Connection::ChannelOutToPin { id, .. } => *id,
        }
    }

    pub fn touches_cell(&self, cell: CellId) -> bool {
        match self {
            Connection::Alias { source, target, .. } => *source == cell || *target == cell,
            Connection::Feed { cell: c, .. } => *c == cell,
            Connection::Emit { cell: c, .. } => *c == cell,
            Connection::ChannelIn { source, .. } => *source == cell,
            Connection::ChannelOutToCell { target, .. } => *target == cell,
            Connection::ChannelOutToPin { .. } => false,
        }
    }

    pub fn touches_pin(&self, pin: PinId) -> bool {
        match self {
            Connection::Alias { .. } => false,
            Connection::Feed { pin: p, .. } => *p == pin,
            Connection::Emit { pin: p, .. } => *p == pin,
            Connection::ChannelIn { .. } => false,
            Connection::ChannelOutToCell { .. } => false,
            Connection::ChannelOutToPin { target, .. } => *target == pin,
        }
    }

    /// The structured cell this connection touches, if any.
    pub fn touches_structured_cell(&self, structured_cell: StructuredCellId) -> bool {
        match self {
            Connection::ChannelIn { structured_cell: sc, .. }
            | Connection::ChannelOutToCell { structured_cell: sc, .. }
            | Connection::ChannelOutToPin { structured_cell: sc, .. } => *sc == structured_cell,
            _ => false,
        }
    }
}
