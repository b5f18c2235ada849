//! Cells: the typed value holders that form the nodes of a Seamless graph.

use crate::dtype::{CellKind, CellValue, Checksum};
use crate::id::{CellId, ConnectionId, ContextId, StructuredCellId};

/// A cell's lifecycle status, driven entirely by the Manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellStatus {
    /// No value has ever been set.
    Void,
    /// Holds a valid, up-to-date value.
    Ok,
    /// Last write failed dtype validation; the previous value (if any) is
    /// retained and `status` is the only externally visible change.
    Error,
    /// Holds a value but a connected alias or upstream pin may supersede it
    /// before the next equilibration completes.
    Pending,
}

/// Whether a cell is independently writable or only ever receives its value
/// from an upstream pin/alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    /// May be set directly; this is the normal case for an independent cell.
    Free,
    /// Only ever receives a value from a pin or an authoritative alias peer;
    /// a direct `set_cell` is an AUTHORITY violation (logged, not a hard
    /// error — see [`crate::manager::SetOutcome::Overruled`]).
    Slave,
}

#[derive(Debug, Clone)]
pub struct CellState {
    pub id: CellId,
    pub context: ContextId,
    pub name: String,
    pub kind: CellKind,
    pub authority: Authority,
    pub status: CellStatus,
    /// Set when this cell is non-authoritative (has a driving alias/pin)
    /// and was nonetheless written to directly with `force`; cleared the
    /// next time a propagated (dependency-driven) write lands.
    pub overruled: bool,
    pub value: Option<CellValue>,
    pub checksum: Option<Checksum>,
    /// Second checksum over the raw text form, present only for dtypes
    /// where [`crate::dtype::DtypeHandler::has_text_checksum`] is true.
    pub text_checksum: Option<Checksum>,
    /// Non-empty when this cell is the data or buffer cell of a structured
    /// cell's composite value.
    pub structured_cell: Option<StructuredCellId>,
    /// The alias/feed/emit connections touching this cell. A plain Vec is
    /// fine here: cells typically have very few connections.
    pub connections: Vec<ConnectionId>,
}

impl CellState {
    pub fn new(id: CellId, context: ContextId, name: impl Into<String>, kind: CellKind) -> Self {
        Self {
            id,
            context,
            name: name.into(),
            kind,
            authority: Authority::Free,
            status: CellStatus::Void,
            overruled: false,
            value: None,
            checksum: None,
            text_checksum: None,
            structured_cell: None,
            connections: Vec::new(),
        }
    }

    pub fn is_slave(&self) -> bool {
        matches!(self.authority, Authority::Slave)
    }

    /// Apply a newly-validated value, updating status and checksums.
    pub fn accept(&mut self, value: CellValue, checksum: Checksum, text_checksum: Option<Checksum>) {
        self.value = Some(value);
        self.checksum = Some(checksum);
        self.text_checksum = text_checksum;
        self.status = CellStatus::Ok;
    }

    /// Record a failed write: status flips to ERROR, previous value (if
    /// any) is retained untouched.
    pub fn reject(&mut self) {
        self.status = CellStatus::Error;
    }

    pub fn mark_pending(&mut self) {
        if self.status == CellStatus::Ok {
            self.status = CellStatus::Pending;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::{BuiltinRegistry, DtypeRegistry};
    use slotmap::SlotMap;

    #[test]
    fn new_cell_is_void() {
        let mut cells: SlotMap<CellId, ()> = SlotMap::with_key();
        let id = cells.insert(());
        let mut ctxs: SlotMap<ContextId, ()> = SlotMap::with_key();
        let ctx = ctxs.insert(());
        let cell = CellState::new(id, ctx, "x", CellKind::Json);
        assert_eq!(cell.status, CellStatus::Void);
        assert!(cell.value.is_none());
    }

    #[test]
    fn accept_then_reject_preserves_value() {
        let mut cells: SlotMap<CellId, ()> = SlotMap::with_key();
        let id = cells.insert(());
        let mut ctxs: SlotMap<ContextId, ()> = SlotMap::with_key();
        let ctx = ctxs.insert(());
        let mut cell = CellState::new(id, ctx, "x", CellKind::Json);
        let registry = BuiltinRegistry::default();
        let handler = registry.require(CellKind::Json);
        let value = handler.parse(id, "42").unwrap();
        let checksum = handler.checksum(&value);
        cell.accept(value.clone(), checksum, None);
        assert_eq!(cell.status, CellStatus::Ok);
        cell.reject();
        assert_eq!(cell.status, CellStatus::Error);
        assert_eq!(cell.value, Some(value));
    }
}
