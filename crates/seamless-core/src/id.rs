//! Stable identifiers for every entity the Manager's arena holds.
//!
//! The source graph has cells, pins, and contexts referencing each other
//! through Python object references (occasionally weak ones). Rust has no
//! equivalent of a "maybe-dead" strong reference, so every cross-entity link
//! in this crate is a [`slotmap`] key instead: generational, `Copy`, safe to
//! hold past the referent's destruction (the slot simply returns `None`).

slotmap::new_key_type! {
    /// Identifies a [`crate::cell::CellState`] in the Manager's arena.
    pub struct CellId;
    /// Identifies a [`crate::worker::WorkerState`] in the Manager's arena.
    pub struct WorkerId;
    /// Identifies a [`crate::pin::PinState`] in the Manager's arena.
    pub struct PinId;
    /// Identifies a [`crate::connection::Connection`] in the Manager's arena.
    pub struct ConnectionId;
    /// Identifies a [`crate::context::ContextState`] in the Manager's arena.
    pub struct ContextId;
    /// Identifies a [`crate::structured_cell::StructuredCellState`] in the Manager's arena.
    pub struct StructuredCellId;
}
