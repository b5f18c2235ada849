//! Seamless: a reactive dataflow runtime for Rust.
//!
//! Seamless provides a graph of typed cells connected by workers, kept
//! continuously consistent by a single [`Manager`][seamless_core::Manager]:
//! - **Reactive propagation**: setting a cell pushes its value through
//!   every alias, feed, and emit connection until the graph settles
//! - **Structural transactions**: multi-step graph edits roll back as one
//!   unit if any step fails (`macro mode`)
//! - **Pluggable execution**: workers run against any
//!   [`WorkerRuntime`][seamless_core::WorkerRuntime] — in-process, or out
//!   of process via `seamless-worker`
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use seamless::prelude::*;
//!
//! let mut ctx = Context::new();
//! let input = ctx.cell("input", CellKind::Json);
//! let output = ctx.cell("output", CellKind::Json);
//! input.set("42")?;
//! ctx.equilibrate()?;
//! ```
//!
//! # Ergonomic handles vs. the core
//!
//! [`seamless_core::Manager`] works in terms of bare ids (`CellId`,
//! `WorkerId`, ...); this crate wraps them in [`Context`], [`Cell`], and
//! [`Worker`] handles that carry their id and a shared reference to the
//! owning Manager, so call sites read `cell.set(...)` instead of
//! `manager.set_cell(cell_id, ...)`.

use std::cell::RefCell;
use std::rc::Rc;

pub use seamless_core as core;
pub use seamless_core::{
    AliasDirection, CellKind, CellStatus, CellValue, Error, PinKind, Result, SetOutcome,
    WorkerRuntime,
};

type SharedManager = Rc<RefCell<seamless_core::Manager>>;

/// An ergonomic handle onto a [`seamless_core::Manager`] and its toplevel
/// context. Cloning a `Context` (or any handle derived from it) shares the
/// same underlying Manager: all handles observe each other's writes.
#[derive(Clone)]
pub struct Context {
    manager: SharedManager,
    id: seamless_core::ContextId,
}

impl Context {
    /// Build a new graph with a fresh Manager and no mount sink.
    pub fn new() -> Self {
        let manager = seamless_core::Manager::new();
        let id = manager.root();
        Self {
            manager: Rc::new(RefCell::new(manager)),
            id,
        }
    }

    /// Build a new graph whose mounted cells mirror to `mount`.
    pub fn with_mount(mount: Box<dyn seamless_core::MountSink>) -> Self {
        let manager = seamless_core::Manager::with_mount(mount);
        let id = manager.root();
        Self {
            manager: Rc::new(RefCell::new(manager)),
            id,
        }
    }

    pub fn child(&self, name: impl Into<String>) -> Result<Context> {
        let id = self.manager.borrow_mut().new_child_context(self.id, name)?;
        Ok(Context {
            manager: self.manager.clone(),
            id,
        })
    }

    pub fn cell(&self, name: impl Into<String>, kind: CellKind) -> Result<Cell> {
        let id = self.manager.borrow_mut().new_cell(self.id, name, kind)?;
        Ok(Cell {
            manager: self.manager.clone(),
            id,
        })
    }

    pub fn worker(&self, name: impl Into<String>) -> Result<Worker> {
        let id = self.manager.borrow_mut().new_worker(self.id, name)?;
        Ok(Worker {
            manager: self.manager.clone(),
            id,
        })
    }

    /// Connect two cells as aliases; see [`seamless_core::Manager::connect_cell`].
    pub fn alias(&self, source: &Cell, target: &Cell, direction: AliasDirection) -> Result<()> {
        self.manager
            .borrow_mut()
            .connect_cell(source.id, target.id, direction)?;
        Ok(())
    }

    /// Drain the workqueue and drive every worker to a fixed point.
    pub fn equilibrate(&self) -> Result<seamless_core::EquilibrateReport> {
        self.manager.borrow_mut().equilibrate()
    }

    /// As [`Context::equilibrate`], but returns early once `timeout` elapses
    /// without the graph settling; `report.unstable` lists the workers that
    /// were still pending.
    pub fn equilibrate_within(&self, timeout: std::time::Duration) -> Result<seamless_core::EquilibrateReport> {
        self.manager.borrow_mut().equilibrate_within(Some(timeout))
    }

    /// Create a structured cell: a composite JSON value exposed through
    /// path-addressed in/out channels.
    pub fn structured_cell(&self, name: impl Into<String>, kind: CellKind, initial: serde_json::Value) -> Result<StructuredCell> {
        let id = self.manager.borrow_mut().new_structured_cell(self.id, name, kind, initial)?;
        Ok(StructuredCell {
            manager: self.manager.clone(),
            id,
        })
    }

    pub fn enter_macro_mode(&self) {
        self.manager.borrow_mut().enter_macro_mode();
    }

    pub fn exit_macro_mode(&self) {
        self.manager.borrow_mut().exit_macro_mode_ok();
    }

    pub fn abort_macro_mode(&self) {
        self.manager.borrow_mut().abort_macro_mode();
    }

    pub fn mount(&self, descriptor: seamless_core::MountDescriptor) -> Result<()> {
        self.manager.borrow_mut().mount_cell(descriptor)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

/// An ergonomic handle onto a single cell.
#[derive(Clone)]
pub struct Cell {
    manager: SharedManager,
    id: seamless_core::CellId,
}

impl Cell {
    pub fn id(&self) -> seamless_core::CellId {
        self.id
    }

    /// Write `text`, parsed and validated by the cell's dtype handler.
    /// `Overruled` means the cell is a Slave and the write was dropped;
    /// use `force: true` to override.
    pub fn set(&self, text: &str, force: bool) -> Result<SetOutcome> {
        self.manager.borrow_mut().set_cell(self.id, text, force)
    }

    pub fn touch(&self) -> Result<()> {
        self.manager.borrow_mut().touch_cell(self.id)
    }

    pub fn value(&self) -> Result<Option<CellValue>> {
        Ok(self.manager.borrow().cell(self.id)?.value.clone())
    }

    pub fn status(&self) -> Result<CellStatus> {
        self.manager.borrow().status_of(self.id)
    }

    /// True if a Slave cell was forced to a direct write since its last
    /// dependency-driven update.
    pub fn overruled(&self) -> Result<bool> {
        Ok(self.manager.borrow().cell(self.id)?.overruled)
    }
}

/// An ergonomic handle onto a single worker.
#[derive(Clone)]
pub struct Worker {
    manager: SharedManager,
    id: seamless_core::WorkerId,
}

impl Worker {
    pub fn id(&self) -> seamless_core::WorkerId {
        self.id
    }

    pub fn pin(&self, name: impl Into<String>, kind: PinKind, dtype: CellKind) -> Result<seamless_core::PinId> {
        self.manager.borrow_mut().new_pin(self.id, name, kind, dtype)
    }

    pub fn attach_runtime(&self, runtime: Box<dyn WorkerRuntime>) -> Result<()> {
        self.manager.borrow_mut().attach_worker_runtime(self.id, runtime)
    }

    /// `(name, kind, id)` for every pin declared so far, in declaration
    /// order. Used to build an [`seamless_core::EchoRuntime::mirrored`] for
    /// workers with no real execution body.
    pub fn pin_descriptors(&self) -> Result<Vec<(String, PinKind, seamless_core::PinId)>> {
        self.manager.borrow().worker_pin_descriptors(self.id)
    }

    /// Connect a cell to one of this worker's pins (feed, emit, or both
    /// for a duplex Edit pin).
    pub fn connect(&self, cell: &Cell, pin: seamless_core::PinId) -> Result<seamless_core::ConnectionId> {
        self.manager.borrow_mut().connect_pin(cell.id, pin)
    }

    pub fn destroy(&self) -> Result<()> {
        self.manager.borrow_mut().destroy_subtree(self.id)
    }
}

/// An ergonomic handle onto a structured cell.
#[derive(Clone)]
pub struct StructuredCell {
    manager: SharedManager,
    id: seamless_core::StructuredCellId,
}

impl StructuredCell {
    pub fn id(&self) -> seamless_core::StructuredCellId {
        self.id
    }

    /// The underlying data cell, if callers need to mount or alias it like
    /// any other cell.
    pub fn data_cell(&self) -> Result<Cell> {
        let id = self.manager.borrow().structured_cell(self.id)?.data_cell;
        Ok(Cell {
            manager: self.manager.clone(),
            id,
        })
    }

    /// Route `cell`'s value into this structured cell at `path`.
    pub fn connect_inchannel(&self, path: seamless_core::Path, cell: &Cell) -> Result<seamless_core::ConnectionId> {
        self.manager.borrow_mut().connect_inchannel(self.id, cell.id, path)
    }

    /// Push this structured cell's value at `path` into `cell` whenever it
    /// changes.
    pub fn connect_outchannel(&self, path: seamless_core::Path, cell: &Cell) -> Result<seamless_core::ConnectionId> {
        self.manager.borrow_mut().connect_outchannel_to_cell(self.id, path, cell.id)
    }

    /// Push this structured cell's value at `path` into a worker pin
    /// whenever it changes.
    pub fn connect_outchannel_to_pin(&self, path: seamless_core::Path, pin: seamless_core::PinId) -> Result<seamless_core::ConnectionId> {
        self.manager.borrow_mut().connect_outchannel_to_pin(self.id, path, pin)
    }

    /// Write `value` at `path`; buffered like [`Cell::set`] if off the main
    /// thread or while the Manager is inactive.
    pub fn write(&self, path: seamless_core::Path, value: serde_json::Value) -> Result<()> {
        self.manager.borrow_mut().write_inchannel(self.id, path, value)
    }

    pub fn read(&self, path: &[String]) -> Result<Option<serde_json::Value>> {
        self.manager.borrow().read_outchannel(self.id, path)
    }

    /// Start a buffered multi-path edit (see
    /// [`seamless_core::StructuredCellState::fork`]).
    pub fn fork(&self) -> Result<()> {
        self.manager
            .borrow_mut()
            .structured_cell_mut(self.id)
            .map(|sc| sc.fork())
    }

    /// Commit the open fork atomically, firing every outchannel affected by
    /// the diff in one batch.
    pub fn commit(&self) -> Result<()> {
        self.manager.borrow_mut().commit_structured_fork(self.id)
    }

    /// Discard the open fork without touching the committed value.
    pub fn rollback(&self) -> Result<()> {
        self.manager
            .borrow_mut()
            .structured_cell_mut(self.id)
            .map(|sc| sc.rollback_fork())
    }

    /// Attach a JSON-Schema-shaped validator. Until the composite value
    /// satisfies it, `read`/outchannel reads stay `None` even though writes
    /// still apply.
    pub fn set_schema(&self, schema: serde_json::Value) -> Result<()> {
        self.manager.borrow_mut().set_structured_cell_schema(self.id, schema)
    }
}

pub mod prelude {
    //! Common imports for Seamless graphs.
    //!
    //! ```rust,ignore
    //! use seamless::prelude::*;
    //! ```

    pub use crate::{
        AliasDirection, Cell, CellKind, CellStatus, CellValue, Context, PinKind, SetOutcome, StructuredCell, Worker,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn facade_aliases_and_equilibrates() {
        let ctx = Context::new();
        let source = ctx.cell("source", CellKind::Json).unwrap();
        let mirror = ctx.cell("mirror", CellKind::Json).unwrap();
        ctx.alias(&source, &mirror, AliasDirection::OneWay).unwrap();
        source.set("10", false).unwrap();
        ctx.equilibrate().unwrap();
        assert_eq!(mirror.value().unwrap(), Some(CellValue::Json(serde_json::json!(10))));
        assert_eq!(mirror.status().unwrap(), CellStatus::Ok);
    }

    #[test]
    fn facade_child_contexts_share_the_manager() {
        let ctx = Context::new();
        let child = ctx.child("inner").unwrap();
        let cell = child.cell("x", CellKind::Json).unwrap();
        cell.set("1", false).unwrap();
        assert_eq!(cell.value().unwrap(), Some(CellValue::Json(serde_json::json!(1))));
    }
}
