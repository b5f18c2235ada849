//! The Manager: single serialization and propagation authority for a
//! toplevel Context tree.
//!
//! Every structural or value mutation funnels through one of the public
//! methods here. Calls arriving off the thread that constructed the
//! toplevel Context, or while the Manager is momentarily inactive (e.g.
//! mid-rollback), are queued by [`crate::workqueue::Workqueue`] and replayed
//! at the start of the next [`Manager::equilibrate`] rather than applied
//! in place — this is what the Python original spells with its
//! `@main_thread_buffered` / `@manager_buffered` decorators.

use serde_json::Value;
use slotmap::SlotMap;
use tracing::{debug, warn};

use crate::cell::{Authority, CellState, CellStatus};
use crate::connection::{AliasDirection, Connection};
use crate::context::ContextState;
use crate::dtype::{BuiltinRegistry, CellKind, CellValue, DtypeRegistry};
use crate::error::{Error, Result};
use crate::id::{CellId, ConnectionId, ContextId, PinId, StructuredCellId, WorkerId};
use crate::macro_mode::{MacroModeStack, Stash};
use crate::mount::{MountDescriptor, MountSink, NullMountSink};
use crate::pin::{PinKind, PinState};
use crate::structured_cell::{self, Path, StructuredCellState};
use crate::worker::{WorkerRuntime, WorkerState, WorkerStatus};
use crate::workqueue::{QueuedCall, Workqueue};

/// Outcome of a direct write attempt against a cell.
#[derive(Debug)]
pub enum SetOutcome {
    /// The value validated and was applied.
    Applied,
    /// The write was deferred (off-thread or inactive Manager); it will be
    /// applied on the next equilibration.
    Deferred,
    /// The cell is a Slave (its value comes from an alias/pin); a direct
    /// write is an AUTHORITY violation. This is a warning, not a hard
    /// error: the write is dropped and the existing value is untouched.
    Overruled,
}

/// Summary of one `equilibrate()` pass, handed to callbacks registered via
/// [`Manager::on_equilibrate`].
#[derive(Debug, Default, Clone)]
pub struct EquilibrateReport {
    pub cells_updated: Vec<CellId>,
    pub workers_settled: Vec<WorkerId>,
    pub rounds: usize,
    /// Workers still reporting `pending() > 0` when equilibration stopped.
    /// Empty unless a `timeout` was given and the deadline elapsed before
    /// the graph settled.
    pub unstable: Vec<WorkerId>,
}

pub struct Manager {
    contexts: SlotMap<ContextId, ContextState>,
    cells: SlotMap<CellId, CellState>,
    workers: SlotMap<WorkerId, WorkerState>,
    pins: SlotMap<PinId, PinState>,
    connections: SlotMap<ConnectionId, Connection>,
    structured_cells: SlotMap<StructuredCellId, StructuredCellState>,
    dtypes: std::sync::Arc<dyn DtypeRegistry>,
    mount: Box<dyn MountSink>,
    workqueue: Workqueue,
    macro_mode: MacroModeStack,
    equilibrate_callbacks: Vec<Box<dyn FnMut(&EquilibrateReport)>>,
    root: ContextId,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("cells", &self.cells.len())
            .field("workers", &self.workers.len())
            .field("pins", &self.pins.len())
            .field("connections", &self.connections.len())
            .field("contexts", &self.contexts.len())
            .finish()
    }
}

impl Manager {
    /// Construct a Manager and its toplevel root Context. The calling
    /// thread is bound as "the main thread" for this Manager's lifetime.
    pub fn new() -> Self {
        Self::with_mount(Box::new(NullMountSink))
    }

    pub fn with_mount(mount: Box<dyn MountSink>) -> Self {
        let mut contexts = SlotMap::with_key();
        let root = contexts.insert_with_key(ContextState::new_root);
        let mut workqueue = Workqueue::new();
        workqueue.bind_main_thread(std::thread::current().id());
        Self {
            contexts,
            cells: SlotMap::with_key(),
            workers: SlotMap::with_key(),
            pins: SlotMap::with_key(),
            connections: SlotMap::with_key(),
            structured_cells: SlotMap::with_key(),
            dtypes: std::sync::Arc::new(BuiltinRegistry::default()),
            mount,
            workqueue,
            macro_mode: MacroModeStack::new(),
            equilibrate_callbacks: Vec::new(),
            root,
        }
    }

    pub fn with_registry(registry: std::sync::Arc<dyn DtypeRegistry>) -> Self {
        let mut m = Self::new();
        m.dtypes = registry;
        m
    }

    pub fn root(&self) -> ContextId {
        self.root
    }

    fn must_defer(&self) -> bool {
        self.workqueue.must_defer(std::thread::current().id())
    }

    // ---- structure: contexts ----------------------------------------

    pub fn new_child_context(&mut self, parent: ContextId, name: impl Into<String>) -> Result<ContextId> {
        if !self.contexts.contains_key(parent) {
            return Err(Error::UnknownContext(parent));
        }
        let name = name.into();
        let id = self
            .contexts
            .insert_with_key(|id| ContextState::new_child(id, parent, name));
        self.contexts[parent].children.push(id);
        Ok(id)
    }

    // ---- structure: cells --------------------------------------------

    pub fn new_cell(&mut self, context: ContextId, name: impl Into<String>, kind: CellKind) -> Result<CellId> {
        if !self.contexts.contains_key(context) {
            return Err(Error::UnknownContext(context));
        }
        let name = name.into();
        let id = self.cells.insert_with_key(|id| CellState::new(id, context, name, kind));
        self.contexts[context].cells.push(id);
        Ok(id)
    }

    pub fn cell(&self, id: CellId) -> Result<&CellState> {
        self.cells.get(id).ok_or(Error::UnknownCell(id))
    }

    pub fn worker(&self, id: WorkerId) -> Result<&WorkerState> {
        self.workers.get(id).ok_or(Error::UnknownWorker(id))
    }

    pub fn pin(&self, id: PinId) -> Result<&PinState> {
        self.pins.get(id).ok_or(Error::UnknownPin(id))
    }

    /// `(name, kind, id)` for every pin declared on `worker`, in declaration
    /// order — the shape [`crate::worker::EchoRuntime::mirrored`] needs to
    /// pair up identically-named Input/Output pins.
    pub fn worker_pin_descriptors(&self, worker: WorkerId) -> Result<Vec<(String, PinKind, PinId)>> {
        let pins = &self.workers.get(worker).ok_or(Error::UnknownWorker(worker))?.pins;
        Ok(pins
            .iter()
            .filter_map(|id| self.pins.get(*id).map(|p| (p.name.clone(), p.kind, *id)))
            .collect())
    }

    /// Mark a cell Slave: it may no longer be written directly (a direct
    /// write becomes an AUTHORITY-level no-op, see [`SetOutcome::Overruled`]).
    pub fn set_slave(&mut self, cell: CellId) -> Result<()> {
        self.cells.get_mut(cell).ok_or(Error::UnknownCell(cell))?.authority = Authority::Slave;
        Ok(())
    }

    // ---- structure: workers / pins ------------------------------------

    pub fn new_worker(&mut self, context: ContextId, name: impl Into<String>) -> Result<WorkerId> {
        if !self.contexts.contains_key(context) {
            return Err(Error::UnknownContext(context));
        }
        let name = name.into();
        let id = self.workers.insert_with_key(|id| WorkerState::new(id, context, name));
        self.contexts[context].workers.push(id);
        Ok(id)
    }

    pub fn attach_worker_runtime(&mut self, worker: WorkerId, runtime: Box<dyn WorkerRuntime>) -> Result<()> {
        self.workers
            .get_mut(worker)
            .ok_or(Error::UnknownWorker(worker))?
            .attach_runtime(runtime);
        Ok(())
    }

    pub fn new_pin(
        &mut self,
        worker: WorkerId,
        name: impl Into<String>,
        kind: PinKind,
        dtype: CellKind,
    ) -> Result<PinId> {
        if !self.workers.contains_key(worker) {
            return Err(Error::UnknownWorker(worker));
        }
        let name = name.into();
        let id = self.pins.insert_with_key(|id| PinState::new(id, worker, name, kind, dtype));
        self.workers[worker].pins.push(id);
        Ok(id)
    }

    // ---- structure: connections ----------------------------------------

    /// Alias two cells. In `OneWay` mode, `target` is forced to Slave
    /// authority (invariant A2); writes to `target` thereafter are
    /// AUTHORITY violations.
    pub fn connect_cell(&mut self, source: CellId, target: CellId, direction: AliasDirection) -> Result<ConnectionId> {
        if !self.cells.contains_key(source) {
            return Err(Error::UnknownCell(source));
        }
        if !self.cells.contains_key(target) {
            return Err(Error::UnknownCell(target));
        }
        if self.cells[source].kind != self.cells[target].kind {
            return Err(Error::structure(format!(
                "cannot alias cells of differing dtype: {} vs {}",
                self.cells[source].kind, self.cells[target].kind
            )));
        }
        // Invariant C1: at most one active incoming non-duplex connection.
        // A OneWay alias is exactly such a connection, so it cannot target
        // a cell that already has one (a second output pin or one-way
        // alias driving the same cell, spec §7).
        if matches!(direction, AliasDirection::OneWay) && self.cells[target].is_slave() {
            return Err(Error::structure(format!(
                "cell {target:?} already has an active incoming non-duplex connection"
            )));
        }
        let id = self.connections.insert_with_key(|id| Connection::Alias {
            id,
            source,
            target,
            direction,
        });
        self.cells[source].connections.push(id);
        self.cells[target].connections.push(id);
        if matches!(direction, AliasDirection::OneWay) {
            self.cells[target].authority = Authority::Slave;
        }
        if let Some(value) = self.cells[source].value.clone() {
            self.propagate_into(target, value, Some(id))?;
        }
        Ok(id)
    }

    /// Feed (cell -> pin), emit (pin -> cell), or both at once for a
    /// duplex Edit pin, decided by the pin's kind. Returns the Feed
    /// connection id (or, for an output-only pin, the Emit connection id);
    /// for Edit pins the companion Emit connection id is stashed on the
    /// pin itself (`PinState::emit_connection`).
    pub fn connect_pin(&mut self, cell: CellId, pin: PinId) -> Result<ConnectionId> {
        if !self.cells.contains_key(cell) {
            return Err(Error::UnknownCell(cell));
        }
        let pin_state = self.pins.get(pin).ok_or(Error::UnknownPin(pin))?;
        if pin_state.dtype != self.cells[cell].kind {
            return Err(Error::structure(format!(
                "cannot connect pin of dtype {} to cell of dtype {}",
                pin_state.dtype, self.cells[cell].kind
            )));
        }
        let is_input = pin_state.is_input();
        let is_output = pin_state.is_output();

        let feed_id = if is_input {
            let id = self.connections.insert_with_key(|id| Connection::Feed { id, cell, pin });
            self.cells[cell].connections.push(id);
            self.pins[pin].connection = Some(id);
            if let Some(value) = self.cells[cell].value.clone() {
                self.feed_pin(pin, value)?;
            }
            Some(id)
        } else {
            None
        };

        let emit_id = if is_output {
            // As in `connect_cell`: an output-only pin is a non-duplex
            // incoming connection, so invariant C1 bars a second one onto
            // a cell that's already Slave. A duplex Edit pin is exempt
            // (`!is_input` below), since it drives and is driven by the
            // same connection.
            if !is_input && self.cells[cell].is_slave() {
                return Err(Error::structure(format!(
                    "cell {cell:?} already has an active incoming non-duplex connection"
                )));
            }
            let id = self.connections.insert_with_key(|id| Connection::Emit { id, pin, cell });
            self.cells[cell].connections.push(id);
            self.pins[pin].emit_connection = Some(id);
            // A pin-driven cell is Slave unless it is also fed by the same
            // duplex Edit pin, in which case direct writes are the whole
            // point and authority stays Free.
            if !is_input {
                self.cells[cell].authority = Authority::Slave;
            }
            Some(id)
        } else {
            None
        };

        feed_id.or(emit_id).ok_or_else(|| {
            Error::structure("pin has neither input nor output direction, nothing to connect")
        })
    }

    pub fn disconnect_cell(&mut self, connection: ConnectionId) -> Result<()> {
        self.remove_connection(connection)
    }

    pub fn disconnect_pin(&mut self, connection: ConnectionId) -> Result<()> {
        self.remove_connection(connection)
    }

    fn remove_connection(&mut self, connection: ConnectionId) -> Result<()> {
        let conn = self.connections.remove(connection).ok_or(Error::UnknownConnection(connection))?;
        match &conn {
            Connection::Alias { source, target, .. } => {
                self.untrack(*source, connection);
                self.untrack(*target, connection);
            }
            Connection::Feed { cell, pin } => {
                self.untrack(*cell, connection);
                if let Some(p) = self.pins.get_mut(*pin) {
                    p.connection = None;
                }
            }
            Connection::Emit { pin, cell } => {
                self.untrack(*cell, connection);
                if let Some(p) = self.pins.get_mut(*pin) {
                    p.emit_connection = None;
                }
            }
            Connection::ChannelIn {
                source, structured_cell, ..
            } => {
                self.untrack(*source, connection);
                if let Some(sc) = self.structured_cells.get_mut(*structured_cell) {
                    sc.in_connections.retain(|c| *c != connection);
                }
            }
            Connection::ChannelOutToCell {
                structured_cell, target, ..
            } => {
                self.untrack(*target, connection);
                if let Some(sc) = self.structured_cells.get_mut(*structured_cell) {
                    sc.out_connections.retain(|c| *c != connection);
                }
            }
            Connection::ChannelOutToPin { structured_cell, .. } => {
                if let Some(sc) = self.structured_cells.get_mut(*structured_cell) {
                    sc.out_connections.retain(|c| *c != connection);
                }
            }
        }
        Ok(())
    }

    fn untrack(&mut self, cell: CellId, connection: ConnectionId) {
        if let Some(c) = self.cells.get_mut(cell) {
            c.connections.retain(|c| *c != connection);
        }
    }

    /// Destroy a worker and everything hanging off it (its pins and their
    /// connections). Cells themselves are left in place, reverting to Free
    /// authority if they lose their last controlling connection.
    pub fn destroy_subtree(&mut self, worker: WorkerId) -> Result<()> {
        let pins = self.workers.get(worker).ok_or(Error::UnknownWorker(worker))?.pins.clone();
        for pin in pins {
            if let Some(conn) = self.pins.get(pin).and_then(|p| p.connection) {
                self.remove_connection(conn)?;
            }
            if let Some(conn) = self.pins.get(pin).and_then(|p| p.emit_connection) {
                self.remove_connection(conn)?;
            }
            self.pins.remove(pin);
        }
        if let Some(worker_state) = self.workers.remove(worker) {
            self.contexts[worker_state.context].workers.retain(|w| *w != worker);
        }
        Ok(())
    }

    // ---- structured cells ------------------------------------------------

    /// Create a structured cell: a composite JSON value backed by a plain
    /// `data_cell` (its serialized mirror, so it can be mounted/aliased like
    /// any other cell) and, for the `mixed` dtype, a companion `buffer_cell`
    /// for the non-JSON payload alongside it.
    pub fn new_structured_cell(
        &mut self,
        context: ContextId,
        name: impl Into<String>,
        kind: CellKind,
        initial: Value,
    ) -> Result<StructuredCellId> {
        let name = name.into();
        let data_cell = self.new_cell(context, format!("{name}.data"), kind)?;
        let buffer_cell = if matches!(kind, CellKind::Mixed) {
            Some(self.new_cell(context, format!("{name}.buffer"), CellKind::Mixed)?)
        } else {
            None
        };
        let id = self
            .structured_cells
            .insert_with_key(|id| StructuredCellState::new(id, data_cell, buffer_cell, initial.clone()));
        self.cells[data_cell].structured_cell = Some(id);
        let text = serde_json::to_string(&initial)?;
        self.write_cell(data_cell, &text)?;
        Ok(id)
    }

    pub fn structured_cell(&self, id: StructuredCellId) -> Result<&StructuredCellState> {
        self.structured_cells.get(id).ok_or(Error::UnknownStructuredCell(id))
    }

    /// Mutable accessor used by callers driving a fork/rollback edit cycle
    /// directly (see [`Manager::commit_structured_fork`] for the commit
    /// half, which also handles outchannel firing).
    pub fn structured_cell_mut(&mut self, id: StructuredCellId) -> Result<&mut StructuredCellState> {
        self.structured_cells.get_mut(id).ok_or(Error::UnknownStructuredCell(id))
    }

    /// Attach a JSON-Schema-shaped validator (`type`/`required`/`properties`)
    /// to a structured cell. Until the composite value satisfies it, every
    /// outchannel read stays UNDEFINED even though writes still apply
    /// (spec §4.3, scenario 6).
    pub fn set_structured_cell_schema(&mut self, id: StructuredCellId, schema: Value) -> Result<()> {
        self.structured_cells
            .get_mut(id)
            .ok_or(Error::UnknownStructuredCell(id))?
            .set_schema(schema);
        Ok(())
    }

    /// Route a plain cell's value into a structured cell at `path` whenever
    /// `source` changes, matching the initial value immediately if one is
    /// already set.
    pub fn connect_inchannel(
        &mut self,
        structured_cell: StructuredCellId,
        source: CellId,
        path: Path,
    ) -> Result<ConnectionId> {
        if !self.structured_cells.contains_key(structured_cell) {
            return Err(Error::UnknownStructuredCell(structured_cell));
        }
        if !self.cells.contains_key(source) {
            return Err(Error::UnknownCell(source));
        }
        let id = self.connections.insert_with_key(|id| Connection::ChannelIn {
            id,
            source,
            structured_cell,
            path: path.clone(),
        });
        self.cells[source].connections.push(id);
        self.structured_cells[structured_cell].in_connections.push(id);
        self.structured_cells[structured_cell].monitor.register_in(path.clone());
        if let Some(value) = self.cells[source].value.clone().and_then(|v| v.as_json().cloned()) {
            self.write_structured_path(structured_cell, &path, value)?;
        }
        Ok(id)
    }

    /// Fire `target` with the structured cell's value at `path` whenever
    /// that subtree changes.
    pub fn connect_outchannel_to_cell(
        &mut self,
        structured_cell: StructuredCellId,
        path: Path,
        target: CellId,
    ) -> Result<ConnectionId> {
        if !self.structured_cells.contains_key(structured_cell) {
            return Err(Error::UnknownStructuredCell(structured_cell));
        }
        if !self.cells.contains_key(target) {
            return Err(Error::UnknownCell(target));
        }
        let id = self.connections.insert_with_key(|id| Connection::ChannelOutToCell {
            id,
            structured_cell,
            path: path.clone(),
            target,
        });
        self.cells[target].connections.push(id);
        self.structured_cells[structured_cell].out_connections.push(id);
        self.structured_cells[structured_cell].monitor.register_out(path.clone());
        if let Some(value) = self.structured_cells[structured_cell].read_path(&path).cloned() {
            self.propagate_into(target, CellValue::Json(value), None)?;
        }
        Ok(id)
    }

    /// As [`Manager::connect_outchannel_to_cell`], but feeds a worker pin
    /// instead of a cell.
    pub fn connect_outchannel_to_pin(
        &mut self,
        structured_cell: StructuredCellId,
        path: Path,
        target: PinId,
    ) -> Result<ConnectionId> {
        if !self.structured_cells.contains_key(structured_cell) {
            return Err(Error::UnknownStructuredCell(structured_cell));
        }
        if !self.pins.contains_key(target) {
            return Err(Error::UnknownPin(target));
        }
        let id = self.connections.insert_with_key(|id| Connection::ChannelOutToPin {
            id,
            structured_cell,
            path: path.clone(),
            target,
        });
        self.structured_cells[structured_cell].out_connections.push(id);
        self.structured_cells[structured_cell].monitor.register_out(path.clone());
        if let Some(value) = self.structured_cells[structured_cell].read_path(&path).cloned() {
            self.feed_pin(target, CellValue::Json(value))?;
        }
        Ok(id)
    }

    /// Write through a structured cell's inchannel: buffered off the main
    /// thread or while the Manager is inactive, exactly like [`Manager::set_cell`].
    pub fn write_inchannel(&mut self, structured_cell: StructuredCellId, path: Path, value: Value) -> Result<()> {
        if self.must_defer() {
            self.workqueue.push(QueuedCall::WriteInchannel {
                structured_cell,
                path,
                value,
            });
            return Ok(());
        }
        self.write_structured_path(structured_cell, &path, value)
    }

    /// Read the structured cell's current value at `path` (or its in-progress
    /// fork, if one is open).
    pub fn read_outchannel(&self, structured_cell: StructuredCellId, path: &[String]) -> Result<Option<Value>> {
        let sc = self.structured_cells.get(structured_cell).ok_or(Error::UnknownStructuredCell(structured_cell))?;
        Ok(sc.read_path(path).cloned())
    }

    /// Apply a path write to a structured cell, re-serialize its mirror data
    /// cell, and fire every affected outchannel.
    fn write_structured_path(&mut self, structured_cell: StructuredCellId, path: &[String], value: Value) -> Result<()> {
        let sc = self
            .structured_cells
            .get_mut(structured_cell)
            .ok_or(Error::UnknownStructuredCell(structured_cell))?;
        sc.write_path(path, value)?;
        let data_cell = sc.data_cell;
        let mirrored = sc.value.clone();
        let text = serde_json::to_string(&mirrored)?;
        self.write_cell(data_cell, &text)?;
        self.fire_outchannels_for_paths(structured_cell, std::slice::from_ref(&path.to_vec()))?;
        Ok(())
    }

    /// Commit a structured cell's open fork (see [`StructuredCellState::fork`])
    /// and fire every outchannel affected by the resulting diff in one batch,
    /// matching the macro-mode all-or-nothing commit semantics of a
    /// multi-path structural edit.
    pub fn commit_structured_fork(&mut self, structured_cell: StructuredCellId) -> Result<()> {
        let (changed, data_cell, mirrored) = {
            let sc = self
                .structured_cells
                .get_mut(structured_cell)
                .ok_or(Error::UnknownStructuredCell(structured_cell))?;
            let changed = sc.commit_fork()?;
            (changed, sc.data_cell, sc.value.clone())
        };
        if changed.is_empty() {
            return Ok(());
        }
        let text = serde_json::to_string(&mirrored)?;
        self.write_cell(data_cell, &text)?;
        self.fire_outchannels_for_paths(structured_cell, &changed)
    }

    fn fire_outchannels_for_paths(&mut self, structured_cell: StructuredCellId, changed: &[Path]) -> Result<()> {
        let out_conns = self
            .structured_cells
            .get(structured_cell)
            .map(|sc| sc.out_connections.clone())
            .unwrap_or_default();
        for conn_id in out_conns {
            let Some(conn) = self.connections.get(conn_id).cloned() else { continue };
            match conn {
                Connection::ChannelOutToCell { path, target, .. } => {
                    if changed.iter().any(|p| structured_cell::paths_overlap(p, &path)) {
                        let value = self
                            .structured_cells
                            .get(structured_cell)
                            .and_then(|sc| sc.read_path(&path))
                            .cloned();
                        if let Some(value) = value {
                            self.propagate_into(target, CellValue::Json(value), None)?;
                        }
                    }
                }
                Connection::ChannelOutToPin { path, target, .. } => {
                    if changed.iter().any(|p| structured_cell::paths_overlap(p, &path)) {
                        let value = self
                            .structured_cells
                            .get(structured_cell)
                            .and_then(|sc| sc.read_path(&path))
                            .cloned();
                        if let Some(value) = value {
                            self.feed_pin(target, CellValue::Json(value))?;
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    // ---- macro mode -----------------------------------------------------

    pub fn enter_macro_mode(&mut self) {
        let cells = self.cells.clone_entries();
        let workers = self.workers.clone_entries();
        let pins = self.pins.clone_entries();
        let structured_cells = self.structured_cells.clone_entries();
        let contexts = self.contexts.clone_entries();
        let connection_ids: Vec<ConnectionId> = self.connections.keys().collect();
        self.macro_mode.enter(|| Stash {
            cells,
            workers,
            pins,
            structured_cells,
            contexts,
            connection_ids,
        });
    }

    pub fn exit_macro_mode_ok(&mut self) {
        self.macro_mode.commit();
    }

    /// Abort the active macro-mode scope: every cell, worker, pin,
    /// structured cell, context, and connection created since the scope was
    /// entered is removed outright, and everything that already existed is
    /// overwritten with its stashed state. This is the all-or-nothing half
    /// of macro mode (spec §4.4): a structural error inside the scope must
    /// leave the graph exactly as it was before the scope opened, not just
    /// revert values on entities that happened to survive.
    pub fn abort_macro_mode(&mut self) {
        if let Some(stash) = self.macro_mode.abort() {
            purge_and_restore(&mut self.cells, stash.cells);
            purge_and_restore(&mut self.workers, stash.workers);
            purge_and_restore(&mut self.pins, stash.pins);
            purge_and_restore(&mut self.structured_cells, stash.structured_cells);
            purge_and_restore(&mut self.contexts, stash.contexts);
            purge_extra(&mut self.connections, &stash.connection_ids);
        }
    }

    pub fn in_macro_mode(&self) -> bool {
        self.macro_mode.is_active()
    }

    // ---- value propagation ----------------------------------------------

    /// Direct write attempt against a cell from application code.
    pub fn set_cell(&mut self, cell: CellId, text: &str, force: bool) -> Result<SetOutcome> {
        if self.must_defer() {
            self.workqueue.push(QueuedCall::SetCell {
                cell,
                text: text.to_string(),
                force,
            });
            return Ok(SetOutcome::Deferred);
        }
        let state = self.cells.get(cell).ok_or(Error::UnknownCell(cell))?;
        if state.is_slave() && !force {
            warn!(?cell, "AUTHORITY: direct write to slave cell ignored");
            return Ok(SetOutcome::Overruled);
        }
        self.write_cell(cell, text)?;
        Ok(SetOutcome::Applied)
    }

    /// Force re-validation and re-propagation of a cell's current value
    /// without changing it (used to recover a cell stuck in ERROR after an
    /// upstream fix, or to re-run a worker against unchanged input).
    pub fn touch_cell(&mut self, cell: CellId) -> Result<()> {
        if self.must_defer() {
            self.workqueue.push(QueuedCall::TouchCell { cell });
            return Ok(());
        }
        let value = self.cells.get(cell).ok_or(Error::UnknownCell(cell))?.value.clone();
        if let Some(value) = value {
            self.propagate_from_cell(cell, value, None)?;
        }
        Ok(())
    }

    fn write_cell(&mut self, cell: CellId, text: &str) -> Result<()> {
        let kind = self.cells.get(cell).ok_or(Error::UnknownCell(cell))?.kind;
        let handler = self
            .dtypes
            .handler(kind)
            .ok_or_else(|| Error::structure(format!("no dtype handler registered for {kind}")))?;
        match handler.parse(cell, text) {
            Ok(value) => {
                handler.validate(cell, &value)?;
                let checksum = handler.checksum(&value);
                let text_checksum = if handler.has_text_checksum() {
                    handler.text_form(&value).map(|t| crate::dtype::Checksum::of(t.as_bytes()))
                } else {
                    None
                };
                let state = &mut self.cells[cell];
                let was_slave = state.is_slave();
                state.accept(value.clone(), checksum, text_checksum);
                // Reaching here for a Slave cell means `set_cell` was
                // called with `force = true` (a non-forced write to a
                // Slave cell returns `Overruled` before `write_cell` is
                // ever invoked) — flag the authority violation.
                if was_slave {
                    self.cells[cell].overruled = true;
                }
                self.export_if_mounted(cell, &value)?;
                self.propagate_from_cell(cell, value, None)?;
                Ok(())
            }
            Err(e @ Error::Validation { .. }) => {
                self.cells[cell].reject();
                debug!(?cell, "validation failed, cell set to ERROR");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn export_if_mounted(&mut self, cell: CellId, value: &CellValue) -> Result<()> {
        let kind = self.cells[cell].kind;
        let Some(handler) = self.dtypes.handler(kind) else {
            return Ok(());
        };
        let text = handler.serialize(cell, value)?;
        self.mount.export(cell, &text)
    }

    /// Push `value` to every connection fed by `cell`, except `origin`
    /// (the connection `value` just arrived on, if any): aliased peers and
    /// feed-connected pins. Skipping `origin` is the spec's origin
    /// suppression (§4.1(i)) — without it, a Bidirectional alias's two
    /// `propagate_into` calls (one per direction) call each other through
    /// this function forever.
    fn propagate_from_cell(&mut self, cell: CellId, value: CellValue, origin: Option<ConnectionId>) -> Result<()> {
        let connections = self.cells[cell].connections.clone();
        for conn_id in connections {
            if Some(conn_id) == origin {
                continue;
            }
            let Some(conn) = self.connections.get(conn_id).cloned() else { continue };
            match conn {
                Connection::Alias { source, target, .. } if source == cell => {
                    self.propagate_into(target, value.clone(), Some(conn_id))?;
                }
                // A OneWay alias never feeds back from target to source,
                // even on a forced write to the slave side (invariant A2).
                Connection::Alias {
                    source,
                    target,
                    direction: AliasDirection::Bidirectional,
                } if target == cell => {
                    self.propagate_into(source, value.clone(), Some(conn_id))?;
                }
                Connection::Feed { pin, .. } => {
                    self.feed_pin(pin, value.clone())?;
                }
                Connection::ChannelIn {
                    structured_cell, path, ..
                } => {
                    if let Some(json) = value.as_json() {
                        self.write_structured_path(structured_cell, &path, json.clone())?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Apply `value` to `target` as a propagated (not user-initiated)
    /// write: bypasses the Slave authority check since propagation is
    /// exactly how a Slave cell is supposed to receive its value. `origin`
    /// is the connection this value arrived on, threaded through to
    /// [`Manager::propagate_from_cell`] so it isn't immediately re-fired
    /// back the way it came.
    fn propagate_into(&mut self, target: CellId, value: CellValue, origin: Option<ConnectionId>) -> Result<()> {
        if self.cells.get(target).and_then(|c| c.value.as_ref()) == Some(&value) {
            return Ok(());
        }
        let kind = self.cells.get(target).ok_or(Error::UnknownCell(target))?.kind;
        let handler = self
            .dtypes
            .handler(kind)
            .ok_or_else(|| Error::structure(format!("no dtype handler registered for {kind}")))?;
        handler.validate(target, &value)?;
        let checksum = handler.checksum(&value);
        self.cells[target].accept(value.clone(), checksum, None);
        // A dependency-driven write always clears `overruled`, whether or
        // not the cell happened to be flagged before.
        self.cells[target].overruled = false;
        self.export_if_mounted(target, &value)?;
        self.propagate_from_cell(target, value, origin)?;
        Ok(())
    }

    fn feed_pin(&mut self, pin: PinId, value: CellValue) -> Result<()> {
        let worker = self.pins.get(pin).ok_or(Error::UnknownPin(pin))?.owner;
        self.pins[pin].pending += 1;
        let worker_state = self.workers.get_mut(worker).ok_or(Error::UnknownWorker(worker))?;
        worker_state.status = WorkerStatus::Pending;
        if let Some(rt) = worker_state.runtime.as_mut() {
            rt.receive_input(pin, value);
        }
        Ok(())
    }

    /// Called by application code on behalf of a worker's output pin, or
    /// internally while draining a [`crate::worker::WorkerRuntime`] during
    /// [`Manager::equilibrate`].
    pub fn pin_send_update(&mut self, pin: PinId, value: CellValue) -> Result<()> {
        let conn = self.pins.get(pin).ok_or(Error::UnknownPin(pin))?.emit_connection;
        if let Some(conn_id) = conn {
            if let Some(Connection::Emit { cell, .. }) = self.connections.get(conn_id).cloned() {
                self.propagate_into(cell, value, Some(conn_id))?;
            }
        }
        if let Some(p) = self.pins.get_mut(pin) {
            p.pending = p.pending.saturating_sub(1);
        }
        Ok(())
    }

    pub fn on_equilibrate(&mut self, callback: impl FnMut(&EquilibrateReport) + 'static) {
        self.equilibrate_callbacks.push(Box::new(callback));
    }

    /// Drain the workqueue, drive every worker runtime's outputs back into
    /// the graph, and repeat until nothing changes (signal: all worker
    /// `pending()` counts are zero and the workqueue is empty). Never
    /// times out; for graphs where a worker cycle might never settle, use
    /// [`Manager::equilibrate_within`].
    pub fn equilibrate(&mut self) -> Result<EquilibrateReport> {
        self.equilibrate_within(None)
    }

    /// As [`Manager::equilibrate`], but stops early once `timeout` elapses
    /// even if the graph has not settled, returning the workers still
    /// reporting `pending() > 0` in `report.unstable`. The
    /// core performs no cycle detection of its own; a value-changing cycle
    /// between workers will otherwise spin until a caller-supplied timeout
    /// cuts it off.
    pub fn equilibrate_within(&mut self, timeout: Option<std::time::Duration>) -> Result<EquilibrateReport> {
        let deadline = timeout.map(|d| std::time::Instant::now() + d);
        let mut report = EquilibrateReport::default();
        self.workqueue.set_active(true);
        let timed_out = loop {
            if deadline.is_some_and(|d| std::time::Instant::now() >= d) {
                break true;
            }
            report.rounds += 1;
            let drained = self.workqueue.drain();
            let had_queued_work = !drained.is_empty();
            for call in drained {
                self.apply_queued(call, &mut report)?;
            }

            let mut emitted_any = false;
            let worker_ids: Vec<WorkerId> = self.workers.keys().collect();
            for worker in worker_ids {
                let outputs = {
                    let Some(state) = self.workers.get_mut(worker) else { continue };
                    let Some(rt) = state.runtime.as_mut() else { continue };
                    let mut out = Vec::new();
                    rt.poll_outputs(&mut |pin, value, echo| out.push((pin, value, echo)));
                    out
                };
                for (pin, value, echo) in outputs {
                    emitted_any = true;
                    // A duplex Edit pin's echo back along the connection
                    // that just fed it is suppressed, not written back.
                    if echo {
                        if let Some(p) = self.pins.get_mut(pin) {
                            p.pending = p.pending.saturating_sub(1);
                        }
                        continue;
                    }
                    self.pin_send_update(pin, value)?;
                    report.cells_updated.push(cell_for_pin_emit(&self.connections, &self.pins, pin));
                }
                if self.workers.get(worker).map(|w| w.is_settled()).unwrap_or(true) {
                    report.workers_settled.push(worker);
                }
            }

            let mut imported_any = false;
            let mut imports = Vec::new();
            self.mount.poll_imports(&mut |cell, text| imports.push((cell, text)));
            for (cell, text) in imports {
                imported_any = true;
                let _ = self.write_cell(cell, &text);
            }

            if !had_queued_work && !emitted_any && !imported_any {
                break false;
            }
        };
        if timed_out {
            report.unstable = self
                .workers
                .iter()
                .filter(|(_, w)| !w.is_settled())
                .map(|(id, _)| id)
                .collect();
        }
        report.cells_updated.sort_by_key(|c| format!("{c:?}"));
        report.cells_updated.dedup();
        for cb in self.equilibrate_callbacks.iter_mut() {
            cb(&report);
        }
        Ok(report)
    }

    fn apply_queued(&mut self, call: QueuedCall, report: &mut EquilibrateReport) -> Result<()> {
        match call {
            QueuedCall::SetCell { cell, text, force } => {
                if let Ok(SetOutcome::Applied) = self.set_cell(cell, &text, force) {
                    report.cells_updated.push(cell);
                }
                Ok(())
            }
            QueuedCall::TouchCell { cell } => self.touch_cell(cell),
            QueuedCall::PinInput { pin, text } => {
                let kind = self.pins.get(pin).ok_or(Error::UnknownPin(pin))?.dtype;
                let handler = self.dtypes.require(kind);
                let value = handler.parse(CellId::default(), &text)?;
                self.feed_pin(pin, value)
            }
            QueuedCall::DisconnectCell { connection } => self.disconnect_cell(connection),
            QueuedCall::DisconnectPin { connection } => self.disconnect_pin(connection),
            QueuedCall::DestroySubtree { worker } => self.destroy_subtree(worker),
            QueuedCall::WriteInchannel {
                structured_cell,
                path,
                value,
            } => self.write_structured_path(structured_cell, &path, value),
        }
    }

    pub fn status_of(&self, cell: CellId) -> Result<CellStatus> {
        Ok(self.cell(cell)?.status)
    }

    pub fn mount_cell(&mut self, descriptor: MountDescriptor) -> Result<()> {
        descriptor.validate()?;
        self.mount.mount(descriptor)
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

fn cell_for_pin_emit(
    connections: &SlotMap<ConnectionId, Connection>,
    pins: &SlotMap<PinId, PinState>,
    pin: PinId,
) -> CellId {
    pins.get(pin)
        .and_then(|p| p.emit_connection)
        .and_then(|c| connections.get(c))
        .and_then(|c| match c {
            Connection::Emit { cell, .. } => Some(*cell),
            _ => None,
        })
        .unwrap_or_default()
}

trait CloneEntries<K: slotmap::Key, V: Clone> {
    fn clone_entries(&self) -> Vec<(K, V)>;
}

impl<K: slotmap::Key, V: Clone> CloneEntries<K, V> for SlotMap<K, V> {
    fn clone_entries(&self) -> Vec<(K, V)> {
        self.iter().map(|(k, v)| (k, v.clone())).collect()
    }
}

/// Remove every entry whose id isn't in `stashed`, then overwrite every
/// surviving entry with its stashed value. Entries present only in
/// `stashed` (i.e. destroyed during the aborted scope) are not resurrected
/// here — see the macro-mode abort note on [`crate::macro_mode::Stash`].
fn purge_and_restore<K: slotmap::Key, V>(map: &mut SlotMap<K, V>, stashed: Vec<(K, V)>) {
    let keep: rustc_hash::FxHashSet<K> = stashed.iter().map(|(id, _)| *id).collect();
    let extra: Vec<K> = map.keys().filter(|id| !keep.contains(id)).collect();
    for id in extra {
        map.remove(id);
    }
    for (id, value) in stashed {
        if let Some(slot) = map.get_mut(id) {
            *slot = value;
        }
    }
}

/// Remove every entry whose id isn't in `keep`. Used for connections, which
/// the Manager only ever needs to purge-if-new on abort (their content
/// never needs restoring in place since nothing outside the Manager holds
/// a `ConnectionId` across a macro-mode scope).
fn purge_extra<K: slotmap::Key, V>(map: &mut SlotMap<K, V>, keep: &[K]) {
    let keep: rustc_hash::FxHashSet<K> = keep.iter().copied().collect();
    let extra: Vec<K> = map.keys().filter(|id| !keep.contains(id)).collect();
    for id in extra {
        map.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pin::PinKind;
    use crate::worker::EchoRuntime;

    fn new_manager() -> (Manager, ContextId) {
        let m = Manager::new();
        let root = m.root();
        (m, root)
    }

    #[test]
    fn set_and_read_json_cell() {
        let (mut m, root) = new_manager();
        let cell = m.new_cell(root, "x", CellKind::Json).unwrap();
        let outcome = m.set_cell(cell, "42", false).unwrap();
        assert!(matches!(outcome, SetOutcome::Applied));
        assert_eq!(m.status_of(cell).unwrap(), CellStatus::Ok);
    }

    #[test]
    fn validation_failure_sets_error_status() {
        let (mut m, root) = new_manager();
        let cell = m.new_cell(root, "x", CellKind::Json).unwrap();
        let err = m.set_cell(cell, "not json", false).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert_eq!(m.status_of(cell).unwrap(), CellStatus::Error);
    }

    #[test]
    fn alias_propagates_value() {
        let (mut m, root) = new_manager();
        let a = m.new_cell(root, "a", CellKind::Json).unwrap();
        let b = m.new_cell(root, "b", CellKind::Json).unwrap();
        m.connect_cell(a, b, AliasDirection::OneWay).unwrap();
        m.set_cell(a, "1", false).unwrap();
        assert_eq!(m.cell(b).unwrap().value, m.cell(a).unwrap().value);
    }

    #[test]
    fn slave_cell_rejects_direct_write() {
        let (mut m, root) = new_manager();
        let a = m.new_cell(root, "a", CellKind::Json).unwrap();
        let b = m.new_cell(root, "b", CellKind::Json).unwrap();
        m.connect_cell(a, b, AliasDirection::OneWay).unwrap();
        let outcome = m.set_cell(b, "99", false).unwrap();
        assert!(matches!(outcome, SetOutcome::Overruled));
    }

    #[test]
    fn feed_and_emit_through_worker() {
        let (mut m, root) = new_manager();
        let input_cell = m.new_cell(root, "in", CellKind::Json).unwrap();
        let output_cell = m.new_cell(root, "out", CellKind::Json).unwrap();
        let worker = m.new_worker(root, "sum").unwrap();
        // Same pin name on both sides: EchoRuntime::mirrored pairs an Input
        // pin with the Output pin of the same name.
        let in_pin = m.new_pin(worker, "value", PinKind::Input, CellKind::Json).unwrap();
        let out_pin = m.new_pin(worker, "value", PinKind::Output, CellKind::Json).unwrap();
        let pins = m.worker_pin_descriptors(worker).unwrap();
        m.attach_worker_runtime(worker, Box::new(EchoRuntime::mirrored(&pins))).unwrap();
        m.connect_pin(input_cell, in_pin).unwrap();
        m.connect_pin(output_cell, out_pin).unwrap();
        m.set_cell(input_cell, "7", false).unwrap();
        let report = m.equilibrate().unwrap();
        assert!(!report.cells_updated.is_empty());
        assert_eq!(m.cell(output_cell).unwrap().value, Some(CellValue::Json(serde_json::json!(7))));
    }

    #[test]
    fn macro_mode_rolls_back_on_abort() {
        let (mut m, root) = new_manager();
        let a = m.new_cell(root, "a", CellKind::Json).unwrap();
        m.set_cell(a, "1", false).unwrap();
        m.enter_macro_mode();
        m.set_cell(a, "2", false).unwrap();
        assert_eq!(m.cell(a).unwrap().value, Some(CellValue::Json(serde_json::json!(2))));
        m.abort_macro_mode();
        assert_eq!(m.cell(a).unwrap().value, Some(CellValue::Json(serde_json::json!(1))));
    }

    #[test]
    fn destroy_subtree_removes_worker_and_pins() {
        let (mut m, root) = new_manager();
        let worker = m.new_worker(root, "w").unwrap();
        let pin = m.new_pin(worker, "p", PinKind::Input, CellKind::Json).unwrap();
        m.destroy_subtree(worker).unwrap();
        assert!(m.workers.get(worker).is_none());
        assert!(m.pins.get(pin).is_none());
    }
}
