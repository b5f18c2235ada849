//! The `main_thread_buffered` / `manager_buffered` decorator semantics from
//! the Python original, modeled as an explicit queue rather than a runtime
//! thread-identity check on every call.
//!
//! The original decorates nearly every public Manager method so that calls
//! arriving off the main thread are queued and replayed once control
//! returns to it, and calls arriving while the Manager is inactive are
//! parked until the next `equilibrate`. Rust has no implicit "current
//! thread" dispatch magic to hang a decorator off; [`crate::manager::Manager`]
//! captures the toplevel Context's constructing thread id once and routes
//! every [`crate::manager::Manager::submit`] call through this queue, which
//! is flushed at the start of `equilibrate`.

use std::collections::VecDeque;
use std::thread::ThreadId;

use crate::id::{CellId, ConnectionId, PinId, StructuredCellId, WorkerId};

/// A deferred mutation, recorded verbatim so it can be replayed later in
/// the exact order it was submitted.
#[derive(Debug, Clone)]
pub enum QueuedCall {
    SetCell { cell: CellId, text: String, force: bool },
    TouchCell { cell: CellId },
    PinInput { pin: PinId, text: String },
    DisconnectCell { connection: ConnectionId },
    DisconnectPin { connection: ConnectionId },
    DestroySubtree { worker: WorkerId },
    WriteInchannel {
        structured_cell: StructuredCellId,
        path: Vec<String>,
        value: serde_json::Value,
    },
}

/// Holds calls that arrived off the main thread, or while the Manager was
/// inactive, until they can be safely applied.
#[derive(Debug, Default)]
pub struct Workqueue {
    main_thread: Option<ThreadId>,
    active: bool,
    queue: VecDeque<QueuedCall>,
}

impl Workqueue {
    pub fn new() -> Self {
        Self {
            main_thread: None,
            active: true,
            queue: VecDeque::new(),
        }
    }

    /// Capture the thread that constructed the toplevel Context. Every
    /// subsequent call is compared against this identity; this mirrors the
    /// Python original treating whichever thread built the root Context as
    /// "the main thread" rather than literally `threading.main_thread()`.
    pub fn bind_main_thread(&mut self, id: ThreadId) {
        self.main_thread = Some(id);
    }

    pub fn is_main_thread(&self, id: ThreadId) -> bool {
        self.main_thread.map(|m| m == id).unwrap_or(true)
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// True when `call` must be deferred rather than applied immediately:
    /// arriving off the main thread, or while the Manager is inactive.
    pub fn must_defer(&self, caller: ThreadId) -> bool {
        !self.is_main_thread(caller) || !self.active
    }

    pub fn push(&mut self, call: QueuedCall) {
        self.queue.push_back(call);
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Drain every queued call in submission order. Called at the start of
    /// `equilibrate`, which runs on the main thread with the Manager active
    /// by construction, so nothing can re-defer during the drain itself.
    pub fn drain(&mut self) -> Vec<QueuedCall> {
        self.queue.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defers_when_inactive() {
        let mut wq = Workqueue::new();
        let here = std::thread::current().id();
        wq.bind_main_thread(here);
        assert!(!wq.must_defer(here));
        wq.set_active(false);
        assert!(wq.must_defer(here));
    }

    #[test]
    fn drain_preserves_order() {
        let mut wq = Workqueue::new();
        let mut cells: slotmap::SlotMap<CellId, ()> = slotmap::SlotMap::with_key();
        let a = cells.insert(());
        let b = cells.insert(());
        wq.push(QueuedCall::TouchCell { cell: a });
        wq.push(QueuedCall::TouchCell { cell: b });
        let drained = wq.drain();
        assert_eq!(drained.len(), 2);
        assert!(matches!(drained[0], QueuedCall::TouchCell { cell } if cell == a));
        assert!(matches!(drained[1], QueuedCall::TouchCell { cell } if cell == b));
        assert!(wq.is_empty());
    }
}
