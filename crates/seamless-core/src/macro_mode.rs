//! Macro mode: nested structural-edit transactions.
//!
//! While inside a macro-mode scope, structural errors ([`crate::error::Error::Structure`])
//! abort the whole scope and roll back every structural change made since
//! it was entered, rather than leaving the graph half-edited. Scopes nest;
//! only the outermost scope's exit actually commits or rolls back (inner
//! exits just decrement the depth counter), matching the Python original's
//! reentrant `with manager.macro_mode():` usage.

use crate::cell::CellState;
use crate::context::ContextState;
use crate::id::{CellId, ConnectionId, ContextId, PinId, StructuredCellId, WorkerId};
use crate::pin::PinState;
use crate::structured_cell::StructuredCellState;
use crate::worker::WorkerState;

/// A snapshot of everything a macro-mode scope might mutate structurally.
/// [`crate::manager::Manager`] fills this in when a scope is entered and
/// replays it verbatim on rollback; it is otherwise opaque to this module.
///
/// Restoring on abort is a two-step "purge, then overwrite": any entity
/// whose id isn't in the matching list here was created during the aborted
/// scope and is removed outright (this is what makes a structural rollback
/// undo *creation*, not just value changes — spec scenario: a cell created
/// and written to inside a failed scope must vanish, not just revert its
/// value); everything whose id persists is overwritten with its stashed
/// state.
#[derive(Debug, Clone, Default)]
pub struct Stash {
    pub cells: Vec<(CellId, CellState)>,
    pub workers: Vec<(WorkerId, WorkerState)>,
    pub pins: Vec<(PinId, PinState)>,
    pub structured_cells: Vec<(StructuredCellId, StructuredCellState)>,
    pub contexts: Vec<(ContextId, ContextState)>,
    pub connection_ids: Vec<ConnectionId>,
}

impl Stash {
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
            && self.workers.is_empty()
            && self.pins.is_empty()
            && self.structured_cells.is_empty()
            && self.contexts.is_empty()
            && self.connection_ids.is_empty()
    }
}

impl Clone for WorkerState {
    fn clone(&self) -> Self {
        // WorkerRuntime is not Clone (it may own a live subprocess); a
        // rolled-back worker loses its attached runtime and returns to
        // Void, since structural rollback tears down live workers.
        WorkerState {
            id: self.id,
            context: self.context,
            name: self.name.clone(),
            pins: self.pins.clone(),
            status: crate::worker::WorkerStatus::Void,
            runtime: None,
            last_error: self.last_error.clone(),
        }
    }
}

/// Nested structural-edit transaction stack.
#[derive(Debug, Default)]
pub struct MacroModeStack {
    depth: usize,
    /// The stash captured when the outermost scope was entered.
    outer_stash: Option<Stash>,
}

impl MacroModeStack {
    pub fn new() -> Self {
        Self {
            depth: 0,
            outer_stash: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.depth > 0
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Enter a scope. `capture` is called only when this is the outermost
    /// entry (depth 0 -> 1); nested entries are no-ops beyond the counter.
    pub fn enter(&mut self, capture: impl FnOnce() -> Stash) {
        if self.depth == 0 {
            self.outer_stash = Some(capture());
        }
        self.depth += 1;
    }

    /// Exit a scope successfully. Returns `true` when this was the
    /// outermost exit (the stash should now be discarded by the caller).
    pub fn commit(&mut self) -> bool {
        debug_assert!(self.depth > 0, "macro_mode commit without matching enter");
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 {
            self.outer_stash = None;
            true
        } else {
            false
        }
    }

    /// Abort every nesting level at once (a structural error unwinds the
    /// whole scope, not just the innermost `with` block) and hand back the
    /// stash to restore, if this was genuinely inside a scope.
    pub fn abort(&mut self) -> Option<Stash> {
        if self.depth == 0 {
            return None;
        }
        self.depth = 0;
        self.outer_stash.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_scopes_only_commit_outermost() {
        let mut stack = MacroModeStack::new();
        stack.enter(Stash::default);
        assert_eq!(stack.depth(), 1);
        stack.enter(Stash::default);
        assert_eq!(stack.depth(), 2);
        assert!(!stack.commit());
        assert!(stack.is_active());
        assert!(stack.commit());
        assert!(!stack.is_active());
    }

    #[test]
    fn abort_unwinds_all_levels() {
        let mut stack = MacroModeStack::new();
        stack.enter(Stash::default);
        stack.enter(Stash::default);
        let stash = stack.abort();
        assert!(stash.is_some());
        assert!(!stack.is_active());
    }
}
