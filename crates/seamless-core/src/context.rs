//! Contexts: the nesting/namespacing tree that groups cells and workers.
//!
//! The Python original gives each nested Context its own sub-manager and
//! links parent/child through (occasionally weak) object references. This
//! crate keeps a single [`crate::manager::Manager`] per toplevel context
//! tree instead and represents nesting as plain parent/child id edges into
//! one shared arena — see the Design Notes in `DESIGN.md` for why that
//! simplification is safe here.

use crate::id::{CellId, ContextId, WorkerId};

#[derive(Debug, Clone)]
pub struct ContextState {
    pub id: ContextId,
    pub parent: Option<ContextId>,
    pub name: String,
    pub children: Vec<ContextId>,
    pub cells: Vec<CellId>,
    pub workers: Vec<WorkerId>,
}

impl ContextState {
    pub fn new_root(id: ContextId) -> Self {
        Self {
            id,
            parent: None,
            name: String::new(),
            children: Vec::new(),
            cells: Vec::new(),
            workers: Vec::new(),
        }
    }

    pub fn new_child(id: ContextId, parent: ContextId, name: impl Into<String>) -> Self {
        Self {
            id,
            parent: Some(parent),
            name: name.into(),
            children: Vec::new(),
            cells: Vec::new(),
            workers: Vec::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Dotted path from the toplevel root to this context, e.g. `a.b.c`.
    /// Used for human-readable diagnostics and for mount path derivation.
    pub fn path(&self, ancestors: &[&ContextState]) -> String {
        let mut parts: Vec<&str> = ancestors.iter().map(|c| c.name.as_str()).collect();
        if !self.name.is_empty() {
            parts.push(&self.name);
        }
        parts.join(".")
    }
}
