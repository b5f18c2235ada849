//! Reference [`MountSink`]: mirrors cell values to files on disk.
//!
//! The core never links against a filesystem or watcher crate; it only
//! calls `export` after a settled write to a mounted cell and polls
//! `poll_imports` once per equilibration pass. This
//! crate is the reference implementation of that seam: `Write`/`ReadWrite`
//! mounts write the cell's serialized text out to `path` on every export;
//! `Read`/`ReadWrite` mounts additionally watch `path` for external edits
//! and queue its contents as an import.

pub mod error;
pub mod watcher;

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::warn;

use seamless_core::error::{Error, Result};
use seamless_core::{CellId, MountAuthority, MountDescriptor, MountMode, MountSink};

pub use error::{MountError, MountResult};
pub use watcher::PathWatcher;

struct MountEntry {
    path: PathBuf,
    mode: MountMode,
    persistent: Option<bool>,
    /// Kept alive for as long as the mount is live; `None` for `Write`-only
    /// mounts, which never need to observe external changes.
    _watcher: Option<PathWatcher>,
}

/// Mirrors mounted cells to files, watching readable mounts for external
/// edits. One sink instance is shared by every context built on top of the
/// same [`seamless_core::Manager`].
pub struct FileMountSink {
    entries: HashMap<CellId, MountEntry>,
    imports: Arc<Mutex<Vec<(CellId, String)>>>,
    /// Distinct export-failure messages already logged, so a mount stuck in
    /// a permission-denied loop doesn't spam the log on every cell write.
    warned: HashSet<(CellId, String)>,
}

impl FileMountSink {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            imports: Arc::new(Mutex::new(Vec::new())),
            warned: HashSet::new(),
        }
    }

    fn warn_once(&mut self, cell: CellId, message: String) {
        if self.warned.insert((cell, message.clone())) {
            warn!(?cell, error = %message, "mount I/O failed");
        }
    }
}

impl Default for FileMountSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MountSink for FileMountSink {
    fn mount(&mut self, descriptor: MountDescriptor) -> Result<()> {
        let path = PathBuf::from(&descriptor.path);
        let readable = matches!(descriptor.mode, MountMode::Read | MountMode::ReadWrite);

        // Authority::File(Strict) prefers whatever is already on disk: seed
        // an import before we start watching for further changes.
        if readable
            && matches!(descriptor.authority, MountAuthority::File | MountAuthority::FileStrict)
            && path.exists()
        {
            match fs::read_to_string(&path) {
                Ok(text) => self.imports.lock().expect("mount import queue poisoned").push((descriptor.cell, text)),
                Err(e) => self.warn_once(descriptor.cell, e.to_string()),
            }
        }

        let watcher = if readable {
            let imports = self.imports.clone();
            let cell = descriptor.cell;
            match PathWatcher::spawn(&path, move |text| {
                imports.lock().expect("mount import queue poisoned").push((cell, text));
            }) {
                Ok(w) => Some(w),
                Err(e) => {
                    self.warn_once(cell, e.to_string());
                    None
                }
            }
        } else {
            None
        };

        self.entries.insert(
            descriptor.cell,
            MountEntry {
                path,
                mode: descriptor.mode,
                persistent: descriptor.persistent,
                _watcher: watcher,
            },
        );
        Ok(())
    }

    fn unmount(&mut self, cell: CellId) {
        let Some(entry) = self.entries.remove(&cell) else { return };
        let should_remove = matches!(entry.mode, MountMode::Write | MountMode::ReadWrite) && entry.persistent == Some(false);
        if should_remove {
            if let Err(e) = fs::remove_file(&entry.path) {
                warn!(?cell, path = %entry.path.display(), error = %e, "failed to remove non-persistent mount file on unmount");
            }
        }
    }

    fn export(&mut self, cell: CellId, text: &str) -> Result<()> {
        let Some(entry) = self.entries.get(&cell) else { return Ok(()) };
        if !matches!(entry.mode, MountMode::Write | MountMode::ReadWrite) {
            return Ok(());
        }
        if let Err(e) = fs::write(&entry.path, text) {
            self.warn_once(cell, e.to_string());
        }
        Ok(())
    }

    fn poll_imports(&mut self, observed: &mut dyn FnMut(CellId, String)) {
        let drained: Vec<_> = self.imports.lock().expect("mount import queue poisoned").drain(..).collect();
        for (cell, text) in drained {
            observed(cell, text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seamless_core::CellKind;
    use slotmap::SlotMap;
    use tempfile::TempDir;

    fn dummy_cell() -> CellId {
        let mut sm: SlotMap<CellId, ()> = SlotMap::with_key();
        sm.insert(())
    }

    #[test]
    fn write_mode_exports_but_never_imports() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.json");
        let cell = dummy_cell();
        let mut sink = FileMountSink::new();
        sink.mount(MountDescriptor::new(cell, path.to_string_lossy(), CellKind::Json, MountMode::Write, MountAuthority::Cell))
            .unwrap();
        sink.export(cell, "42").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "42");

        let mut seen = Vec::new();
        sink.poll_imports(&mut |c, t| seen.push((c, t)));
        assert!(seen.is_empty());
    }

    #[test]
    fn file_authority_seeds_import_from_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("in.json");
        fs::write(&path, "7").unwrap();
        let cell = dummy_cell();
        let mut sink = FileMountSink::new();
        sink.mount(MountDescriptor::new(cell, path.to_string_lossy(), CellKind::Json, MountMode::Read, MountAuthority::File))
            .unwrap();

        let mut seen = Vec::new();
        sink.poll_imports(&mut |c, t| seen.push((c, t)));
        assert_eq!(seen, vec![(cell, "7".to_string())]);
    }

    #[test]
    fn unmount_removes_non_persistent_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scratch.json");
        let cell = dummy_cell();
        let mut sink = FileMountSink::new();
        sink.mount(
            MountDescriptor::new(cell, path.to_string_lossy(), CellKind::Json, MountMode::Write, MountAuthority::Cell)
                .persistent(false),
        )
        .unwrap();
        sink.export(cell, "1").unwrap();
        assert!(path.exists());
        sink.unmount(cell);
        assert!(!path.exists());
    }

    #[test]
    fn unmount_keeps_persistent_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keep.json");
        let cell = dummy_cell();
        let mut sink = FileMountSink::new();
        sink.mount(
            MountDescriptor::new(cell, path.to_string_lossy(), CellKind::Json, MountMode::Write, MountAuthority::Cell)
                .persistent(true),
        )
        .unwrap();
        sink.export(cell, "1").unwrap();
        sink.unmount(cell);
        assert!(path.exists());
    }

    #[test]
    fn file_strict_requires_read_and_persistent() {
        let cell = dummy_cell();
        let bad = MountDescriptor::new(cell, "x.json", CellKind::Json, MountMode::Write, MountAuthority::FileStrict);
        assert!(bad.validate().is_err());

        let ok = MountDescriptor::new(cell, "x.json", CellKind::Json, MountMode::Read, MountAuthority::FileStrict).persistent(true);
        assert!(ok.validate().is_ok());
    }
}
