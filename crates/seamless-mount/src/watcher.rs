//! A minimal per-path file watcher used by [`crate::FileMountSink`] to
//! detect external edits to a mounted file.
//!
//! One [`PathWatcher`] per mounted file keeps things simple at the cost of
//! one OS watch handle per mount; Seamless graphs mount a handful of cells
//! at most; see `DESIGN.md` for the tradeoff against a single
//! directory-wide watcher.

use std::path::Path;
use std::time::Duration;

use notify_debouncer_mini::{DebounceEventResult, new_debouncer, notify::RecursiveMode};

use crate::error::{MountError, MountResult};

const DEBOUNCE: Duration = Duration::from_millis(200);

/// Watches a single file's parent directory and invokes `on_change` with
/// the file's new contents whenever that exact path is created or
/// modified. Held alive for as long as the mount is live; dropping it
/// stops the watch.
pub struct PathWatcher {
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
}

impl PathWatcher {
    pub fn spawn(path: &Path, mut on_change: impl FnMut(String) + Send + 'static) -> MountResult<Self> {
        let target = path.to_path_buf();
        let watch_dir = target.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new(".")).to_path_buf();

        let mut debouncer = new_debouncer(DEBOUNCE, move |result: DebounceEventResult| {
            let Ok(events) = result else { return };
            for event in events {
                if event.path != target {
                    continue;
                }
                if let Ok(text) = std::fs::read_to_string(&target) {
                    on_change(text);
                }
            }
        })
        .map_err(|e| MountError::Watch(e.to_string()))?;

        debouncer
            .watcher()
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .map_err(|e| MountError::Watch(e.to_string()))?;

        Ok(Self { _debouncer: debouncer })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn detects_external_modification() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cell.txt");
        fs::write(&path, "initial").unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let _watcher = PathWatcher::spawn(&path, move |text| {
            seen2.lock().unwrap().push(text);
        })
        .unwrap();

        thread::sleep(Duration::from_millis(100));
        fs::write(&path, "changed").unwrap();
        thread::sleep(Duration::from_millis(500));

        let seen = seen.lock().unwrap();
        assert!(seen.iter().any(|t| t == "changed"), "watcher did not observe the write: {seen:?}");
    }
}
