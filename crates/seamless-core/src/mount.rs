//! The mount-sink seam: cells may be mirrored to an external medium (a
//! file, typically) through a trait, so the core never links against a
//! filesystem or watcher crate directly. `seamless-mount` provides the
//! reference file-mirroring implementation.

use crate::dtype::CellKind;
use crate::id::CellId;

/// Which side is authoritative when a mounted cell's in-memory value and
/// its external copy disagree at mount time or after an external change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountAuthority {
    /// The cell's in-memory value wins; the external copy is overwritten.
    Cell,
    /// The external copy wins; the cell is updated to match it.
    File,
    /// Like `File`, but additionally requires `mode` to permit reading and
    /// `persistent` to be `Some(true)`; a sink rejects any other
    /// combination at `mount()` time rather than silently downgrading it.
    FileStrict,
}

/// How a cell's external representation should be kept current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountMode {
    /// Export the cell's value whenever it changes; never read back.
    Write,
    /// Watch the external medium and set the cell whenever it changes;
    /// never write out.
    Read,
    /// Both directions are live; `authority` decides the initial winner on
    /// conflict at mount time.
    ReadWrite,
}

/// Declares that a cell should be mirrored externally.
#[derive(Debug, Clone)]
pub struct MountDescriptor {
    pub cell: CellId,
    pub path: String,
    pub kind: CellKind,
    pub mode: MountMode,
    pub authority: MountAuthority,
    /// Whether the external file should survive `unmount`: `Some(true)`
    /// keeps it, `Some(false)` removes it, `None` leaves whatever the sink
    /// does by default. `MountAuthority::FileStrict` requires `Some(true)`.
    pub persistent: Option<bool>,
}

impl MountDescriptor {
    pub fn new(cell: CellId, path: impl Into<String>, kind: CellKind, mode: MountMode, authority: MountAuthority) -> Self {
        Self {
            cell,
            path: path.into(),
            kind,
            mode,
            authority,
            persistent: None,
        }
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = Some(persistent);
        self
    }

    /// Validate the `file-strict` constraint: it requires
    /// `r` in mode and `persistent=true`. Called by `Manager::mount_cell`
    /// before handing the descriptor to the sink, so every sink gets this
    /// check for free rather than re-implementing it.
    pub fn validate(&self) -> crate::error::Result<()> {
        if matches!(self.authority, MountAuthority::FileStrict)
            && (!matches!(self.mode, MountMode::Read | MountMode::ReadWrite) || self.persistent != Some(true))
        {
            return Err(crate::error::Error::structure(format!(
                "mount {}: file-strict authority requires read mode and persistent=true",
                self.path
            )));
        }
        Ok(())
    }
}

/// External collaborator: mirrors cell values to and from an external
/// medium. The Manager calls `export` after every settled write to a
/// mounted cell and polls `poll_imports` once per equilibration pass; it
/// never touches the filesystem (or whatever medium a sink chooses)
/// itself.
pub trait MountSink: Send {
    fn mount(&mut self, descriptor: MountDescriptor) -> crate::error::Result<()>;

    fn unmount(&mut self, cell: CellId);

    /// Push `text` out for `cell`, if it is mounted in `Write` or
    /// `ReadWrite` mode.
    fn export(&mut self, cell: CellId, text: &str) -> crate::error::Result<()>;

    /// Drain any externally-observed changes since the last poll. Called
    /// once per equilibration pass.
    fn poll_imports(&mut self, observed: &mut dyn FnMut(CellId, String));
}

/// A no-op sink for graphs that mount nothing, or for tests that only
/// exercise in-memory propagation.
#[derive(Default)]
pub struct NullMountSink;

impl MountSink for NullMountSink {
    fn mount(&mut self, _descriptor: MountDescriptor) -> crate::error::Result<()> {
        Ok(())
    }

    fn unmount(&mut self, _cell: CellId) {}

    fn export(&mut self, _cell: CellId, _text: &str) -> crate::error::Result<()> {
        Ok(())
    }

    fn poll_imports(&mut self, _observed: &mut dyn FnMut(CellId, String)) {}
}
