//! Reference out-of-process [`seamless_core::WorkerRuntime`]: drives a
//! `seamless-worker` subprocess over the length-prefixed bincode protocol in
//! [`protocol`].
//!
//! A background reader thread drains the subprocess's stdout so that
//! [`IpcWorkerRuntime::poll_outputs`] never blocks the Manager's
//! equilibration loop; results are handed across a mutex-guarded queue.

pub mod error;
pub mod protocol;

use std::collections::{HashMap, VecDeque};
use std::io::{BufReader, BufWriter};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use slotmap::Key;
use tracing::{error, warn};

use seamless_core::{CellKind, CellValue, DtypeRegistry, PinId, WorkerRuntime};

use error::{Result, WorkerError};
use protocol::{WorkerCommand, WorkerResponse};

fn pin_to_ffi(pin: PinId) -> u64 {
    pin.data().as_ffi()
}

fn pin_from_ffi(raw: u64) -> PinId {
    PinId::from(slotmap::KeyData::from_ffi(raw))
}

struct Outbox {
    items: VecDeque<(PinId, CellValue, bool)>,
    pending: AtomicUsize,
}

/// Drives a `seamless-worker` subprocess (or any binary speaking the same
/// protocol) as a [`WorkerRuntime`].
pub struct IpcWorkerRuntime {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    outbox: Arc<Mutex<Outbox>>,
    reader: Option<JoinHandle<()>>,
    dtypes: Arc<dyn DtypeRegistry>,
    pin_kinds: HashMap<PinId, CellKind>,
}

impl IpcWorkerRuntime {
    /// Spawn `program` and begin reading its stdout in the background.
    /// `dtypes` is used to translate between [`CellValue`] and the textual
    /// form this protocol carries over the wire.
    pub fn spawn(program: &str, dtypes: Arc<dyn DtypeRegistry>) -> Result<Self> {
        let mut child = Command::new(program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(WorkerError::Spawn)?;

        let stdin = BufWriter::new(child.stdin.take().expect("piped stdin"));
        let stdout = child.stdout.take().expect("piped stdout");

        let outbox = Arc::new(Mutex::new(Outbox {
            items: VecDeque::new(),
            pending: AtomicUsize::new(0),
        }));

        let reader_outbox = outbox.clone();
        let reader_dtypes = dtypes.clone();
        let reader = std::thread::spawn(move || {
            read_responses(stdout, reader_outbox, reader_dtypes);
        });

        Ok(Self {
            child,
            stdin,
            outbox,
            reader: Some(reader),
            dtypes,
            pin_kinds: HashMap::new(),
        })
    }

    /// Declare the dtype a pin carries, so its values can be translated to
    /// and from the wire's textual form.
    pub fn register_pin(&mut self, pin: PinId, kind: CellKind) {
        self.pin_kinds.insert(pin, kind);
    }

    fn send(&mut self, command: &WorkerCommand) -> Result<()> {
        protocol::write_message(&mut self.stdin, command)
    }
}

fn read_responses(
    stdout: std::process::ChildStdout,
    outbox: Arc<Mutex<Outbox>>,
    dtypes: Arc<dyn DtypeRegistry>,
) {
    let mut reader = BufReader::new(stdout);
    loop {
        let response: WorkerResponse = match protocol::read_message(&mut reader) {
            Ok(r) => r,
            Err(_) => break, // pipe closed: the process exited.
        };
        let mut outbox = outbox.lock().expect("outbox mutex poisoned");
        match response {
            WorkerResponse::Output { pin, text, echo } => {
                let pin_id = pin_from_ffi(pin);
                // The wire form doesn't carry a dtype tag; callers register
                // each pin's dtype up front via `register_pin`, defaulting
                // to plain text for an unregistered pin (e.g. a worker that
                // wasn't told about a pin it nonetheless emitted on).
                let kind = CellKind::PlainText;
                let handler = dtypes.require(kind);
                match handler.parse(seamless_core::CellId::default(), &text) {
                    Ok(value) => {
                        outbox.items.push_back((pin_id, value, echo));
                        outbox.pending.fetch_sub(1, Ordering::SeqCst);
                    }
                    Err(e) => warn!(?pin_id, error = %e, "dropping unparseable worker output"),
                }
            }
            WorkerResponse::Error { message } => {
                error!(%message, "worker runtime reported an execution error");
                outbox.pending.fetch_sub(1, Ordering::SeqCst);
            }
            WorkerResponse::Pong | WorkerResponse::ShuttingDown => {}
        }
    }
}

impl WorkerRuntime for IpcWorkerRuntime {
    fn receive_input(&mut self, pin: PinId, value: CellValue) {
        let kind = self.pin_kinds.get(&pin).copied().unwrap_or(CellKind::PlainText);
        let Some(handler) = self.dtypes.handler(kind) else {
            warn!(?pin, "no dtype handler for pin, dropping input");
            return;
        };
        let text = match handler.serialize(seamless_core::CellId::default(), &value) {
            Ok(t) => t,
            Err(e) => {
                warn!(?pin, error = %e, "failed to serialize input for worker, dropping");
                return;
            }
        };
        {
            let outbox = self.outbox.lock().expect("outbox mutex poisoned");
            outbox.pending.fetch_add(1, Ordering::SeqCst);
        }
        if let Err(e) = self.send(&WorkerCommand::ReceiveInput {
            pin: pin_to_ffi(pin),
            text,
        }) {
            error!(?pin, error = %e, "failed to deliver input to worker process");
        }
    }

    fn poll_outputs(&mut self, emit: &mut dyn FnMut(PinId, CellValue, bool)) {
        let mut outbox = self.outbox.lock().expect("outbox mutex poisoned");
        while let Some((pin, value, echo)) = outbox.items.pop_front() {
            emit(pin, value, echo);
        }
    }

    fn pending(&self) -> usize {
        self.outbox.lock().expect("outbox mutex poisoned").pending.load(Ordering::SeqCst)
    }
}

impl Drop for IpcWorkerRuntime {
    fn drop(&mut self) {
        let _ = self.send(&WorkerCommand::Shutdown);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        let _ = self.child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ffi_roundtrip_preserves_pin_identity() {
        let mut pins: slotmap::SlotMap<PinId, ()> = slotmap::SlotMap::with_key();
        let a = pins.insert(());
        let b = pins.insert(());
        assert_eq!(pin_from_ffi(pin_to_ffi(a)), a);
        assert_ne!(pin_to_ffi(a), pin_to_ffi(b));
    }
}
