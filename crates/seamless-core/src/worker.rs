//! Workers: the executable nodes of a Seamless graph, backed by an external
//! [`WorkerRuntime`] collaborator the core never inspects the internals of.

use std::collections::HashMap;

use crate::dtype::CellValue;
use crate::id::{ContextId, PinId, WorkerId};
use crate::pin::PinKind;

/// External collaborator: something that can consume pin inputs and
/// eventually produce pin outputs. The reference implementation
/// (`seamless-worker`) runs this over a subprocess via length-prefixed
/// bincode IPC; a test double can run it entirely in-process.
///
/// Calls into a `WorkerRuntime` only ever happen from the Manager's single
/// submission point (see [`crate::manager::Manager::submit`]), so
/// implementations do not need to be internally synchronized against
/// concurrent calls from this crate — only against whatever background
/// work they do on their own (e.g. a subprocess).
pub trait WorkerRuntime: Send {
    /// Deliver a new input value on `pin`. Must not block; a runtime that
    /// needs to do real work should queue it and do the work out of band,
    /// surfacing results later through `poll_outputs`.
    fn receive_input(&mut self, pin: PinId, value: CellValue);

    /// Drain any outputs produced since the last call. `emit` is invoked
    /// once per `(pin, value)` pair ready to be written back into the
    /// graph; the `bool` flags whether this is a duplex edit-pin echo that
    /// should be suppressed at its origin.
    fn poll_outputs(&mut self, emit: &mut dyn FnMut(PinId, CellValue, bool));

    /// Number of inputs delivered but not yet reflected in an output or an
    /// explicit completion signal. The Manager's equilibration loop treats
    /// a nonzero count across all workers as "not yet settled".
    fn pending(&self) -> usize;
}

/// A worker's lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// No runtime attached yet, or all pins void.
    Void,
    /// Runtime attached and not currently reporting pending work.
    Ready,
    /// Runtime has received input it has not yet finished processing.
    Pending,
    /// Most recent execution raised; captured, non-fatal (invariant E2).
    Error,
}

pub struct WorkerState {
    pub id: WorkerId,
    pub context: ContextId,
    pub name: String,
    pub pins: Vec<PinId>,
    pub status: WorkerStatus,
    pub runtime: Option<Box<dyn WorkerRuntime>>,
    pub last_error: Option<String>,
}

impl std::fmt::Debug for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerState")
            .field("id", &self.id)
            .field("context", &self.context)
            .field("name", &self.name)
            .field("pins", &self.pins)
            .field("status", &self.status)
            .field("has_runtime", &self.runtime.is_some())
            .field("last_error", &self.last_error)
            .finish()
    }
}

impl WorkerState {
    pub fn new(id: WorkerId, context: ContextId, name: impl Into<String>) -> Self {
        Self {
            id,
            context,
            name: name.into(),
            pins: Vec::new(),
            status: WorkerStatus::Void,
            runtime: None,
            last_error: None,
        }
    }

    pub fn attach_runtime(&mut self, runtime: Box<dyn WorkerRuntime>) {
        self.runtime = Some(runtime);
        self.status = WorkerStatus::Ready;
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.status = WorkerStatus::Error;
        self.last_error = Some(message.into());
    }

    pub fn is_settled(&self) -> bool {
        match &self.runtime {
            Some(rt) => rt.pending() == 0,
            None => true,
        }
    }
}

/// A trivial in-process [`WorkerRuntime`] useful for tests and for workers
/// that only ever pass values through untouched (e.g. monitoring probes).
///
/// Without a mirror map, an input pin re-emits on itself: correct for a
/// duplex Edit pin (the only pin that has both a feed and an emit
/// connection) but a no-op for a plain Input pin, which has no
/// `emit_connection` for the Manager to write through. [`EchoRuntime::mirrored`]
/// builds the map from a worker's declared pins so an Input pin's value
/// re-emits on its identically-named Output pin instead.
#[derive(Default)]
pub struct EchoRuntime {
    outbox: Vec<(PinId, CellValue, bool)>,
    /// Input/Edit pin -> the pin its received value should be emitted on.
    /// Absent entries fall back to emitting on the same pin (the Edit-pin
    /// duplex case, and the harmless no-op case for an unconnected Input).
    mirror: HashMap<PinId, PinId>,
}

impl EchoRuntime {
    /// Build an `EchoRuntime` that emits each input pin's value on its
    /// counterpart output pin, per `pins` (name, kind, id) triples as
    /// declared on the owning worker. An input is paired with the output of
    /// the same name where one exists; failing that, if exactly one output
    /// pin is left unclaimed, every remaining input falls back to it (the
    /// common case of a single differently-named input/output pass-through
    /// pin pair). Any input still unmatched falls back to self-echo.
    pub fn mirrored(pins: &[(String, PinKind, PinId)]) -> Self {
        let mut mirror = HashMap::new();
        let mut claimed = std::collections::HashSet::new();
        for (name, kind, id) in pins {
            if !matches!(kind, PinKind::Input) {
                continue;
            }
            if let Some((_, _, out_id)) = pins
                .iter()
                .find(|(other_name, other_kind, other_id)| {
                    other_name == name && matches!(other_kind, PinKind::Output) && !claimed.contains(other_id)
                })
            {
                mirror.insert(*id, *out_id);
                claimed.insert(*out_id);
            }
        }
        let unclaimed_outputs: Vec<PinId> = pins
            .iter()
            .filter(|(_, kind, id)| matches!(kind, PinKind::Output) && !claimed.contains(id))
            .map(|(_, _, id)| *id)
            .collect();
        if let [fallback] = unclaimed_outputs[..] {
            for (_, kind, id) in pins {
                if matches!(kind, PinKind::Input) && !mirror.contains_key(id) {
                    mirror.insert(*id, fallback);
                }
            }
        }
        Self {
            outbox: Vec::new(),
            mirror,
        }
    }
}

impl WorkerRuntime for EchoRuntime {
    fn receive_input(&mut self, pin: PinId, value: CellValue) {
        let target = self.mirror.get(&pin).copied().unwrap_or(pin);
        self.outbox.push((target, value, false));
    }

    fn poll_outputs(&mut self, emit: &mut dyn FnMut(PinId, CellValue, bool)) {
        for (pin, value, echo) in self.outbox.drain(..) {
            emit(pin, value, echo);
        }
    }

    fn pending(&self) -> usize {
        self.outbox.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn echo_runtime_round_trips() {
        let mut pins: SlotMap<PinId, ()> = SlotMap::with_key();
        let pin = pins.insert(());
        let mut rt = EchoRuntime::default();
        rt.receive_input(pin, CellValue::Text("hi".into()));
        assert_eq!(rt.pending(), 1);
        let mut seen = Vec::new();
        rt.poll_outputs(&mut |p, v, echo| seen.push((p, v, echo)));
        assert_eq!(seen.len(), 1);
        assert_eq!(rt.pending(), 0);
    }
}
