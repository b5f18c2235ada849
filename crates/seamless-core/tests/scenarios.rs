//! End-to-end scenarios exercising a [`Manager`] the way a real graph would:
//! built up through its public API, never reaching into arena internals.

use seamless_core::{
    AliasDirection, CellKind, CellStatus, CellValue, EchoRuntime, Manager, PinKind, SetOutcome,
};

/// A worker runtime that adds its two input pins together and emits the sum
/// on its output pin, immediately and synchronously, mirroring the "sum
/// transformer" scenario.
struct SumRuntime {
    a: Option<i64>,
    b: Option<i64>,
    a_pin: seamless_core::PinId,
    b_pin: seamless_core::PinId,
    out_pin: seamless_core::PinId,
    ready: Option<i64>,
}

impl SumRuntime {
    fn new(a_pin: seamless_core::PinId, b_pin: seamless_core::PinId, out_pin: seamless_core::PinId) -> Self {
        Self {
            a: None,
            b: None,
            a_pin,
            b_pin,
            out_pin,
            ready: None,
        }
    }
}

impl seamless_core::WorkerRuntime for SumRuntime {
    fn receive_input(&mut self, pin: seamless_core::PinId, value: CellValue) {
        let n = value.as_json().and_then(|v| v.as_i64());
        if pin == self.a_pin {
            self.a = n;
        } else if pin == self.b_pin {
            self.b = n;
        }
        if let (Some(a), Some(b)) = (self.a, self.b) {
            self.ready = Some(a + b);
        }
    }

    fn poll_outputs(&mut self, emit: &mut dyn FnMut(seamless_core::PinId, CellValue, bool)) {
        if let Some(sum) = self.ready.take() {
            emit(self.out_pin, CellValue::Json(serde_json::json!(sum)), false);
        }
    }

    fn pending(&self) -> usize {
        self.ready.is_some() as usize
    }
}

#[test]
fn scenario_sum_transformer() {
    let mut m = Manager::new();
    let root = m.root();
    let cell_a = m.new_cell(root, "a", CellKind::Json).unwrap();
    let cell_b = m.new_cell(root, "b", CellKind::Json).unwrap();
    let cell_out = m.new_cell(root, "out", CellKind::Json).unwrap();

    let worker = m.new_worker(root, "sum").unwrap();
    let pin_a = m.new_pin(worker, "a", PinKind::Input, CellKind::Json).unwrap();
    let pin_b = m.new_pin(worker, "b", PinKind::Input, CellKind::Json).unwrap();
    let pin_out = m.new_pin(worker, "out", PinKind::Output, CellKind::Json).unwrap();
    m.attach_worker_runtime(worker, Box::new(SumRuntime::new(pin_a, pin_b, pin_out)))
        .unwrap();

    m.connect_pin(cell_a, pin_a).unwrap();
    m.connect_pin(cell_b, pin_b).unwrap();
    m.connect_pin(cell_out, pin_out).unwrap();

    m.set_cell(cell_a, "3", false).unwrap();
    m.set_cell(cell_b, "4", false).unwrap();
    m.equilibrate().unwrap();

    assert_eq!(m.cell(cell_out).unwrap().value, Some(CellValue::Json(serde_json::json!(7))));
    assert_eq!(m.status_of(cell_out).unwrap(), CellStatus::Ok);
}

#[test]
fn scenario_validation_rollback() {
    let mut m = Manager::new();
    let root = m.root();
    let cell = m.new_cell(root, "config", CellKind::Json).unwrap();

    m.set_cell(cell, r#"{"retries": 3}"#, false).unwrap();
    assert_eq!(m.status_of(cell).unwrap(), CellStatus::Ok);
    let good_value = m.cell(cell).unwrap().value.clone();

    let err = m.set_cell(cell, "{not valid json", false).unwrap_err();
    assert!(matches!(err, seamless_core::Error::Validation { .. }));
    assert_eq!(m.status_of(cell).unwrap(), CellStatus::Error);
    // The previous good value is retained; only status flips.
    assert_eq!(m.cell(cell).unwrap().value, good_value);
}

#[test]
fn scenario_authority_enforcement() {
    let mut m = Manager::new();
    let root = m.root();
    let source = m.new_cell(root, "source", CellKind::Json).unwrap();
    let mirror = m.new_cell(root, "mirror", CellKind::Json).unwrap();

    m.connect_cell(source, mirror, AliasDirection::OneWay).unwrap();
    m.set_cell(source, "1", false).unwrap();
    assert_eq!(m.cell(mirror).unwrap().value, Some(CellValue::Json(serde_json::json!(1))));

    // Direct write to the slave side is overruled (a warning, not an error)
    // and does not disturb the mirrored value.
    let outcome = m.set_cell(mirror, "999", false).unwrap();
    assert!(matches!(outcome, SetOutcome::Overruled));
    assert_eq!(m.cell(mirror).unwrap().value, Some(CellValue::Json(serde_json::json!(1))));

    // A forced write is still honored (escape hatch for tooling / tests).
    m.set_cell(mirror, "2", true).unwrap();
    assert_eq!(m.cell(mirror).unwrap().value, Some(CellValue::Json(serde_json::json!(2))));

    // Invariant C1: a cell accepts at most one active incoming non-duplex
    // connection. A second one-way alias into the already-Slave `mirror`
    // is a hard structural error, not a silent second driver.
    let other_source = m.new_cell(root, "other_source", CellKind::Json).unwrap();
    let err = m.connect_cell(other_source, mirror, AliasDirection::OneWay).unwrap_err();
    assert!(matches!(err, seamless_core::Error::Structure(_)));

    // Same invariant via a worker output pin targeting the same cell.
    let worker = m.new_worker(root, "driver").unwrap();
    let out_pin = m.new_pin(worker, "out", PinKind::Output, CellKind::Json).unwrap();
    let err = m.connect_pin(mirror, out_pin).unwrap_err();
    assert!(matches!(err, seamless_core::Error::Structure(_)));
}

#[test]
fn scenario_structural_rollback() {
    let mut m = Manager::new();
    let root = m.root();
    let cell = m.new_cell(root, "x", CellKind::Json).unwrap();
    m.set_cell(cell, "1", false).unwrap();

    let worker = m.new_worker(root, "probe").unwrap();
    let pin = m.new_pin(worker, "in", PinKind::Input, CellKind::Json).unwrap();
    m.attach_worker_runtime(worker, Box::new(EchoRuntime::default())).unwrap();

    m.enter_macro_mode();
    m.connect_pin(cell, pin).unwrap();
    m.set_cell(cell, "2", false).unwrap();
    assert_eq!(m.cell(cell).unwrap().value, Some(CellValue::Json(serde_json::json!(2))));

    // Something downstream hit a structural error; abort the whole scope.
    m.abort_macro_mode();

    assert!(!m.in_macro_mode());
    assert_eq!(m.cell(cell).unwrap().value, Some(CellValue::Json(serde_json::json!(1))));
    // The worker is reverted to its pre-scope snapshot, losing its live
    // runtime and the pending input it had received inside the scope.
    assert_eq!(m.worker(worker).unwrap().status, seamless_core::WorkerStatus::Void);
}

#[test]
fn scenario_structural_rollback_removes_entities_created_in_scope() {
    let mut m = Manager::new();
    let root = m.root();

    m.enter_macro_mode();
    let x = m.new_cell(root, "x", CellKind::Text).unwrap();
    m.set_cell(x, "hello", false).unwrap();
    let worker = m.new_worker(root, "probe").unwrap();
    let pin = m.new_pin(worker, "in", PinKind::Input, CellKind::Text).unwrap();
    m.connect_pin(x, pin).unwrap();
    assert!(m.cell(x).is_ok());

    // A structural error deeper in the scope aborts the whole thing: the
    // cell, worker, pin, and connection created since entry must vanish
    // entirely, not just revert their values.
    m.abort_macro_mode();

    assert!(!m.in_macro_mode());
    assert!(matches!(m.cell(x), Err(seamless_core::Error::UnknownCell(_))));
    assert!(matches!(m.worker(worker), Err(seamless_core::Error::UnknownWorker(_))));
}

#[test]
fn scenario_signal_cell_carries_no_value() {
    let mut m = Manager::new();
    let root = m.root();
    let cell = m.new_cell(root, "tick", CellKind::Signal).unwrap();

    let outcome = m.set_cell(cell, "", false).unwrap();
    assert!(matches!(outcome, SetOutcome::Applied));
    assert_eq!(m.cell(cell).unwrap().value, Some(CellValue::Signal));
    assert_eq!(m.status_of(cell).unwrap(), CellStatus::Ok);
}

#[test]
fn scenario_structured_cell_path_edit() {
    use seamless_core::structured_cell::StructuredCellState;
    use slotmap::SlotMap;

    let mut ids: SlotMap<seamless_core::StructuredCellId, ()> = SlotMap::with_key();
    let sc_id = ids.insert(());
    let mut cells: SlotMap<seamless_core::CellId, ()> = SlotMap::with_key();
    let data_cell = cells.insert(());

    let mut sc = StructuredCellState::new(
        sc_id,
        data_cell,
        None,
        serde_json::json!({"points": [{"x": 0, "y": 0}, {"x": 1, "y": 1}]}),
    );
    sc.monitor.register_out(vec!["points".into(), "0".into(), "x".into()]);

    sc.fork();
    sc.write_path(&["points".into(), "0".into(), "x".into()], serde_json::json!(42))
        .unwrap();
    // Readers of the committed value see no change until commit.
    assert_eq!(
        sc.value["points"][0]["x"],
        serde_json::json!(0)
    );
    let changed = sc.commit_fork().unwrap();
    assert_eq!(changed, vec![vec!["points".to_string(), "0".to_string(), "x".to_string()]]);
    assert_eq!(sc.value["points"][0]["x"], serde_json::json!(42));

    let affected = sc.monitor.affected_outchannels(&changed[0]);
    assert_eq!(affected.len(), 1);
}

#[test]
fn scenario_structured_cell_through_manager() {
    let mut m = Manager::new();
    let root = m.root();

    let sc = m
        .new_structured_cell(
            root,
            "shape",
            CellKind::Json,
            serde_json::json!({"points": [{"x": 0, "y": 0}]}),
        )
        .unwrap();

    let x_out = m.new_cell(root, "x_out", CellKind::Json).unwrap();
    m.connect_outchannel_to_cell(sc, vec!["points".into(), "0".into(), "x".into()], x_out)
        .unwrap();

    let x_in = m.new_cell(root, "x_in", CellKind::Json).unwrap();
    m.connect_inchannel(sc, x_in, vec!["points".into(), "0".into(), "x".into()])
        .unwrap();

    // Writing through the inchannel's source cell re-routes into the
    // structured value and fires the outchannel watching the same path.
    m.set_cell(x_in, "5", false).unwrap();
    assert_eq!(m.cell(x_out).unwrap().value, Some(CellValue::Json(serde_json::json!(5))));
    assert_eq!(
        m.read_outchannel(sc, &["points".to_string(), "0".to_string(), "x".to_string()])
            .unwrap(),
        Some(serde_json::json!(5))
    );

    // A direct write_inchannel bypasses the source cell and still fires.
    m.write_inchannel(sc, vec!["points".into(), "0".into(), "y".into()], serde_json::json!(9))
        .unwrap();
    assert_eq!(
        m.read_outchannel(sc, &["points".to_string(), "0".to_string(), "y".to_string()])
            .unwrap(),
        Some(serde_json::json!(9))
    );

    // The data cell mirrors the whole composite value.
    let data_cell = m.structured_cell(sc).unwrap().data_cell;
    assert_eq!(
        m.cell(data_cell).unwrap().value,
        Some(CellValue::Json(serde_json::json!({"points": [{"x": 5, "y": 9}]})))
    );
}

#[test]
fn scenario_structured_cell_fork_commit_batches_outchannels() {
    let mut m = Manager::new();
    let root = m.root();

    let sc = m
        .new_structured_cell(root, "config", CellKind::Json, serde_json::json!({"a": 1, "b": 2}))
        .unwrap();

    let a_out = m.new_cell(root, "a_out", CellKind::Json).unwrap();
    let b_out = m.new_cell(root, "b_out", CellKind::Json).unwrap();
    m.connect_outchannel_to_cell(sc, vec!["a".into()], a_out).unwrap();
    m.connect_outchannel_to_cell(sc, vec!["b".into()], b_out).unwrap();

    m.structured_cell_mut(sc).unwrap().fork();
    m.structured_cell_mut(sc).unwrap().write_path(&["a".to_string()], serde_json::json!(10)).unwrap();
    m.structured_cell_mut(sc).unwrap().write_path(&["b".to_string()], serde_json::json!(20)).unwrap();

    // Readers see nothing until commit.
    assert_eq!(m.cell(a_out).unwrap().value, None);

    m.commit_structured_fork(sc).unwrap();

    assert_eq!(m.cell(a_out).unwrap().value, Some(CellValue::Json(serde_json::json!(10))));
    assert_eq!(m.cell(b_out).unwrap().value, Some(CellValue::Json(serde_json::json!(20))));
}

#[test]
fn scenario_structured_cell_schema_gates_outchannel() {
    let mut m = Manager::new();
    let root = m.root();

    let sc = m.new_structured_cell(root, "record", CellKind::Json, serde_json::json!({})).unwrap();
    m.set_structured_cell_schema(
        sc,
        serde_json::json!({"type": "object", "required": ["a", "b"]}),
    )
    .unwrap();

    let whole_out = m.new_cell(root, "whole_out", CellKind::Json).unwrap();
    m.connect_outchannel_to_cell(sc, Vec::new(), whole_out).unwrap();

    // Only "a" present: schema not yet satisfied, outchannel stays UNDEFINED.
    m.write_inchannel(sc, vec!["a".into()], serde_json::json!(1)).unwrap();
    assert_eq!(m.cell(whole_out).unwrap().value, None);
    assert_eq!(m.read_outchannel(sc, &[]).unwrap(), None);

    // "b" arrives too: the composite now satisfies the schema and the
    // outchannel fires with the full value.
    m.write_inchannel(sc, vec!["b".into()], serde_json::json!(2)).unwrap();
    assert_eq!(
        m.cell(whole_out).unwrap().value,
        Some(CellValue::Json(serde_json::json!({"a": 1, "b": 2})))
    );
    assert_eq!(m.read_outchannel(sc, &[]).unwrap(), Some(serde_json::json!({"a": 1, "b": 2})));
}

#[test]
fn scenario_structured_cell_schema_hard_failure_rolls_back() {
    let mut m = Manager::new();
    let root = m.root();

    let sc = m
        .new_structured_cell(root, "record", CellKind::Json, serde_json::json!({"count": 1}))
        .unwrap();
    m.set_structured_cell_schema(sc, serde_json::json!({"properties": {"count": {"type": "number"}}}))
        .unwrap();

    let err = m.write_inchannel(sc, vec!["count".into()], serde_json::json!("oops")).unwrap_err();
    assert!(matches!(err, seamless_core::Error::Validation { .. }));
    // The bad write never lands; the structured cell keeps its prior value.
    assert_eq!(
        m.read_outchannel(sc, &["count".to_string()]).unwrap(),
        Some(serde_json::json!(1))
    );
}
