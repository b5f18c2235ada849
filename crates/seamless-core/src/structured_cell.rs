//! Structured cells: a composite JSON-like value exposed through a set of
//! path-addressed in/out channels, backed by a data cell (and, for the
//! `mixed` dtype, a companion buffer cell).
//!
//! A structured cell is not itself a [`crate::cell::CellState`]; it owns
//! one (or two) underlying cells and layers path-indexed monitoring on top,
//! mirroring the Python original's `Monitor`/`inchannels`/`outchannels`
//! split rather than collapsing everything into a single cell type.

use serde_json::Value;

use crate::error::{Error, Result};
use crate::id::{CellId, ConnectionId, StructuredCellId};

/// A path into a structured value: a sequence of object keys / array
/// indices, e.g. `["points", 0, "x"]`. Stored as strings; array indices are
/// decimal strings, matching the wire-visible form used by inchannels.
pub type Path = Vec<String>;

/// A registered inchannel: external writes addressed at `path` are merged
/// into the structured value at that location.
#[derive(Debug, Clone)]
pub struct InChannel {
    pub path: Path,
}

/// A registered outchannel: whenever the value at `path` changes, its
/// current value is pushed out (typically to a feed connection).
#[derive(Debug, Clone)]
pub struct OutChannel {
    pub path: Path,
}

/// Tracks which paths have live in/out channels registered, so the monitor
/// only recomputes and emits for subtrees anyone is actually watching.
#[derive(Debug, Default, Clone)]
pub struct Monitor {
    inchannels: Vec<InChannel>,
    outchannels: Vec<OutChannel>,
}

impl Monitor {
    pub fn register_in(&mut self, path: Path) {
        self.inchannels.push(InChannel { path });
    }

    pub fn register_out(&mut self, path: Path) {
        self.outchannels.push(OutChannel { path });
    }

    /// Outchannels whose path is a prefix of (or equal to) `changed_path`,
    /// i.e. every outchannel watching something inside the edited subtree.
    pub fn affected_outchannels(&self, changed_path: &[String]) -> Vec<&OutChannel> {
        self.outchannels
            .iter()
            .filter(|oc| is_prefix(&oc.path, changed_path) || is_prefix(changed_path, &oc.path))
            .collect()
    }
}

fn is_prefix(prefix: &[String], path: &[String]) -> bool {
    prefix.len() <= path.len() && prefix.iter().zip(path.iter()).all(|(a, b)| a == b)
}

/// True when `a` is a prefix of `b` or vice versa — the "affected" relation
/// the Manager uses to decide which outchannel connections re-fire after a
/// write to a given path: every outchannel whose registered path is a
/// prefix of the written path, or vice versa.
pub fn paths_overlap(a: &[String], b: &[String]) -> bool {
    is_prefix(a, b) || is_prefix(b, a)
}

/// Lookup `path` inside a JSON value, returning `None` if any segment is
/// missing or type-mismatched (object key vs. array index).
pub fn get_path<'a>(value: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut current = value;
    for segment in path {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(arr) => {
                let idx: usize = segment.parse().ok()?;
                arr.get(idx)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Write `new_value` at `path` inside `root`, creating intermediate objects
/// as needed. Array index segments require the array to already have that
/// slot (structured cells do not auto-grow arrays, matching invariant
/// S-PATH: a path write past the end of an array is a structural error).
pub fn set_path(root: &mut Value, path: &[String], new_value: Value) -> Result<()> {
    if path.is_empty() {
        *root = new_value;
        return Ok(());
    }
    let mut current = root;
    for segment in &path[..path.len() - 1] {
        current = step_into(current, segment)?;
    }
    let last = &path[path.len() - 1];
    match current {
        Value::Object(map) => {
            map.insert(last.clone(), new_value);
            Ok(())
        }
        Value::Array(arr) => {
            let idx: usize = last
                .parse()
                .map_err(|_| Error::structure(format!("invalid array index segment: {last}")))?;
            if idx >= arr.len() {
                return Err(Error::structure(format!(
                    "structured cell path write past end of array (index {idx}, len {})",
                    arr.len()
                )));
            }
            arr[idx] = new_value;
            Ok(())
        }
        _ => Err(Error::structure("path write through a scalar value")),
    }
}

fn step_into<'a>(current: &'a mut Value, segment: &str) -> Result<&'a mut Value> {
    match current {
        Value::Object(map) => Ok(map
            .entry(segment.to_string())
            .or_insert(Value::Object(serde_json::Map::new()))),
        Value::Array(arr) => {
            let idx: usize = segment
                .parse()
                .map_err(|_| Error::structure(format!("invalid array index segment: {segment}")))?;
            arr.get_mut(idx)
                .ok_or_else(|| Error::structure(format!("structured cell path write past end of array (index {idx})")))
        }
        _ => Err(Error::structure("path write through a scalar value")),
    }
}

/// A structured cell: the committed value plus an in-progress buffered
/// value used during a fork/commit editing cycle (invariant S-FORK: readers
/// never see a partially-applied multi-path edit).
#[derive(Debug, Clone)]
pub struct StructuredCellState {
    pub id: StructuredCellId,
    pub data_cell: CellId,
    /// Present only when this structured cell's data dtype is `mixed`.
    pub buffer_cell: Option<CellId>,
    pub value: Value,
    pub monitor: Monitor,
    fork: Option<Value>,
    /// Optional JSON-Schema-shaped validator (`type`/`required`/`properties`).
    /// A value that fails a declared `type` is a hard failure (the write
    /// rolls back); missing `required` keys are a soft incompleteness that
    /// still applies the write but gates [`StructuredCellState::read_path`]
    /// to `None` until satisfied (spec §4.3, scenario 6).
    schema: Option<Value>,
    /// `ChannelOut*` connection ids registered against this structured
    /// cell, so the Manager only has to scan the handful of connections
    /// that could possibly be affected by a given path write rather than
    /// every connection in the graph.
    pub out_connections: Vec<ConnectionId>,
    pub in_connections: Vec<ConnectionId>,
}

impl StructuredCellState {
    pub fn new(id: StructuredCellId, data_cell: CellId, buffer_cell: Option<CellId>, initial: Value) -> Self {
        Self {
            id,
            data_cell,
            buffer_cell,
            value: initial,
            monitor: Monitor::default(),
            fork: None,
            schema: None,
            out_connections: Vec::new(),
            in_connections: Vec::new(),
        }
    }

    /// Attach (or replace) the schema gating outchannel reads.
    pub fn set_schema(&mut self, schema: Value) {
        self.schema = Some(schema);
    }

    /// Start a buffered edit: clones the committed value into a scratch
    /// copy that path writes apply to instead of the live value.
    pub fn fork(&mut self) {
        if self.fork.is_none() {
            self.fork = Some(self.value.clone());
        }
    }

    pub fn is_forked(&self) -> bool {
        self.fork.is_some()
    }

    /// `Ok(true)` if no schema is attached or the active value (fork, if
    /// open, else the live value) fully satisfies it; `Ok(false)` if it is
    /// structurally fine but missing a `required` key; `Err` if a present
    /// value doesn't match its schema's declared `type`.
    fn validate_against_schema(&self) -> std::result::Result<bool, String> {
        match &self.schema {
            Some(schema) => validate_schema(self.fork.as_ref().unwrap_or(&self.value), schema),
            None => Ok(true),
        }
    }

    /// Write `new_value` at `path`, to the fork if one is open, else
    /// directly to the live value. If a schema is attached and the result
    /// hard-fails it (a present value's type mismatches), the write is
    /// rolled back and `Error::Validation` is returned; a soft
    /// incompleteness (missing `required` key) is still applied.
    pub fn write_path(&mut self, path: &[String], new_value: Value) -> Result<()> {
        let before = self.fork.as_ref().unwrap_or(&self.value).clone();
        {
            let target = self.fork.as_mut().unwrap_or(&mut self.value);
            set_path(target, path, new_value)?;
        }
        if let Err(message) = self.validate_against_schema() {
            let target = self.fork.as_mut().unwrap_or(&mut self.value);
            *target = before;
            return Err(Error::validation(self.data_cell, message));
        }
        Ok(())
    }

    /// Read the value at `path`, or `None` if a schema is attached and not
    /// yet satisfied (the outchannel-facing UNDEFINED state) or the path
    /// itself doesn't resolve.
    pub fn read_path(&self, path: &[String]) -> Option<&Value> {
        if !matches!(self.validate_against_schema(), Ok(true)) {
            return None;
        }
        let source = self.fork.as_ref().unwrap_or(&self.value);
        get_path(source, path)
    }

    /// Atomically replace the live value with the fork's contents and
    /// return the list of outchannel paths that should now emit, computed
    /// by diffing fork against the previous committed value. Rolls back
    /// (restoring the pre-commit value) and returns `Error::Validation` if
    /// the committed result hard-fails the attached schema.
    pub fn commit_fork(&mut self) -> Result<Vec<Path>> {
        let Some(forked) = self.fork.take() else {
            return Ok(Vec::new());
        };
        let old = std::mem::replace(&mut self.value, forked);
        match self.validate_against_schema() {
            Ok(_) => Ok(diff_paths(&old, &self.value, &mut Vec::new())),
            Err(message) => {
                self.value = old;
                Err(Error::validation(self.data_cell, message))
            }
        }
    }

    /// Discard the in-progress fork without touching the committed value
    /// (structural rollback of a structured-cell edit).
    pub fn rollback_fork(&mut self) {
        self.fork = None;
    }
}

/// Validate `value` against a JSON-Schema-shaped `schema` object
/// (`type`/`required`/`properties` keywords only — the subset this runtime
/// needs, not a general-purpose validator). `Ok(true)` means fully valid and
/// complete; `Ok(false)` means structurally valid but missing a `required`
/// key somewhere; `Err` means a present value's type doesn't match its
/// schema's declared `type`, a hard failure.
pub fn validate_schema(value: &Value, schema: &Value) -> std::result::Result<bool, String> {
    let Value::Object(schema_obj) = schema else {
        return Ok(true);
    };

    if let Some(expected) = schema_obj.get("type").and_then(Value::as_str) {
        if !json_type_matches(value, expected) {
            return Err(format!("expected type \"{expected}\", found \"{}\"", json_type_name(value)));
        }
    }

    let mut complete = true;

    if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
        let Value::Object(map) = value else {
            return Err("schema requires properties but value is not an object".to_string());
        };
        for key in required {
            if let Some(key) = key.as_str() {
                if !map.contains_key(key) {
                    complete = false;
                }
            }
        }
    }

    if let Some(properties) = schema_obj.get("properties").and_then(Value::as_object) {
        if let Value::Object(map) = value {
            for (key, sub_schema) in properties {
                if let Some(sub_value) = map.get(key) {
                    if !validate_schema(sub_value, sub_schema)? {
                        complete = false;
                    }
                }
            }
        }
    }

    Ok(complete)
}

fn json_type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Object(_) => "object",
        Value::Array(_) => "array",
        Value::String(_) => "string",
        Value::Number(_) => "number",
        Value::Bool(_) => "boolean",
        Value::Null => "null",
    }
}

/// Collect every leaf path whose value differs between `old` and `new`,
/// used to decide which outchannels must re-emit after a fork commit.
fn diff_paths(old: &Value, new: &Value, prefix: &mut Vec<String>) -> Vec<Path> {
    match (old, new) {
        (Value::Object(o), Value::Object(n)) => {
            let mut out = Vec::new();
            let mut keys: Vec<&String> = o.keys().chain(n.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                prefix.push(key.clone());
                match (o.get(key), n.get(key)) {
                    (Some(a), Some(b)) if a == b => {}
                    (Some(a), Some(b)) => out.extend(diff_paths(a, b, prefix)),
                    _ => out.push(prefix.clone()),
                }
                prefix.pop();
            }
            out
        }
        (Value::Array(o), Value::Array(n)) => {
            let mut out = Vec::new();
            for idx in 0..o.len().max(n.len()) {
                prefix.push(idx.to_string());
                match (o.get(idx), n.get(idx)) {
                    (Some(a), Some(b)) if a == b => {}
                    (Some(a), Some(b)) => out.extend(diff_paths(a, b, prefix)),
                    _ => out.push(prefix.clone()),
                }
                prefix.pop();
            }
            out
        }
        _ if old == new => Vec::new(),
        _ => vec![prefix.clone()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use slotmap::SlotMap;

    fn dummy_cell_id() -> CellId {
        let mut sm: SlotMap<CellId, ()> = SlotMap::with_key();
        sm.insert(())
    }

    fn dummy_sc_id() -> StructuredCellId {
        let mut sm: SlotMap<StructuredCellId, ()> = SlotMap::with_key();
        sm.insert(())
    }

    #[test]
    fn path_get_and_set() {
        let mut v = json!({"a": {"b": [1, 2, 3]}});
        assert_eq!(get_path(&v, &["a".into(), "b".into(), "1".into()]), Some(&json!(2)));
        set_path(&mut v, &["a".into(), "b".into(), "1".into()], json!(99)).unwrap();
        assert_eq!(get_path(&v, &["a".into(), "b".into(), "1".into()]), Some(&json!(99)));
    }

    #[test]
    fn set_path_past_array_end_is_structural_error() {
        let mut v = json!({"a": [1, 2]});
        let err = set_path(&mut v, &["a".into(), "5".into()], json!(1)).unwrap_err();
        assert!(matches!(err, Error::Structure(_)));
    }

    #[test]
    fn fork_commit_computes_changed_paths() {
        let mut sc = StructuredCellState::new(dummy_sc_id(), dummy_cell_id(), None, json!({"a": 1, "b": 2}));
        sc.fork();
        sc.write_path(&["a".to_string()], json!(42)).unwrap();
        assert_eq!(sc.read_path(&["a".to_string()]), Some(&json!(42)));
        // Committed value is untouched until commit_fork.
        assert_eq!(sc.value, json!({"a": 1, "b": 2}));
        let changed = sc.commit_fork().unwrap();
        assert_eq!(changed, vec![vec!["a".to_string()]]);
        assert_eq!(sc.value, json!({"a": 42, "b": 2}));
    }

    #[test]
    fn rollback_fork_discards_edits() {
        let mut sc = StructuredCellState::new(dummy_sc_id(), dummy_cell_id(), None, json!({"a": 1}));
        sc.fork();
        sc.write_path(&["a".to_string()], json!(999)).unwrap();
        sc.rollback_fork();
        assert_eq!(sc.value, json!({"a": 1}));
        assert!(!sc.is_forked());
    }

    #[test]
    fn monitor_finds_affected_outchannels() {
        let mut monitor = Monitor::default();
        monitor.register_out(vec!["a".to_string()]);
        monitor.register_out(vec!["c".to_string()]);
        let affected = monitor.affected_outchannels(&["a".to_string(), "b".to_string()]);
        assert_eq!(affected.len(), 1);
    }
}
