//! The datatype registry: an external collaborator the core only consumes
//! through a trait. Cells call `validate`/`parse`/`serialize`/`checksum`;
//! failures propagate as `ERROR` status (see [`crate::cell`]).
//!
//! [`BuiltinRegistry`] ships a reference implementation for every closed-set
//! dtype tag so the engine is exercisable without a real codec plugin. Full
//! Numpy array semantics and a real CSON grammar are format-specific codecs
//! and stay out of scope; `Array` here is an opaque byte blob and `Cson` is
//! relaxed-JSON.

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::id::CellId;

/// Closed set of dtype tags a cell may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellKind {
    PlainText,
    PythonSource,
    PythonTransformerSource,
    Json,
    Cson,
    Array,
    Mixed,
    Signal,
}

impl fmt::Display for CellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CellKind::PlainText => "text",
            CellKind::PythonSource => "text/code/python",
            CellKind::PythonTransformerSource => "text/code/python/transformer",
            CellKind::Json => "json",
            CellKind::Cson => "cson",
            CellKind::Array => "array",
            CellKind::Mixed => "mixed",
            CellKind::Signal => "signal",
        };
        f.write_str(s)
    }
}

/// The in-memory representation of a cell's value.
///
/// A closed set mirroring [`CellKind`]: `Signal` carries no payload (its
/// only observable is a transition, invariant C5), everything else carries
/// exactly the shape its dtype implies.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
    Signal,
}

impl CellValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            CellValue::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            CellValue::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// A 128-bit content digest, hex-encoded on display.
///
/// BLAKE3 truncated to 128 bits: a stable, not necessarily cryptographic,
/// identity for a cell's serialized value, meaningfully faster to compute
/// on every cell write than an MD5 digest would be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum([u8; 16]);

impl Checksum {
    pub fn of(bytes: &[u8]) -> Self {
        let hash = blake3::hash(bytes);
        let mut out = [0u8; 16];
        out.copy_from_slice(&hash.as_bytes()[..16]);
        Checksum(out)
    }

    pub fn to_hex(self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// The capability table a registered dtype must provide.
///
/// `cell` is passed to `validate`/`parse` purely so implementations can
/// produce a [`Error::Validation`] tagged with the right cell id; the
/// registry itself never inspects cell state.
pub trait DtypeHandler: Send + Sync {
    fn kind(&self) -> CellKind;

    /// Parse external text (e.g. from a mount file or a pin feed) into a
    /// value of this dtype.
    fn parse(&self, cell: CellId, text: &str) -> Result<CellValue>;

    /// Validate a value already held in memory (e.g. deposited by a worker
    /// output pin) conforms to this dtype.
    fn validate(&self, cell: CellId, value: &CellValue) -> Result<()>;

    /// Render a value back to its canonical textual form.
    fn serialize(&self, cell: CellId, value: &CellValue) -> Result<String>;

    /// Content digest of the canonical value.
    fn checksum(&self, value: &CellValue) -> Checksum {
        Checksum::of(self.canonical_bytes(value).as_slice())
    }

    fn canonical_bytes(&self, value: &CellValue) -> Vec<u8>;

    /// True when the text form is distinct from the canonical form (CSON,
    /// Python source): such cells carry a second checksum for the raw text.
    fn has_text_checksum(&self) -> bool {
        false
    }

    /// The raw text form, when distinct from the canonical form. Only
    /// meaningful when [`DtypeHandler::has_text_checksum`] is true.
    fn text_form(&self, _value: &CellValue) -> Option<String> {
        None
    }
}

/// External collaborator: resolves a [`CellKind`] to its [`DtypeHandler`].
pub trait DtypeRegistry: Send + Sync {
    fn handler(&self, kind: CellKind) -> Option<Arc<dyn DtypeHandler>>;

    fn require(&self, kind: CellKind) -> Arc<dyn DtypeHandler> {
        self.handler(kind)
            .unwrap_or_else(|| panic!("no dtype handler registered for {kind}"))
    }
}

struct PlainTextHandler;
impl DtypeHandler for PlainTextHandler {
    fn kind(&self) -> CellKind {
        CellKind::PlainText
    }
    fn parse(&self, _cell: CellId, text: &str) -> Result<CellValue> {
        Ok(CellValue::Text(text.to_string()))
    }
    fn validate(&self, cell: CellId, value: &CellValue) -> Result<()> {
        match value {
            CellValue::Text(_) => Ok(()),
            _ => Err(Error::validation(cell, "expected plain text")),
        }
    }
    fn serialize(&self, cell: CellId, value: &CellValue) -> Result<String> {
        value
            .as_text()
            .map(str::to_string)
            .ok_or_else(|| Error::validation(cell, "expected plain text"))
    }
    fn canonical_bytes(&self, value: &CellValue) -> Vec<u8> {
        value.as_text().unwrap_or_default().as_bytes().to_vec()
    }
}

/// Shared by `PythonSource` and `PythonTransformerSource`: both are source
/// text destined for an interpreter that is out of scope for this core, so
/// they validate like plain text but are kept as distinct [`CellKind`]
/// variants a worker runtime can dispatch on.
struct PythonHandler(CellKind);
impl DtypeHandler for PythonHandler {
    fn kind(&self) -> CellKind {
        self.0
    }
    fn parse(&self, _cell: CellId, text: &str) -> Result<CellValue> {
        Ok(CellValue::Text(text.to_string()))
    }
    fn validate(&self, cell: CellId, value: &CellValue) -> Result<()> {
        match value {
            CellValue::Text(_) => Ok(()),
            _ => Err(Error::validation(cell, "expected python source text")),
        }
    }
    fn serialize(&self, cell: CellId, value: &CellValue) -> Result<String> {
        value
            .as_text()
            .map(str::to_string)
            .ok_or_else(|| Error::validation(cell, "expected python source text"))
    }
    fn canonical_bytes(&self, value: &CellValue) -> Vec<u8> {
        value.as_text().unwrap_or_default().as_bytes().to_vec()
    }
    fn has_text_checksum(&self) -> bool {
        true
    }
    fn text_form(&self, value: &CellValue) -> Option<String> {
        value.as_text().map(str::to_string)
    }
}

struct JsonHandler;
impl DtypeHandler for JsonHandler {
    fn kind(&self) -> CellKind {
        CellKind::Json
    }
    fn parse(&self, cell: CellId, text: &str) -> Result<CellValue> {
        serde_json::from_str(text)
            .map(CellValue::Json)
            .map_err(|e| Error::validation(cell, format!("invalid JSON: {e}")))
    }
    fn validate(&self, cell: CellId, value: &CellValue) -> Result<()> {
        match value {
            CellValue::Json(_) => Ok(()),
            _ => Err(Error::validation(cell, "expected JSON value")),
        }
    }
    fn serialize(&self, cell: CellId, value: &CellValue) -> Result<String> {
        value
            .as_json()
            .ok_or_else(|| Error::validation(cell, "expected JSON value"))
            .and_then(|v| serde_json::to_string(v).map_err(Error::from))
    }
    fn canonical_bytes(&self, value: &CellValue) -> Vec<u8> {
        value
            .as_json()
            .and_then(|v| serde_json::to_vec(v).ok())
            .unwrap_or_default()
    }
}

/// CSON's only externally observable difference from JSON: the text form
/// (the original, possibly comment-bearing source) is checksummed
/// separately from the canonical parsed value. Real CSON relaxed-grammar
/// parsing (comments, unquoted keys, trailing commas) is a format-specific
/// codec concern out of scope for this core; this handler treats CSON text
/// as JSON text and keeps the distinct-checksum contract so structured
/// cells and mount mirroring behave correctly against a real codec plugin.
struct CsonHandler;
impl DtypeHandler for CsonHandler {
    fn kind(&self) -> CellKind {
        CellKind::Cson
    }
    fn parse(&self, cell: CellId, text: &str) -> Result<CellValue> {
        serde_json::from_str(text)
            .map(CellValue::Json)
            .map_err(|e| Error::validation(cell, format!("invalid CSON: {e}")))
    }
    fn validate(&self, cell: CellId, value: &CellValue) -> Result<()> {
        match value {
            CellValue::Json(_) => Ok(()),
            _ => Err(Error::validation(cell, "expected CSON (JSON-shaped) value")),
        }
    }
    fn serialize(&self, cell: CellId, value: &CellValue) -> Result<String> {
        value
            .as_json()
            .ok_or_else(|| Error::validation(cell, "expected CSON (JSON-shaped) value"))
            .and_then(|v| serde_json::to_string_pretty(v).map_err(Error::from))
    }
    fn canonical_bytes(&self, value: &CellValue) -> Vec<u8> {
        value
            .as_json()
            .and_then(|v| serde_json::to_vec(v).ok())
            .unwrap_or_default()
    }
    fn has_text_checksum(&self) -> bool {
        true
    }
    fn text_form(&self, value: &CellValue) -> Option<String> {
        value.as_json().and_then(|v| serde_json::to_string_pretty(v).ok())
    }
}

/// Opaque byte blob. Real Numpy/binary-array semantics are a format-specific
/// codec left to an external plugin; this handler only guarantees the
/// closed-tag-set contract (validate never rejects a byte vector).
struct ArrayHandler;
impl DtypeHandler for ArrayHandler {
    fn kind(&self) -> CellKind {
        CellKind::Array
    }
    fn parse(&self, _cell: CellId, text: &str) -> Result<CellValue> {
        Ok(CellValue::Bytes(text.as_bytes().to_vec()))
    }
    fn validate(&self, cell: CellId, value: &CellValue) -> Result<()> {
        match value {
            CellValue::Bytes(_) => Ok(()),
            _ => Err(Error::validation(cell, "expected a binary array")),
        }
    }
    fn serialize(&self, cell: CellId, value: &CellValue) -> Result<String> {
        use std::fmt::Write;
        let bytes = value
            .as_bytes()
            .ok_or_else(|| Error::validation(cell, "expected a binary array"))?;
        let mut out = String::with_capacity(bytes.len() * 2);
        for b in bytes {
            let _ = write!(out, "{:02x}", b);
        }
        Ok(out)
    }
    fn canonical_bytes(&self, value: &CellValue) -> Vec<u8> {
        value.as_bytes().unwrap_or_default().to_vec()
    }
}

/// The "mixed" dtype: a JSON skeleton plus a raw binary payload. Structured
/// cells with a `mixed` data cell use this encoding for their on-disk /
/// over-the-wire form; see [`crate::structured_cell`].
struct MixedHandler;

const MIXED_MAGIC: &[u8; 8] = b"SEAMLESS";

impl DtypeHandler for MixedHandler {
    fn kind(&self) -> CellKind {
        CellKind::Mixed
    }
    fn parse(&self, cell: CellId, text: &str) -> Result<CellValue> {
        // Textual form is the JSON skeleton alone (no buffer); used for
        // pins/feeds that only ever see the inline-JSON projection.
        serde_json::from_str(text)
            .map(CellValue::Json)
            .map_err(|e| Error::validation(cell, format!("invalid mixed JSON skeleton: {e}")))
    }
    fn validate(&self, cell: CellId, value: &CellValue) -> Result<()> {
        match value {
            CellValue::Json(_) | CellValue::Bytes(_) => Ok(()),
            _ => Err(Error::validation(cell, "expected mixed (JSON or encoded bytes)")),
        }
    }
    fn serialize(&self, cell: CellId, value: &CellValue) -> Result<String> {
        match value {
            CellValue::Json(v) => serde_json::to_string(v).map_err(Error::from),
            _ => Err(Error::validation(cell, "expected mixed JSON skeleton")),
        }
    }
    fn canonical_bytes(&self, value: &CellValue) -> Vec<u8> {
        match value {
            CellValue::Json(v) => serde_json::to_vec(v).unwrap_or_default(),
            CellValue::Bytes(b) => b.clone(),
            _ => Vec::new(),
        }
    }
}

/// Encode a `mixed` value to its wire layout:
/// `"SEAMLESS"` magic, `len_jsons` (u64 LE), `len_buffer` (u64 LE), the JSON
/// bytes, then the raw buffer bytes.
pub fn encode_mixed(jsons: &[u8], buffer: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + 8 + 8 + jsons.len() + buffer.len());
    out.extend_from_slice(MIXED_MAGIC);
    out.extend_from_slice(&(jsons.len() as u64).to_le_bytes());
    out.extend_from_slice(&(buffer.len() as u64).to_le_bytes());
    out.extend_from_slice(jsons);
    out.extend_from_slice(buffer);
    out
}

/// Decode a `mixed` wire payload back into its JSON and buffer halves.
pub fn decode_mixed(bytes: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    if bytes.len() < 24 || &bytes[0..8] != MIXED_MAGIC {
        return Err(Error::structure("malformed mixed payload: bad magic"));
    }
    let len_jsons = u64::from_le_bytes(bytes[8..16].try_into().unwrap()) as usize;
    let len_buffer = u64::from_le_bytes(bytes[16..24].try_into().unwrap()) as usize;
    let jsons_start = 24;
    let jsons_end = jsons_start
        .checked_add(len_jsons)
        .ok_or_else(|| Error::structure("malformed mixed payload: length overflow"))?;
    let buffer_end = jsons_end
        .checked_add(len_buffer)
        .ok_or_else(|| Error::structure("malformed mixed payload: length overflow"))?;
    if bytes.len() < buffer_end {
        return Err(Error::structure("malformed mixed payload: truncated"));
    }
    Ok((
        bytes[jsons_start..jsons_end].to_vec(),
        bytes[jsons_end..buffer_end].to_vec(),
    ))
}

struct SignalHandler;
impl DtypeHandler for SignalHandler {
    fn kind(&self) -> CellKind {
        CellKind::Signal
    }
    fn parse(&self, _cell: CellId, _text: &str) -> Result<CellValue> {
        Ok(CellValue::Signal)
    }
    fn validate(&self, cell: CellId, value: &CellValue) -> Result<()> {
        match value {
            CellValue::Signal => Ok(()),
            _ => Err(Error::validation(cell, "a signal cell carries no value (C5)")),
        }
    }
    fn serialize(&self, _cell: CellId, _value: &CellValue) -> Result<String> {
        Ok(String::new())
    }
    fn canonical_bytes(&self, _value: &CellValue) -> Vec<u8> {
        Vec::new()
    }
}

/// Reference [`DtypeRegistry`] covering every closed-set dtype tag.
pub struct BuiltinRegistry {
    handlers: rustc_hash::FxHashMap<CellKind, Arc<dyn DtypeHandler>>,
}

impl Default for BuiltinRegistry {
    fn default() -> Self {
        let mut handlers: rustc_hash::FxHashMap<CellKind, Arc<dyn DtypeHandler>> =
            rustc_hash::FxHashMap::default();
        handlers.insert(CellKind::PlainText, Arc::new(PlainTextHandler));
        handlers.insert(
            CellKind::PythonSource,
            Arc::new(PythonHandler(CellKind::PythonSource)),
        );
        handlers.insert(
            CellKind::PythonTransformerSource,
            Arc::new(PythonHandler(CellKind::PythonTransformerSource)),
        );
        handlers.insert(CellKind::Json, Arc::new(JsonHandler));
        handlers.insert(CellKind::Cson, Arc::new(CsonHandler));
        handlers.insert(CellKind::Array, Arc::new(ArrayHandler));
        handlers.insert(CellKind::Mixed, Arc::new(MixedHandler));
        handlers.insert(CellKind::Signal, Arc::new(SignalHandler));
        Self { handlers }
    }
}

impl DtypeRegistry for BuiltinRegistry {
    fn handler(&self, kind: CellKind) -> Option<Arc<dyn DtypeHandler>> {
        self.handlers.get(&kind).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn dummy_cell() -> CellId {
        let mut sm: SlotMap<CellId, ()> = SlotMap::with_key();
        sm.insert(())
    }

    #[test]
    fn json_roundtrip() {
        let registry = BuiltinRegistry::default();
        let handler = registry.require(CellKind::Json);
        let cell = dummy_cell();
        let value = handler.parse(cell, r#"{"a":1}"#).unwrap();
        handler.validate(cell, &value).unwrap();
        let text = handler.serialize(cell, &value).unwrap();
        let value2 = handler.parse(cell, &text).unwrap();
        assert_eq!(handler.checksum(&value), handler.checksum(&value2));
    }

    #[test]
    fn json_rejects_garbage() {
        let registry = BuiltinRegistry::default();
        let handler = registry.require(CellKind::Json);
        let cell = dummy_cell();
        assert!(handler.parse(cell, "not json").is_err());
    }

    #[test]
    fn signal_has_no_value() {
        let registry = BuiltinRegistry::default();
        let handler = registry.require(CellKind::Signal);
        let cell = dummy_cell();
        assert!(handler.validate(cell, &CellValue::Signal).is_ok());
        assert!(handler.validate(cell, &CellValue::Text("x".into())).is_err());
    }

    #[test]
    fn cson_has_distinct_text_checksum() {
        let registry = BuiltinRegistry::default();
        let handler = registry.require(CellKind::Cson);
        assert!(handler.has_text_checksum());
        let value = CellValue::Json(serde_json::json!({"a": 1}));
        assert!(handler.text_form(&value).is_some());
    }

    #[test]
    fn mixed_wire_format_roundtrip() {
        let jsons = br#"[[0],"hello"]"#;
        let buffer = b"binarydata";
        let encoded = encode_mixed(jsons, buffer);
        assert_eq!(&encoded[0..8], MIXED_MAGIC);
        let (decoded_jsons, decoded_buffer) = decode_mixed(&encoded).unwrap();
        assert_eq!(decoded_jsons, jsons);
        assert_eq!(decoded_buffer, buffer);
    }

    #[test]
    fn mixed_wire_format_rejects_bad_magic() {
        let mut bad = encode_mixed(b"{}", b"x");
        bad[0] = b'X';
        assert!(decode_mixed(&bad).is_err());
    }

    #[test]
    fn checksum_stable_across_calls() {
        let a = Checksum::of(b"hello");
        let b = Checksum::of(b"hello");
        assert_eq!(a, b);
        assert_eq!(a.to_hex().len(), 32);
    }
}
