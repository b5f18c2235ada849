//! IPC protocol between the Manager-side [`crate::IpcWorkerRuntime`] and the
//! `seamless-worker` subprocess.
//!
//! Uses length-prefixed bincode messages over stdin/stdout.
//! Format: 4-byte length (u32 LE) + bincode-encoded message.
//!
//! Values themselves are carried as their dtype's serialized text form
//! rather than as raw [`seamless_core::CellValue`] bytes, so this protocol
//! never needs to know how to bincode-encode a `serde_json::Value`: the
//! subprocess parses/serializes through the same [`seamless_core::DtypeRegistry`]
//! the Manager uses.

use std::io::{Read, Write};

use bincode::{Decode, Encode};

use crate::error::{Result, WorkerError};

const MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;

/// Command sent from the Manager side to the worker process.
#[derive(Debug, Clone, Encode, Decode)]
pub enum WorkerCommand {
    /// A pin received a new value; `pin` is the pin's ffi-encoded id and
    /// `text` is the value in its dtype's canonical textual form.
    ReceiveInput { pin: u64, text: String },
    /// Gracefully shut down.
    Shutdown,
    /// Liveness check.
    Ping,
}

/// Response sent from the worker process back to the Manager side.
#[derive(Debug, Clone, Encode, Decode)]
pub enum WorkerResponse {
    /// An output pin produced a value.
    Output { pin: u64, text: String, echo: bool },
    /// The worker's computation raised (invariant E2: non-fatal).
    Error { message: String },
    /// Response to `Ping`.
    Pong,
    /// Acknowledgement of `Shutdown`.
    ShuttingDown,
}

/// Write a message using length-prefixed bincode encoding.
pub fn write_message<W: Write, T: Encode>(writer: &mut W, message: &T) -> Result<()> {
    let config = bincode::config::standard();
    let bytes = bincode::encode_to_vec(message, config).map_err(|e| WorkerError::Encode(e.to_string()))?;

    let len = bytes.len() as u32;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Read a message using length-prefixed bincode encoding.
pub fn read_message<R: Read, T: Decode<()>>(reader: &mut R) -> Result<T> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > MAX_MESSAGE_BYTES {
        return Err(WorkerError::MessageTooLarge(MAX_MESSAGE_BYTES));
    }

    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;

    let config = bincode::config::standard();
    let (message, _) = bincode::decode_from_slice(&bytes, config).map_err(|e| WorkerError::Decode(e.to_string()))?;
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn command_roundtrip() {
        let cmd = WorkerCommand::ReceiveInput {
            pin: 42,
            text: "7".to_string(),
        };
        let mut buf = Vec::new();
        write_message(&mut buf, &cmd).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: WorkerCommand = read_message(&mut cursor).unwrap();
        match decoded {
            WorkerCommand::ReceiveInput { pin, text } => {
                assert_eq!(pin, 42);
                assert_eq!(text, "7");
            }
            _ => panic!("wrong command variant"),
        }
    }

    #[test]
    fn response_roundtrip() {
        let resp = WorkerResponse::Output {
            pin: 7,
            text: "\"hi\"".to_string(),
            echo: false,
        };
        let mut buf = Vec::new();
        write_message(&mut buf, &resp).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: WorkerResponse = read_message(&mut cursor).unwrap();
        match decoded {
            WorkerResponse::Output { pin, text, echo } => {
                assert_eq!(pin, 7);
                assert_eq!(text, "\"hi\"");
                assert!(!echo);
            }
            _ => panic!("wrong response variant"),
        }
    }

    #[test]
    fn rejects_oversized_length_prefix() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(u32::MAX).to_le_bytes());
        let mut cursor = Cursor::new(buf);
        let err = read_message::<_, WorkerCommand>(&mut cursor).unwrap_err();
        assert!(matches!(err, WorkerError::MessageTooLarge(_)));
    }
}
