//! Reference `seamless-worker` subprocess: the executable
//! [`seamless_worker::IpcWorkerRuntime`] spawns and speaks its wire protocol
//! to over stdio.
//!
//! This binary has no interpreter or transformer-execution glue of its own;
//! it mirrors every input it receives straight back out as an output on the
//! same pin, identically to [`seamless_core::EchoRuntime`] but running as a
//! real child process rather than in-process. It exists so the IPC
//! transport in `protocol.rs` is exercisable end-to-end, and as the
//! skeleton a real execution backend (subprocess interpreter, sandboxed
//! runtime, ...) replaces its `handle_command` body with.

use std::io::{self, BufReader, BufWriter, Write};

use anyhow::Result;
use tracing::{debug, info};

use seamless_worker::protocol::{read_message, write_message, WorkerCommand, WorkerResponse};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    // SAFETY: getpid takes no arguments and never fails; used purely for a
    // diagnostic log line identifying which process a stderr line came from
    // when several workers are running concurrently.
    let pid = unsafe { libc::getpid() };
    info!(pid, "seamless-worker subprocess starting");

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut reader = BufReader::new(stdin.lock());
    let mut writer = BufWriter::new(stdout.lock());

    loop {
        let command: WorkerCommand = match read_message(&mut reader) {
            Ok(c) => c,
            Err(_) => {
                // Stdin closed: the parent process exited or dropped its
                // handle to us. Nothing more to do.
                break;
            }
        };

        match command {
            WorkerCommand::ReceiveInput { pin, text } => {
                debug!(pin, %text, "echoing input straight back out");
                let response = WorkerResponse::Output {
                    pin,
                    text,
                    echo: false,
                };
                write_message(&mut writer, &response)?;
            }
            WorkerCommand::Ping => {
                write_message(&mut writer, &WorkerResponse::Pong)?;
            }
            WorkerCommand::Shutdown => {
                write_message(&mut writer, &WorkerResponse::ShuttingDown)?;
                break;
            }
        }
    }

    info!(pid, "seamless-worker subprocess exiting");
    Ok(())
}
