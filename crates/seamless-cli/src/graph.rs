//! JSON graph description consumed by the `run`/`validate` subcommands: a
//! serializable shape for exactly the structural operations
//! [`seamless::Context`] exposes, so a graph can be driven headlessly
//! without writing any Rust.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context as _};
use serde::Deserialize;

use seamless::prelude::*;
use seamless_core::{MountAuthority, MountDescriptor, MountMode};

#[derive(Debug, Deserialize)]
pub struct GraphSpec {
    #[serde(default)]
    pub cells: Vec<CellSpec>,
    #[serde(default)]
    pub workers: Vec<WorkerSpec>,
    #[serde(default)]
    pub aliases: Vec<AliasSpec>,
    #[serde(default)]
    pub pin_connections: Vec<PinConnectionSpec>,
    #[serde(default)]
    pub mounts: Vec<MountSpec>,
}

#[derive(Debug, Deserialize)]
pub struct CellSpec {
    pub name: String,
    pub kind: CellKindSpec,
    /// Initial value, in the dtype's text form. Absent means the cell
    /// starts VOID.
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CellKindSpec {
    Text,
    PythonSource,
    PythonTransformerSource,
    Json,
    Cson,
    Array,
    Mixed,
    Signal,
}

impl From<CellKindSpec> for CellKind {
    fn from(spec: CellKindSpec) -> Self {
        match spec {
            CellKindSpec::Text => CellKind::PlainText,
            CellKindSpec::PythonSource => CellKind::PythonSource,
            CellKindSpec::PythonTransformerSource => CellKind::PythonTransformerSource,
            CellKindSpec::Json => CellKind::Json,
            CellKindSpec::Cson => CellKind::Cson,
            CellKindSpec::Array => CellKind::Array,
            CellKindSpec::Mixed => CellKind::Mixed,
            CellKindSpec::Signal => CellKind::Signal,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WorkerSpec {
    pub name: String,
    /// Spawn this subprocess as the worker's runtime, speaking the
    /// `seamless-worker` wire protocol over stdio. A worker with no command
    /// gets the in-process `EchoRuntime` (see [`seamless_core::EchoRuntime::mirrored`]:
    /// each input pin mirrors onto its identically-named output pin, or, for
    /// a lone differently-named pass-through pair, onto the sole remaining
    /// output pin) — useful for smoke-testing a graph's wiring without a
    /// real transformer.
    #[serde(default)]
    pub command: Option<Vec<String>>,
    pub pins: Vec<PinSpec>,
}

#[derive(Debug, Deserialize)]
pub struct PinSpec {
    pub name: String,
    pub kind: PinKindSpec,
    pub dtype: CellKindSpec,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PinKindSpec {
    Input,
    Output,
    Edit,
}

impl From<PinKindSpec> for PinKind {
    fn from(spec: PinKindSpec) -> Self {
        match spec {
            PinKindSpec::Input => PinKind::Input,
            PinKindSpec::Output => PinKind::Output,
            PinKindSpec::Edit => PinKind::Edit,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AliasSpec {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub direction: AliasDirectionSpec,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AliasDirectionSpec {
    #[default]
    Bidirectional,
    OneWay,
}

impl From<AliasDirectionSpec> for AliasDirection {
    fn from(spec: AliasDirectionSpec) -> Self {
        match spec {
            AliasDirectionSpec::Bidirectional => AliasDirection::Bidirectional,
            AliasDirectionSpec::OneWay => AliasDirection::OneWay,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PinConnectionSpec {
    pub cell: String,
    pub worker: String,
    pub pin: String,
}

#[derive(Debug, Deserialize)]
pub struct MountSpec {
    pub cell: String,
    pub path: String,
    #[serde(default)]
    pub mode: MountModeSpec,
    #[serde(default)]
    pub authority: MountAuthoritySpec,
    #[serde(default)]
    pub persistent: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MountModeSpec {
    Write,
    #[default]
    ReadWrite,
    Read,
}

impl From<MountModeSpec> for MountMode {
    fn from(spec: MountModeSpec) -> Self {
        match spec {
            MountModeSpec::Write => MountMode::Write,
            MountModeSpec::Read => MountMode::Read,
            MountModeSpec::ReadWrite => MountMode::ReadWrite,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MountAuthoritySpec {
    #[default]
    Cell,
    File,
    FileStrict,
}

impl From<MountAuthoritySpec> for MountAuthority {
    fn from(spec: MountAuthoritySpec) -> Self {
        match spec {
            MountAuthoritySpec::Cell => MountAuthority::Cell,
            MountAuthoritySpec::File => MountAuthority::File,
            MountAuthoritySpec::FileStrict => MountAuthority::FileStrict,
        }
    }
}

/// A graph built from a [`GraphSpec`], with its named cells kept around so
/// callers can report on them after equilibration.
pub struct BuiltGraph {
    pub context: Context,
    pub cells: HashMap<String, Cell>,
}

/// Build every structural element a [`GraphSpec`] describes against a fresh
/// [`Context`], applying initial cell values last so every connection is
/// already wired before the first propagation.
pub fn build(spec: &GraphSpec, context: Context) -> anyhow::Result<BuiltGraph> {
    let mut cells = HashMap::new();
    for cell_spec in &spec.cells {
        let cell = context
            .cell(&cell_spec.name, cell_spec.kind.into())
            .with_context(|| format!("creating cell {:?}", cell_spec.name))?;
        cells.insert(cell_spec.name.clone(), cell);
    }

    let dtypes: Arc<dyn seamless_core::DtypeRegistry> = Arc::new(seamless_core::BuiltinRegistry::default());
    let mut worker_pins: HashMap<(String, String), seamless_core::PinId> = HashMap::new();
    for worker_spec in &spec.workers {
        let worker = context
            .worker(&worker_spec.name)
            .with_context(|| format!("creating worker {:?}", worker_spec.name))?;

        let mut declared_pins = Vec::new();
        for pin_spec in &worker_spec.pins {
            let pin = worker
                .pin(&pin_spec.name, pin_spec.kind.into(), pin_spec.dtype.into())
                .with_context(|| format!("creating pin {:?} on worker {:?}", pin_spec.name, worker_spec.name))?;
            worker_pins.insert((worker_spec.name.clone(), pin_spec.name.clone()), pin);
            declared_pins.push((pin, pin_spec.dtype));
        }

        match &worker_spec.command {
            Some(argv) => {
                let [program, args @ ..] = argv.as_slice() else {
                    bail!("worker {:?}: `command` must name a program", worker_spec.name);
                };
                let mut runtime = seamless_worker::IpcWorkerRuntime::spawn(program, dtypes.clone())
                    .with_context(|| format!("spawning worker {:?}", worker_spec.name))?;
                if !args.is_empty() {
                    tracing::debug!(worker = %worker_spec.name, ?args, "worker command arguments are not forwarded by the stdio protocol spawn");
                }
                for (pin, dtype) in &declared_pins {
                    runtime.register_pin(*pin, (*dtype).into());
                }
                worker
                    .attach_runtime(Box::new(runtime))
                    .with_context(|| format!("attaching runtime for worker {:?}", worker_spec.name))?;
            }
            None => {
                let pins = worker
                    .pin_descriptors()
                    .with_context(|| format!("listing pins for worker {:?}", worker_spec.name))?;
                worker
                    .attach_runtime(Box::new(seamless_core::EchoRuntime::mirrored(&pins)))
                    .with_context(|| format!("attaching runtime for worker {:?}", worker_spec.name))?;
            }
        }
    }

    for alias in &spec.aliases {
        let source = cells
            .get(&alias.source)
            .with_context(|| format!("alias source cell {:?} not declared", alias.source))?;
        let target = cells
            .get(&alias.target)
            .with_context(|| format!("alias target cell {:?} not declared", alias.target))?;
        context
            .alias(source, target, alias.direction.into())
            .with_context(|| format!("aliasing {:?} -> {:?}", alias.source, alias.target))?;
    }

    for conn in &spec.pin_connections {
        let cell = cells
            .get(&conn.cell)
            .with_context(|| format!("pin connection references undeclared cell {:?}", conn.cell))?;
        let pin = *worker_pins
            .get(&(conn.worker.clone(), conn.pin.clone()))
            .with_context(|| format!("pin connection references undeclared pin {:?}.{:?}", conn.worker, conn.pin))?;
        let worker = context
            .worker(&conn.worker)
            .with_context(|| format!("re-resolving worker {:?} for pin connection", conn.worker))?;
        worker
            .connect(cell, pin)
            .with_context(|| format!("connecting cell {:?} to pin {:?}.{:?}", conn.cell, conn.worker, conn.pin))?;
    }

    for mount in &spec.mounts {
        let cell = cells
            .get(&mount.cell)
            .with_context(|| format!("mount references undeclared cell {:?}", mount.cell))?;
        let kind = spec
            .cells
            .iter()
            .find(|c| c.name == mount.cell)
            .map(|c| CellKind::from(c.kind))
            .unwrap_or(CellKind::PlainText);
        let mut descriptor = MountDescriptor::new(cell.id(), &mount.path, kind, mount.mode.into(), mount.authority.into());
        if let Some(persistent) = mount.persistent {
            descriptor = descriptor.persistent(persistent);
        }
        context
            .mount(descriptor)
            .with_context(|| format!("mounting cell {:?} at {:?}", mount.cell, mount.path))?;
    }

    // Initial values are set last, once every alias/feed/emit/mount
    // connection is in place, so the first propagation sees the fully
    // wired graph rather than a partially-connected one.
    for cell_spec in &spec.cells {
        if let Some(value) = &cell_spec.value {
            let cell = &cells[&cell_spec.name];
            cell.set(value, false)
                .with_context(|| format!("setting initial value for cell {:?}", cell_spec.name))?;
        }
    }

    Ok(BuiltGraph { context, cells })
}
