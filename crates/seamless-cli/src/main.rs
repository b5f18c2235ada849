//! `seamless` — headless driver for Seamless reactive dataflow graphs.
//!
//! Reads a graph description from JSON, wires up its cells/workers/
//! connections/mounts against a fresh [`seamless::Context`], drives it to
//! equilibrium, and reports the result. No macro, no Rust compilation step:
//! everything a graph needs is data.

mod graph;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};

use graph::GraphSpec;
use seamless::{CellValue, Context};

#[derive(Parser)]
#[command(name = "seamless")]
#[command(about = "Headless driver for Seamless reactive dataflow graphs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose (debug-level) logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a graph description and wire it up, without running it
    Validate {
        /// Path to the graph JSON file
        graph: PathBuf,
    },

    /// Build a graph, equilibrate it, and print the resulting cell values
    Run {
        /// Path to the graph JSON file
        graph: PathBuf,

        /// Stop and report unstable workers after this many seconds rather
        /// than equilibrating forever
        #[arg(long)]
        timeout: Option<f64>,

        /// Mirror mounted cells to the filesystem via the reference
        /// `seamless-mount` sink (mounts are otherwise ignored)
        #[arg(long)]
        mount: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    match cli.command {
        Commands::Validate { graph } => validate(&graph),
        Commands::Run { graph, timeout, mount } => run(&graph, timeout, mount),
    }
}

fn load_spec(path: &Path) -> Result<GraphSpec> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading graph file {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing graph file {}", path.display()))
}

fn validate(path: &Path) -> Result<()> {
    let spec = load_spec(path)?;
    let worker_count = spec.workers.len();
    let built = graph::build(&spec, Context::new())?;
    println!("graph OK: {} cell(s), {} worker(s)", built.cells.len(), worker_count);
    Ok(())
}

fn run(path: &Path, timeout: Option<f64>, mount: bool) -> Result<()> {
    let spec = load_spec(path)?;
    let ctx = if mount {
        Context::with_mount(Box::new(seamless_mount::FileMountSink::new()))
    } else {
        Context::new()
    };
    let built = graph::build(&spec, ctx)?;

    let report = match timeout {
        Some(secs) => built.context.equilibrate_within(Duration::from_secs_f64(secs))?,
        None => built.context.equilibrate()?,
    };

    if !report.unstable.is_empty() {
        tracing::warn!(count = report.unstable.len(), "timed out with workers still unstable");
    }

    let mut cells = serde_json::Map::new();
    for (name, cell) in &built.cells {
        let rendered = match cell.value()? {
            Some(CellValue::Json(v)) => v,
            Some(CellValue::Text(t)) => serde_json::Value::String(t),
            Some(CellValue::Bytes(b)) => serde_json::Value::String(format!("<{} bytes>", b.len())),
            Some(CellValue::Signal) => serde_json::Value::Bool(true),
            None => serde_json::Value::Null,
        };
        cells.insert(name.clone(), rendered);
    }

    let output = serde_json::json!({
        "rounds": report.rounds,
        "unstable_workers": report.unstable.len(),
        "cells": cells,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
