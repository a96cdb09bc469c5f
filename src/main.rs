//! Deviceforge - IoT Application Composer Core
//!
//! CLI entry point: generate Arduino firmware from a project snapshot and
//! optionally compile and flash it onto the connected board.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deviceforge::config;
use deviceforge::device::DeviceLibrary;
use deviceforge::generator;
use deviceforge::pipeline::toolchain::PioToolchain;
use deviceforge::pipeline::{UploadOutcome, UploadPipeline, UploadRequest};
use deviceforge::project::Project;

struct Args {
    project: PathBuf,
    library: PathBuf,
    out: Option<PathBuf>,
    upload: bool,
    port: Option<String>,
}

fn parse_args() -> Result<Args> {
    let mut project = None;
    let mut library = None;
    let mut out = None;
    let mut upload = false;
    let mut port = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--library" => library = Some(PathBuf::from(args.next().context("--library needs a path")?)),
            "--out" => out = Some(PathBuf::from(args.next().context("--out needs a path")?)),
            "--upload" => upload = true,
            "--port" => port = Some(args.next().context("--port needs a device path")?),
            "--help" | "-h" => {
                println!(
                    "usage: deviceforge <project.json> --library <library.json> \
                     [--out DIR] [--upload] [--port /dev/ttyXXX]"
                );
                std::process::exit(0);
            }
            other if project.is_none() && !other.starts_with('-') => {
                project = Some(PathBuf::from(other));
            }
            other => bail!("unknown argument: {other}"),
        }
    }

    Ok(Args {
        project: project.context("missing project file (see --help)")?,
        library: library.context("missing --library <library.json>")?,
        out,
        upload,
        port,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deviceforge=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = parse_args()?;

    let project: Project = serde_json::from_str(
        &std::fs::read_to_string(&args.project)
            .with_context(|| format!("reading {}", args.project.display()))?,
    )
    .context("parsing project file")?;

    let library: DeviceLibrary = serde_json::from_str(
        &std::fs::read_to_string(&args.library)
            .with_context(|| format!("reading {}", args.library.display()))?,
    )
    .context("parsing device library")?;

    tracing::info!(
        "Deviceforge v{}: project '{}' for board '{}'",
        env!("CARGO_PKG_VERSION"),
        project.name,
        project.board_id
    );

    let bundle = match generator::generate(&project, &library) {
        Ok(bundle) => bundle,
        Err(error) => {
            for violation in &error.violations {
                eprintln!("  - {}", serde_json::to_string(violation)?);
            }
            bail!("{error}");
        }
    };

    let out = args.out.unwrap_or_else(|| config::project_dir(&project.name));
    for (path, text) in &bundle.source_files {
        let full = out.join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&full, text)?;
    }
    std::fs::write(
        out.join("manifest.json"),
        serde_json::to_string_pretty(&bundle.manifest)?,
    )?;
    tracing::info!(
        "generated {} file(s) into {}",
        bundle.source_files.len() + 1,
        out.display()
    );

    if !args.upload {
        return Ok(());
    }

    let board = library
        .board(&project.board_id)
        .with_context(|| format!("board '{}' not in library", project.board_id))?
        .clone();

    let pipeline = UploadPipeline::new(Arc::new(PioToolchain::discovered()));
    let mut handle = pipeline.start(UploadRequest {
        bundle,
        board,
        port: args.port,
        project_dir: out,
    })?;

    while let Some(event) = handle.events.recv().await {
        if let Some(message) = event.message {
            tracing::info!(state = ?event.state, "{message}");
        }
    }

    match handle.wait().await {
        UploadOutcome::Succeeded => Ok(()),
        UploadOutcome::Failed(error) => Err(error.into()),
        UploadOutcome::Cancelled => bail!("upload cancelled"),
    }
}
