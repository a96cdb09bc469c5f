//! Upload pipeline: compile and flash with recoverable failure handling
//!
//! The only state machine in the core. A started upload owns the external
//! toolchain process and the serial port exclusively for its duration and
//! reports progress over a one-directional event stream; the caller never
//! blocks on toolchain I/O. Compile errors are terminal and verbatim;
//! transient upload faults get a bounded number of retries with backoff;
//! cancellation is cooperative and always lands in `Cancelled`.

pub mod ports;
pub mod toolchain;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::device::Board;
use crate::generator::GenerationBundle;
use toolchain::{Toolchain, ToolchainError};

/// Pipeline states: `Idle -> Compiling -> Uploading -> Succeeded`, with
/// `Failed` from either running state and `Cancelled` from any running state.
///
/// `Idle` names the pre-start state for UI consumers of the serialized form;
/// it is never sent as an event payload. The first event of a run is always
/// `Compiling`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Idle,
    Compiling,
    Uploading,
    Succeeded,
    Failed,
    Cancelled,
}

/// One progress report: state transition plus optional text line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadEvent {
    pub state: UploadState,
    pub message: Option<String>,
}

/// Typed pipeline failures
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum PipelineError {
    /// Toolchain diagnostics verbatim; deterministic, never retried
    #[error("compile failed:\n{diagnostics}")]
    CompileError { diagnostics: String },

    #[error("upload failed ({}): {detail}", fault_kind(.transient))]
    UploadError { transient: bool, detail: String },

    /// The serial port is an exclusive resource; no queueing
    #[error("an upload is already in progress")]
    PipelineBusy,

    #[error("no serial port found for board '{board}'")]
    PortNotFound { board: String },
}

fn fault_kind(transient: &bool) -> &'static str {
    if *transient {
        "transient"
    } else {
        "permanent"
    }
}

/// Terminal result of one pipeline run
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    Succeeded,
    Failed(PipelineError),
    Cancelled,
}

/// Bounded retry with exponential backoff, applied to transient upload
/// faults only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total upload attempts (first try included)
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
        }
    }
}

/// Everything one upload run needs
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub bundle: GenerationBundle,
    pub board: Board,
    /// Explicit serial port; when absent the pipeline auto-selects by the
    /// board's USB signature
    pub port: Option<String>,
    /// Directory the bundle is materialized into for the toolchain
    pub project_dir: PathBuf,
}

/// Handle to a running upload: event stream, cancellation, terminal result
pub struct UploadHandle {
    pub events: mpsc::UnboundedReceiver<UploadEvent>,
    cancel: CancellationToken,
    task: JoinHandle<UploadOutcome>,
}

impl UploadHandle {
    /// Request cooperative cancellation; observable within one polling
    /// interval of the running stage
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the terminal outcome
    pub async fn wait(self) -> UploadOutcome {
        self.task.await.unwrap_or_else(|e| {
            warn!("upload task panicked: {e}");
            UploadOutcome::Failed(PipelineError::UploadError {
                transient: false,
                detail: "upload task panicked".to_string(),
            })
        })
    }
}

/// Adapt an event receiver into a `Stream` for SSE-style consumers
pub fn event_stream(
    events: mpsc::UnboundedReceiver<UploadEvent>,
) -> UnboundedReceiverStream<UploadEvent> {
    UnboundedReceiverStream::new(events)
}

/// The upload pipeline. One instance may run at most one upload at a time;
/// starting a second while one is active fails fast with `PipelineBusy`.
pub struct UploadPipeline {
    toolchain: Arc<dyn Toolchain>,
    retry: RetryPolicy,
    active: Arc<AtomicBool>,
}

impl UploadPipeline {
    pub fn new(toolchain: Arc<dyn Toolchain>) -> Self {
        Self {
            toolchain,
            retry: RetryPolicy::default(),
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Start an upload off the caller's thread.
    ///
    /// Returns immediately with the event receiver; the caller consumes
    /// events and awaits the outcome without ever blocking the pipeline.
    pub fn start(&self, request: UploadRequest) -> Result<UploadHandle, PipelineError> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::PipelineBusy);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_upload(
            self.toolchain.clone(),
            self.retry.clone(),
            request,
            cancel.clone(),
            tx,
            self.active.clone(),
        ));

        Ok(UploadHandle {
            events: rx,
            cancel,
            task,
        })
    }
}

/// Clears the active flag when the run ends, whatever the path out
struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn send(tx: &mpsc::UnboundedSender<UploadEvent>, state: UploadState, message: Option<String>) {
    // Receiver may be gone (caller stopped listening); the run continues
    let _ = tx.send(UploadEvent { state, message });
}

async fn run_upload(
    toolchain: Arc<dyn Toolchain>,
    retry: RetryPolicy,
    request: UploadRequest,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<UploadEvent>,
    active: Arc<AtomicBool>,
) -> UploadOutcome {
    let _guard = ActiveGuard(active);

    if cancel.is_cancelled() {
        send(&tx, UploadState::Cancelled, Some("cancelled before start".into()));
        return UploadOutcome::Cancelled;
    }

    // Compile stage
    send(
        &tx,
        UploadState::Compiling,
        Some(format!("compiling for board '{}'", request.board.id)),
    );

    if let Err(e) = materialize(&request).await {
        let error = PipelineError::CompileError {
            diagnostics: format!("failed to write project files: {e}"),
        };
        send(&tx, UploadState::Failed, Some(error.to_string()));
        return UploadOutcome::Failed(error);
    }

    match toolchain
        .compile(&request.project_dir, &request.board, &cancel, &tx_log(&tx, UploadState::Compiling))
        .await
    {
        Ok(()) => {}
        Err(ToolchainError::Cancelled) => return finish_cancelled(&tx),
        Err(ToolchainError::Compile { diagnostics }) => {
            let error = PipelineError::CompileError { diagnostics };
            send(&tx, UploadState::Failed, Some(error.to_string()));
            return UploadOutcome::Failed(error);
        }
        Err(other) => {
            // Launch faults surface here (toolchain missing etc.)
            let error = PipelineError::CompileError {
                diagnostics: other.to_string(),
            };
            send(&tx, UploadState::Failed, Some(error.to_string()));
            return UploadOutcome::Failed(error);
        }
    }

    // Upload stage. Serial enumeration is synchronous OS I/O; keep it off
    // the async worker thread.
    let explicit = request.port.clone();
    let scan_board = request.board.clone();
    let resolved = match tokio::task::spawn_blocking(move || {
        ports::resolve_port(explicit.as_deref(), &scan_board)
    })
    .await
    {
        Ok(resolved) => resolved,
        Err(e) => Err(PipelineError::UploadError {
            transient: false,
            detail: format!("port scan failed: {e}"),
        }),
    };
    let port = match resolved {
        Ok(port) => port,
        Err(error) => {
            send(&tx, UploadState::Failed, Some(error.to_string()));
            return UploadOutcome::Failed(error);
        }
    };

    send(
        &tx,
        UploadState::Uploading,
        Some(format!("flashing over {port}")),
    );

    let mut delay = retry.initial_delay;
    let mut attempt: u32 = 1;
    loop {
        match toolchain
            .upload(
                &request.project_dir,
                &request.board,
                &port,
                &cancel,
                &tx_log(&tx, UploadState::Uploading),
            )
            .await
        {
            Ok(()) => {
                info!(board = %request.board.id, %port, "upload complete");
                send(&tx, UploadState::Succeeded, Some("upload complete".into()));
                return UploadOutcome::Succeeded;
            }
            Err(ToolchainError::Cancelled) => return finish_cancelled(&tx),
            Err(ToolchainError::Permanent { detail }) => {
                let error = PipelineError::UploadError {
                    transient: false,
                    detail,
                };
                send(&tx, UploadState::Failed, Some(error.to_string()));
                return UploadOutcome::Failed(error);
            }
            Err(ToolchainError::Compile { diagnostics }) => {
                // A toolchain should not report compile faults here; treat as terminal
                let error = PipelineError::CompileError { diagnostics };
                send(&tx, UploadState::Failed, Some(error.to_string()));
                return UploadOutcome::Failed(error);
            }
            Err(ToolchainError::Transient { detail }) => {
                if attempt >= retry.max_attempts {
                    let error = PipelineError::UploadError {
                        transient: true,
                        detail,
                    };
                    send(&tx, UploadState::Failed, Some(error.to_string()));
                    return UploadOutcome::Failed(error);
                }

                warn!(
                    attempt,
                    max = retry.max_attempts,
                    %detail,
                    "transient upload fault, backing off"
                );
                send(
                    &tx,
                    UploadState::Uploading,
                    Some(format!(
                        "transient fault ({detail}), retrying in {delay:?} (attempt {attempt}/{})",
                        retry.max_attempts
                    )),
                );

                tokio::select! {
                    _ = cancel.cancelled() => return finish_cancelled(&tx),
                    _ = tokio::time::sleep(delay) => {}
                }
                delay = (delay * 2).min(retry.max_delay);
                attempt += 1;
            }
        }
    }
}

fn finish_cancelled(tx: &mpsc::UnboundedSender<UploadEvent>) -> UploadOutcome {
    info!("upload cancelled");
    send(tx, UploadState::Cancelled, Some("upload cancelled".into()));
    UploadOutcome::Cancelled
}

/// Forward raw toolchain output lines as events of the current state
fn tx_log(
    tx: &mpsc::UnboundedSender<UploadEvent>,
    state: UploadState,
) -> mpsc::UnboundedSender<String> {
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    let events = tx.clone();
    tokio::spawn(async move {
        while let Some(line) = line_rx.recv().await {
            let _ = events.send(UploadEvent {
                state,
                message: Some(line),
            });
        }
    });
    line_tx
}

/// Write the bundle's source files into the toolchain project directory
async fn materialize(request: &UploadRequest) -> std::io::Result<()> {
    for (path, text) in &request.bundle.source_files {
        let full = request.project_dir.join(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, text).await?;
    }
    Ok(())
}
