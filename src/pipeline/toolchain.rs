//! External build/flash toolchain abstraction
//!
//! The pipeline talks to PlatformIO through the `Toolchain` trait so tests
//! can substitute deterministic mocks for the real external processes. The
//! process implementation streams child output line by line and kills the
//! child cooperatively on cancellation.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ToolchainConfig;
use crate::device::Board;

/// How long to wait for a killed child to actually exit
const KILL_WAIT: Duration = Duration::from_secs(3);

/// Output patterns marking an upload fault that no retry can fix
const PERMANENT_FAULT_PATTERNS: &[&str] = &[
    "could not open port",
    "no such file or directory",
    "permission denied",
    "access is denied",
];

/// Line sink for streaming toolchain output as progress messages
pub type LogSink = mpsc::UnboundedSender<String>;

/// Classified toolchain failure
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum ToolchainError {
    /// Compiler rejected the source; diagnostics verbatim, never retried
    #[error("compile failed:\n{diagnostics}")]
    Compile { diagnostics: String },

    /// Transient upload fault (port busy, device not responding); retryable
    #[error("transient upload fault: {detail}")]
    Transient { detail: String },

    /// Permanent upload fault (port missing, permission denied); terminal
    #[error("permanent upload fault: {detail}")]
    Permanent { detail: String },

    /// The operation was cancelled cooperatively
    #[error("cancelled")]
    Cancelled,
}

/// Seam between the upload pipeline and the external build/flash tools
#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Compile the materialized project directory for the target board
    async fn compile(
        &self,
        project_dir: &Path,
        board: &Board,
        cancel: &CancellationToken,
        log: &LogSink,
    ) -> Result<(), ToolchainError>;

    /// Flash the compiled firmware over the given serial port
    async fn upload(
        &self,
        project_dir: &Path,
        board: &Board,
        port: &str,
        cancel: &CancellationToken,
        log: &LogSink,
    ) -> Result<(), ToolchainError>;
}

/// PlatformIO-backed toolchain (`pio run` / `pio run -t upload`)
pub struct PioToolchain {
    config: ToolchainConfig,
}

impl PioToolchain {
    pub fn new(config: ToolchainConfig) -> Self {
        Self { config }
    }

    /// Use the discovered PlatformIO installation
    pub fn discovered() -> Self {
        Self::new(ToolchainConfig::default())
    }

    /// Run one toolchain command, streaming its merged output.
    ///
    /// Returns the captured output and whether the process exited zero.
    /// Cancellation kills the child and waits a bounded time for it to die.
    async fn run_streamed(
        &self,
        project_dir: &Path,
        extra_args: &[&str],
        cancel: &CancellationToken,
        log: &LogSink,
    ) -> Result<(String, bool), ToolchainError> {
        let (program, base_args) = self.config.command.split_first().ok_or_else(|| {
            ToolchainError::Permanent {
                detail: "toolchain command is empty".to_string(),
            }
        })?;

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(base_args)
            .args(extra_args)
            .arg("-d")
            .arg(project_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(?program, ?extra_args, dir = %project_dir.display(), "launching toolchain");

        let mut child = cmd.spawn().map_err(|e| ToolchainError::Permanent {
            detail: format!("failed to launch '{program}': {e}"),
        })?;

        // Child stdout/stderr are always piped above
        let stdout = child.stdout.take().ok_or_else(|| ToolchainError::Permanent {
            detail: "toolchain stdout unavailable".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| ToolchainError::Permanent {
            detail: "toolchain stderr unavailable".to_string(),
        })?;

        let mut out_lines = BufReader::new(stdout).lines();
        let mut err_lines = BufReader::new(stderr).lines();
        let mut out_done = false;
        let mut err_done = false;
        let mut captured = String::new();

        while !(out_done && err_done) {
            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!("toolchain cancelled, killing child process");
                    let _ = child.kill().await;
                    let _ = tokio::time::timeout(KILL_WAIT, child.wait()).await;
                    return Err(ToolchainError::Cancelled);
                }
                line = out_lines.next_line(), if !out_done => match line {
                    Ok(Some(line)) => {
                        captured.push_str(&line);
                        captured.push('\n');
                        let _ = log.send(line);
                    }
                    _ => out_done = true,
                },
                line = err_lines.next_line(), if !err_done => match line {
                    Ok(Some(line)) => {
                        captured.push_str(&line);
                        captured.push('\n');
                        let _ = log.send(line);
                    }
                    _ => err_done = true,
                },
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                let _ = tokio::time::timeout(KILL_WAIT, child.wait()).await;
                return Err(ToolchainError::Cancelled);
            }
            status = child.wait() => status.map_err(|e| ToolchainError::Permanent {
                detail: format!("failed to reap toolchain process: {e}"),
            })?,
        };

        Ok((captured, status.success()))
    }
}

/// Classify a failed upload by its output: known-permanent patterns fail
/// immediately, everything else is treated as transient and retried
fn classify_upload_failure(captured: &str) -> ToolchainError {
    let lowered = captured.to_lowercase();
    if PERMANENT_FAULT_PATTERNS.iter().any(|p| lowered.contains(p)) {
        ToolchainError::Permanent {
            detail: last_line(captured),
        }
    } else {
        ToolchainError::Transient {
            detail: last_line(captured),
        }
    }
}

fn last_line(captured: &str) -> String {
    captured
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("toolchain exited with a non-zero status")
        .to_string()
}

#[async_trait]
impl Toolchain for PioToolchain {
    async fn compile(
        &self,
        project_dir: &Path,
        _board: &Board,
        cancel: &CancellationToken,
        log: &LogSink,
    ) -> Result<(), ToolchainError> {
        let (captured, success) = self.run_streamed(project_dir, &["run"], cancel, log).await?;
        if success {
            Ok(())
        } else {
            // Compiler diagnostics are deterministic; surface them verbatim
            Err(ToolchainError::Compile {
                diagnostics: captured,
            })
        }
    }

    async fn upload(
        &self,
        project_dir: &Path,
        _board: &Board,
        port: &str,
        cancel: &CancellationToken,
        log: &LogSink,
    ) -> Result<(), ToolchainError> {
        let (captured, success) = self
            .run_streamed(
                project_dir,
                &["run", "-t", "upload", "--upload-port", port],
                cancel,
                log,
            )
            .await?;
        if success {
            Ok(())
        } else {
            Err(classify_upload_failure(&captured))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_is_permanent() {
        let err = classify_upload_failure("avrdude: ser_open(): Permission denied\n");
        assert!(matches!(err, ToolchainError::Permanent { .. }));
    }

    #[test]
    fn port_busy_is_transient() {
        let err = classify_upload_failure("avrdude: port /dev/ttyUSB0 is busy\n");
        assert!(matches!(err, ToolchainError::Transient { .. }));
    }

    #[test]
    fn unknown_failure_defaults_to_transient() {
        let err = classify_upload_failure("something unexpected happened\n");
        assert!(matches!(err, ToolchainError::Transient { .. }));
    }

    #[test]
    fn detail_is_last_non_empty_line() {
        let err = classify_upload_failure("line one\n\ndevice not responding\n\n");
        assert_eq!(
            err,
            ToolchainError::Transient {
                detail: "device not responding".to_string(),
            }
        );
    }
}
