//! Execution adapter for the external downloader process.
//!
//! Builds a deterministic argument set, runs the downloader as a child
//! process with its console output appended to a per-item capture file,
//! and decodes the exit bitmask. A running child can be cancelled through
//! a caller-supplied worker tag without touching the other queue classes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::errors::DownloaderError;

pub mod status;

pub use status::DownloadStatus;

/// One downloader invocation.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    /// URL or downloader-specific target expression.
    pub target: String,
    /// Subscription checks pass the abort-after threshold; one-off URLs
    /// do not.
    pub subscription_mode: bool,
    pub ignore_anchor: bool,
    pub metadata_only: bool,
    pub overwrite_existing: bool,
    pub filter: Option<String>,
    pub abort_after: Option<i64>,
    pub max_files: Option<i64>,
    /// Structured log written by the downloader itself; parsed later for
    /// contacted URLs.
    pub log_file: PathBuf,
    /// File the child's stdout/stderr are appended to; scanned for
    /// produced file paths after the run.
    pub console_output_file: PathBuf,
    /// Target for URLs the downloader recognized but cannot handle.
    pub unsupported_urls_file: PathBuf,
}

/// Result of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed(DownloadStatus),
    /// The child was killed through [`Executor::cancel`]. Treated as a
    /// failed execution by the worker.
    Cancelled,
}

/// Seam between the worker loops and the downloader process. Tests swap
/// in a stub implementation.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        worker: &str,
        request: &DownloadRequest,
    ) -> Result<ExecutionOutcome, DownloaderError>;

    /// Interrupt the in-flight execution tagged `worker`, if any. Returns
    /// whether something was running under that tag.
    async fn cancel(&self, worker: &str) -> bool;
}

/// The real adapter around the configured downloader executable.
pub struct Downloader {
    executable: String,
    root: PathBuf,
    download_dir: PathBuf,
    anchor_path: PathBuf,
    /// Cancellation handles of in-flight children, keyed by worker tag.
    running: Mutex<HashMap<String, Arc<Notify>>>,
}

impl Downloader {
    pub fn new(config: &Config, root: &Path) -> Self {
        Self {
            executable: config.downloader.executable.clone(),
            root: root.to_path_buf(),
            download_dir: config.download_dir(root),
            anchor_path: config.anchor_path(root),
            running: Mutex::new(HashMap::new()),
        }
    }

    fn build_command(&self, request: &DownloadRequest) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.arg("--ignore-config").arg("--verbose");

        for config_name in ["downloader-config.json", "downloader-user-config.json"] {
            let config_path = self.root.join(config_name);
            if config_path.is_file() {
                cmd.arg("-c").arg(config_path);
            }
        }
        let cookies = self.root.join("cookies.txt");
        if cookies.is_file() {
            cmd.arg("--cookies").arg(cookies);
        }

        cmd.arg("--dest").arg(&self.download_dir);
        cmd.arg("--write-metadata");
        if request.metadata_only {
            cmd.arg("--no-download");
        }
        cmd.arg("--write-log").arg(&request.log_file);
        cmd.arg("--write-unsupported").arg(&request.unsupported_urls_file);
        if request.overwrite_existing {
            cmd.arg("--no-skip");
        }
        if !request.ignore_anchor {
            cmd.arg("--download-archive").arg(&self.anchor_path);
        }
        if let Some(filter) = &request.filter {
            cmd.arg("--filter").arg(filter);
        }
        if request.subscription_mode {
            if let Some(abort_after) = request.abort_after {
                cmd.arg("-A").arg(abort_after.to_string());
            }
        }
        if let Some(max_files) = request.max_files {
            cmd.arg("-o").arg(format!("image-range=\"1-{max_files}\""));
        }
        cmd.arg("-o").arg(format!(
            "cache.file={}",
            self.root.join("downloader-cache.db").display()
        ));
        cmd.arg(&request.target);
        cmd
    }

    fn open_capture(&self, path: &Path) -> Result<std::fs::File, DownloaderError> {
        // Append, not truncate: repeated runs of the same item keep their
        // history in one capture file until it is consumed.
        let open = |p: &Path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(p)
        };
        open(path).map_err(|e| DownloaderError::CaptureFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl Executor for Downloader {
    async fn execute(
        &self,
        worker: &str,
        request: &DownloadRequest,
    ) -> Result<ExecutionOutcome, DownloaderError> {
        use std::io::Write;

        let mut capture = self.open_capture(&request.console_output_file)?;
        // Separate this run from any earlier output in the same file.
        let _ = capture.write_all(b"\n");
        let capture_err = capture
            .try_clone()
            .map_err(|e| DownloaderError::CaptureFile {
                path: request.console_output_file.display().to_string(),
                message: e.to_string(),
            })?;

        let mut cmd = self.build_command(request);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(capture))
            .stderr(Stdio::from(capture_err));

        debug!("Running downloader for target: {}", request.target);
        let mut child = cmd.spawn().map_err(|e| DownloaderError::SpawnFailed {
            executable: self.executable.clone(),
            message: e.to_string(),
        })?;

        let cancel = Arc::new(Notify::new());
        {
            let mut running = self.running.lock().await;
            running.insert(worker.to_string(), cancel.clone());
        }

        let outcome = tokio::select! {
            status = child.wait() => match status {
                Ok(exit) => {
                    let code = exit.code().unwrap_or(1);
                    ExecutionOutcome::Completed(DownloadStatus::from_code(code))
                }
                Err(e) => {
                    warn!("Failed to wait on downloader process: {}", e);
                    ExecutionOutcome::Completed(DownloadStatus::from_code(1))
                }
            },
            _ = cancel.notified() => {
                info!("Cancelling downloader run for worker '{}'", worker);
                let _ = child.start_kill();
                let _ = child.wait().await;
                ExecutionOutcome::Cancelled
            }
        };

        let mut running = self.running.lock().await;
        running.remove(worker);
        Ok(outcome)
    }

    async fn cancel(&self, worker: &str) -> bool {
        let running = self.running.lock().await;
        match running.get(worker) {
            Some(notify) => {
                notify.notify_one();
                true
            }
            None => false,
        }
    }
}
