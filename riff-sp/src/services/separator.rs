//! Compute stage interface
//!
//! A [`StemSeparator`] turns one audio file into per-stem sample buffers. It is
//! synchronous and may block for minutes, so the orchestrator always calls it
//! from the blocking pool. It reports progress and observes cancellation
//! through its [`SeparationContext`].

use riff_common::config::SeparatorConfig;
use riff_common::events::{ProgressData, ServerMessage};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::stem_writer::read_stem_wav;
use crate::models::{StemKind, StemOutput};

/// Compute stage errors
#[derive(Debug, Error)]
pub enum SeparationError {
    #[error("Stem separation failed: {0}")]
    Failed(String),

    #[error("Stem separation cancelled")]
    Cancelled,

    #[error("Separator I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Separator produced no '{0}' stem")]
    MissingStem(StemKind),
}

/// Progress hand-off from the worker thread to the job's relay task
///
/// Sending never blocks and never touches the runtime, so it is safe to call
/// from inside `spawn_blocking`.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ProgressSender {
    pub fn new(tx: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self { tx }
    }

    pub fn report(&self, progress: f64, status: impl Into<String>) {
        self.report_with(progress, status, None);
    }

    pub fn report_with(
        &self,
        progress: f64,
        status: impl Into<String>,
        metadata: Option<serde_json::Value>,
    ) {
        let message = ServerMessage::Progress(ProgressData {
            progress,
            status: status.into(),
            metadata,
        });
        // Relay gone means the job already finished; nothing to report to
        let _ = self.tx.send(message);
    }

    /// Queue any message (terminal events included)
    pub fn emit(&self, message: ServerMessage) {
        let _ = self.tx.send(message);
    }
}

/// What a separator may see of its job
#[derive(Debug, Clone)]
pub struct SeparationContext {
    cancel: CancellationToken,
    progress: ProgressSender,
}

impl SeparationContext {
    pub fn new(cancel: CancellationToken, progress: ProgressSender) -> Self {
        Self { cancel, progress }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// `Err(Cancelled)` once the job's token is set
    pub fn checkpoint(&self) -> Result<(), SeparationError> {
        if self.cancel.is_cancelled() {
            Err(SeparationError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn report(&self, progress: f64, status: impl Into<String>) {
        self.progress.report(progress, status);
    }
}

/// Blocking stem separation
pub trait StemSeparator: Send + Sync {
    fn separate(&self, input: &Path, ctx: &SeparationContext) -> Result<StemOutput, SeparationError>;

    fn name(&self) -> &str {
        "separator"
    }
}

/// How often a running child process is checked for exit or cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runs an external separation tool (demucs by default)
///
/// Invocation: `<program> <args...> -n <model> --out <tmp> <input>`; stems are
/// read back from `<tmp>/<model>/<input file stem>/<stem>.wav`.
#[derive(Debug, Clone)]
pub struct CommandSeparator {
    program: PathBuf,
    args: Vec<String>,
    model: String,
}

impl CommandSeparator {
    pub fn new(program: impl Into<PathBuf>, model: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            model: model.into(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn from_config(config: &SeparatorConfig) -> Self {
        Self::new(&config.program, &config.model).with_args(config.args.clone())
    }

    fn output_dir(&self, out_root: &Path, input: &Path) -> PathBuf {
        let track = input
            .file_stem()
            .map(|s| s.to_os_string())
            .unwrap_or_default();
        out_root.join(&self.model).join(track)
    }
}

impl StemSeparator for CommandSeparator {
    fn separate(&self, input: &Path, ctx: &SeparationContext) -> Result<StemOutput, SeparationError> {
        ctx.checkpoint()?;

        let out_root = tempfile::Builder::new().prefix("riff-separate-").tempdir()?;
        let log_path = out_root.path().join("separator.log");
        let log = File::create(&log_path)?;

        info!(
            program = %self.program.display(),
            model = %self.model,
            input = %input.display(),
            "Starting separator process"
        );

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg("-n")
            .arg(&self.model)
            .arg("--out")
            .arg(out_root.path())
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log))
            .spawn()
            .map_err(|e| {
                SeparationError::Failed(format!(
                    "failed to start {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if ctx.is_cancelled() {
                debug!("Cancellation observed, stopping separator process");
                let _ = child.kill();
                let _ = child.wait();
                return Err(SeparationError::Cancelled);
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        if !status.success() {
            let log = std::fs::read_to_string(&log_path).unwrap_or_default();
            let tail: Vec<&str> = log.lines().rev().take(5).collect();
            let tail: Vec<&str> = tail.into_iter().rev().collect();
            return Err(SeparationError::Failed(format!(
                "{} exited with {}: {}",
                self.program.display(),
                status,
                tail.join(" | ")
            )));
        }

        let stem_dir = self.output_dir(out_root.path(), input);
        let mut output = StemOutput::new();
        for kind in StemKind::ALL {
            let path = stem_dir.join(kind.file_name());
            if !path.is_file() {
                return Err(SeparationError::MissingStem(kind));
            }
            output.insert(kind.as_str().to_string(), read_stem_wav(&path)?);
        }

        Ok(output)
    }

    fn name(&self) -> &str {
        "command"
    }
}
