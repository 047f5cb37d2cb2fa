//! rtl_433 subprocess reader.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use thiserror::Error;
use tokio::process::Command;
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info};
use ws90_metrics::Broadcaster;

use super::{drain_lines, log_stderr_line, process_line, CommandLine, ReadingFilter};

/// Lifecycle of the decoder process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderState {
    /// Not started yet.
    Idle,
    /// Spawning the child.
    Starting,
    /// The child is running.
    Running {
        /// OS process id, if still known.
        pid: Option<u32>,
    },
    /// Both pipes closed and the child exited. `None` when killed by a signal.
    Exited(Option<i32>),
    /// The reader gave up; the message describes why.
    Failed(String),
}

/// Fatal reader failures.
#[derive(Debug, Error)]
pub enum ReaderError {
    /// The child could not be started.
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        /// Program that was executed.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A pipe that was requested is missing.
    #[error("child {0} was not captured")]
    MissingPipe(&'static str),

    /// Reading one of the child's pipes failed.
    #[error("failed to read child {stream}: {source}")]
    Read {
        /// `stdout` or `stderr`.
        stream: &'static str,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A drain task panicked or was cancelled.
    #[error("{stream} drain task failed: {source}")]
    Drain {
        /// `stdout` or `stderr`.
        stream: &'static str,
        /// Join failure.
        #[source]
        source: JoinError,
    },

    /// Waiting for the child failed.
    #[error("failed to wait for child: {0}")]
    Wait(#[source] io::Error),

    /// The reader task ended without reporting.
    #[error("reader task ended without reporting an outcome")]
    Aborted,
}

/// Runs the decoder and feeds its output through the line pipeline.
///
/// stdout and stderr are drained by two independent tasks, so a chatty
/// stderr never stalls readings. The child is killed if the reader is dropped
/// while it is still running.
#[derive(Debug)]
pub struct RtlReader {
    command: CommandLine,
    filter: ReadingFilter,
    broadcaster: Arc<Broadcaster>,
    state: watch::Sender<ReaderState>,
}

impl RtlReader {
    /// Create a reader that has not started yet.
    pub fn new(command: CommandLine, filter: ReadingFilter, broadcaster: Arc<Broadcaster>) -> Self {
        let (state, _) = watch::channel(ReaderState::Idle);
        Self {
            command,
            filter,
            broadcaster,
            state,
        }
    }

    /// Watch the reader's lifecycle.
    pub fn state(&self) -> watch::Receiver<ReaderState> {
        self.state.subscribe()
    }

    /// Run on a background task. The handle yields the outcome.
    pub fn spawn(self) -> ReaderHandle {
        let state = self.state();
        let (tx, rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let result = self.run().await;
            // The coordinator may already be gone.
            let _ = tx.send(result);
        });

        ReaderHandle {
            outcome: rx,
            state,
            task,
        }
    }

    /// Run the child to completion.
    pub async fn run(&self) -> Result<ExitStatus, ReaderError> {
        let result = self.run_child().await;
        match &result {
            Ok(status) => {
                self.state.send_replace(ReaderState::Exited(status.code()));
            }
            Err(e) => {
                self.state.send_replace(ReaderState::Failed(e.to_string()));
            }
        }
        result
    }

    async fn run_child(&self) -> Result<ExitStatus, ReaderError> {
        self.state.send_replace(ReaderState::Starting);

        let devices = self.filter.devices();
        if devices.is_empty() {
            info!("Listening for readings from all devices");
        } else {
            info!("Listening for readings from devices with ids: {}", devices);
        }
        debug!(command = %self.command, "Starting decoder");

        let mut child = Command::new(self.command.program())
            .args(self.command.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ReaderError::Spawn {
                program: self.command.program().to_string(),
                source,
            })?;

        self.state.send_replace(ReaderState::Running { pid: child.id() });
        info!(pid = ?child.id(), "Listening for data");

        let stdout = child.stdout.take().ok_or(ReaderError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(ReaderError::MissingPipe("stderr"))?;

        let filter = self.filter.clone();
        let broadcaster = Arc::clone(&self.broadcaster);
        let stdout_task = tokio::spawn(async move {
            drain_lines(stdout, |line| {
                process_line(line, &filter, &broadcaster);
            })
            .await
        });
        let stderr_task = tokio::spawn(async move { drain_lines(stderr, log_stderr_line).await });

        let (stdout_result, stderr_result) = tokio::join!(stdout_task, stderr_task);
        let lines = drained("stdout", stdout_result)?;
        drained("stderr", stderr_result)?;

        let status = child.wait().await.map_err(ReaderError::Wait)?;
        debug!(%status, lines, "Decoder exited");
        Ok(status)
    }
}

fn drained(
    stream: &'static str,
    result: Result<io::Result<u64>, JoinError>,
) -> Result<u64, ReaderError> {
    result
        .map_err(|source| ReaderError::Drain { stream, source })?
        .map_err(|source| ReaderError::Read { stream, source })
}

/// Handle to a spawned [`RtlReader`].
#[derive(Debug)]
pub struct ReaderHandle {
    outcome: oneshot::Receiver<Result<ExitStatus, ReaderError>>,
    state: watch::Receiver<ReaderState>,
    task: JoinHandle<()>,
}

impl ReaderHandle {
    /// Current lifecycle state.
    pub fn state(&self) -> ReaderState {
        self.state.borrow().clone()
    }

    /// A receiver for lifecycle changes.
    pub fn watch(&self) -> watch::Receiver<ReaderState> {
        self.state.clone()
    }

    /// Stop the reader. The child is killed with it.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Wait for the child to exit, or for the reader to fail.
    pub async fn wait(self) -> Result<ExitStatus, ReaderError> {
        match self.outcome.await {
            Ok(result) => result,
            Err(_) => Err(ReaderError::Aborted),
        }
    }
}
