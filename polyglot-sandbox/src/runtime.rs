//! Runtime provider trait and implementations

mod docker;
mod process;
#[cfg(any(test, feature = "testing"))]
mod scripted;

use crate::error::Result;
use crate::types::{EphemeralRun, ExitReport, InteractiveProcess, NamedRun, ProcessStreams};
use async_trait::async_trait;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};

pub use docker::DockerProvider;
pub use process::HostProvider;
#[cfg(any(test, feature = "testing"))]
pub use scripted::{ProviderCall, ScriptedProvider};

/// Size of a single read from a process pipe
const CHUNK_SIZE: usize = 8 * 1024;

/// Buffered chunks per stream before the reader waits on the consumer
const STREAM_CAPACITY: usize = 128;

/// External system that manages isolated process lifecycles
#[async_trait]
pub trait RuntimeProvider: Send + Sync {
    /// Locally stored images matching `filter`
    async fn list_local_images(&self, filter: &str) -> Result<Vec<String>>;

    /// Fetch an image; resolves once the pull has finished
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Start an auto-removed process and return its live output
    async fn run_ephemeral(&self, run: EphemeralRun) -> Result<ProcessStreams>;

    /// Start a named interactive process with piped stdin
    async fn run_named(&self, run: NamedRun) -> Result<InteractiveProcess>;

    /// Force-remove a named process; missing names are not an error
    async fn remove_named(&self, name: &str) -> Result<()>;

    /// Provider name for logs
    fn name(&self) -> &str;
}

/// Wire a spawned child's pipes into [`ProcessStreams`].
///
/// One reader task per pipe forwards raw chunks in arrival order. A waiter
/// task reports the exit; when `kill` fires (or its switch is dropped) the
/// child is killed first.
pub(crate) fn supervise(mut child: Child, kill: Option<oneshot::Receiver<()>>) -> ProcessStreams {
    let (stdout_tx, stdout_rx) = mpsc::channel(STREAM_CAPACITY);
    let (stderr_tx, stderr_rx) = mpsc::channel(STREAM_CAPACITY);
    let (exit_tx, exit_rx) = oneshot::channel();
    let start = Instant::now();

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(pump(stdout, stdout_tx));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(pump(stderr, stderr_tx));
    }

    tokio::spawn(async move {
        let waited = match kill {
            Some(kill_rx) => {
                tokio::select! {
                    status = child.wait() => status,
                    _ = kill_rx => {
                        tracing::debug!("Killing supervised process");
                        let _ = child.kill().await;
                        child.wait().await
                    }
                }
            }
            None => child.wait().await,
        };

        let report = match waited {
            Ok(status) => ExitReport {
                exit_code: status.code().unwrap_or(-1),
                duration_ms: start.elapsed().as_millis() as u64,
                error: None,
            },
            Err(e) => ExitReport {
                exit_code: -1,
                duration_ms: start.elapsed().as_millis() as u64,
                error: Some(format!("Process wait error: {}", e)),
            },
        };
        tracing::debug!(
            exit_code = report.exit_code,
            duration_ms = report.duration_ms,
            "Process exited"
        );
        let _ = exit_tx.send(report);
    });

    ProcessStreams {
        stdout: stdout_rx,
        stderr: stderr_rx,
        exit: exit_rx,
    }
}

/// Forward everything read from `reader` to `tx`.
///
/// Keeps draining after the receiver is gone so a process never blocks on a
/// full pipe nobody listens to.
async fn pump<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut forwarding = true;
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if forwarding && tx.send(buf[..n].to_vec()).await.is_err() {
                    forwarding = false;
                }
            }
            Err(e) => {
                tracing::debug!("Pipe read error: {}", e);
                break;
            }
        }
    }
}
