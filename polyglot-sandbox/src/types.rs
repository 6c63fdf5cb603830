//! Core types for sandbox execution

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, oneshot};

/// Request to run a source file once
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Registry key of the language
    pub language_id: String,

    /// Filename the source is written under; its basename parameterises the
    /// compile and run commands
    pub filename: String,

    /// Base64-encoded source code
    pub content: String,
}

impl ExecutionRequest {
    pub fn new(
        language_id: impl Into<String>,
        filename: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            language_id: language_id.into(),
            filename: filename.into(),
            content: content.into(),
        }
    }
}

/// Live output of a started process
#[derive(Debug)]
pub struct ProcessStreams {
    /// Stdout chunks in arrival order
    pub stdout: mpsc::Receiver<Vec<u8>>,

    /// Stderr chunks in arrival order
    pub stderr: mpsc::Receiver<Vec<u8>>,

    /// Resolves once the process has exited
    pub exit: oneshot::Receiver<ExitReport>,
}

/// How a process ended
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitReport {
    /// Exit code (0 = success, -1 when killed by a signal)
    pub exit_code: i32,

    /// Wall-clock lifetime in milliseconds
    pub duration_ms: u64,

    /// Set when waiting on the process failed
    pub error: Option<String>,
}

impl ExitReport {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && self.error.is_none()
    }
}

/// Parameters of a one-shot, auto-removed process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EphemeralRun {
    pub image: String,
    /// Host directory holding the materialized source
    pub mount_dir: PathBuf,
    /// Path the mount appears under inside the process; also its working directory
    pub workdir: String,
    /// Shell command line, run with `sh -c`
    pub command: String,
}

/// Parameters of a long-lived, named interactive process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedRun {
    pub name: String,
    pub image: String,
    pub command: String,
}

/// Terminates a supervised process when triggered or dropped.
pub struct KillSwitch {
    tx: Option<oneshot::Sender<()>>,
}

impl KillSwitch {
    /// Create a switch and the receiver the supervising task listens on.
    pub fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn trigger(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.tx.is_none()
    }
}

/// A started interactive process
pub struct InteractiveProcess {
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    pub streams: ProcessStreams,
    pub kill: KillSwitch,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_report_success() {
        let ok = ExitReport {
            exit_code: 0,
            duration_ms: 12,
            error: None,
        };
        assert!(ok.success());

        let failed = ExitReport {
            exit_code: 1,
            ..ok.clone()
        };
        assert!(!failed.success());
    }

    #[tokio::test]
    async fn test_kill_switch_fires_once() {
        let (mut switch, rx) = KillSwitch::new();
        assert!(!switch.is_triggered());
        switch.trigger();
        switch.trigger();
        assert!(switch.is_triggered());
        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_kill_switch_releases_receiver() {
        let (switch, rx) = KillSwitch::new();
        drop(switch);
        assert!(rx.await.is_err());
    }
}
