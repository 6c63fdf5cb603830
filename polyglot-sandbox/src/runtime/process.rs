//! Host runtime - runs commands directly with a local shell

use super::{supervise, RuntimeProvider};
use crate::error::{Result, SandboxError};
use crate::types::{EphemeralRun, InteractiveProcess, KillSwitch, NamedRun, ProcessStreams};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

/// Development provider without isolation.
///
/// Every image counts as present and pulls are no-ops; commands run with
/// `sh -c` in the mounted source directory.
pub struct HostProvider {
    shell: String,
}

impl HostProvider {
    pub fn new() -> Self {
        Self {
            shell: "/bin/sh".to_string(),
        }
    }

    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for HostProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuntimeProvider for HostProvider {
    async fn list_local_images(&self, filter: &str) -> Result<Vec<String>> {
        Ok(vec![filter.to_string()])
    }

    async fn pull_image(&self, _image: &str) -> Result<()> {
        Ok(())
    }

    async fn run_ephemeral(&self, run: EphemeralRun) -> Result<ProcessStreams> {
        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(&run.command)
            .current_dir(&run.mount_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SandboxError::ProcessSpawnFailed(format!("{}: {}", self.shell, e)))?;

        Ok(supervise(child, None))
    }

    async fn run_named(&self, run: NamedRun) -> Result<InteractiveProcess> {
        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(&run.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::ProcessSpawnFailed(format!("{}: {}", self.shell, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxError::ProcessSpawnFailed("stdin not captured".to_string()))?;
        let (kill, kill_rx) = KillSwitch::new();

        Ok(InteractiveProcess {
            stdin: Box::new(stdin),
            streams: supervise(child, Some(kill_rx)),
            kill,
        })
    }

    async fn remove_named(&self, _name: &str) -> Result<()> {
        // Host processes are only reachable through their kill switch
        Ok(())
    }

    fn name(&self) -> &str {
        "host"
    }
}
