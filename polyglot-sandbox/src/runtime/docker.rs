//! Docker runtime - drives the docker CLI

use super::{supervise, RuntimeProvider};
use crate::error::{Result, SandboxError};
use crate::types::{EphemeralRun, InteractiveProcess, KillSwitch, NamedRun, ProcessStreams};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Runs code in docker containers through the `docker` binary
pub struct DockerProvider {
    binary: String,
    publish_ports: bool,
}

impl DockerProvider {
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
            publish_ports: true,
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            ..Self::new()
        }
    }

    /// Whether one-shot containers publish their exposed ports (`-P`)
    pub fn publish_ports(mut self, publish: bool) -> Self {
        self.publish_ports = publish;
        self
    }

    fn command(&self) -> Command {
        Command::new(&self.binary)
    }

    /// Arguments for a one-shot container
    pub(crate) fn ephemeral_args(&self, run: &EphemeralRun) -> Vec<String> {
        let mut args = vec!["run".to_string(), "--rm".to_string()];
        if self.publish_ports {
            args.push("-P".to_string());
        }
        args.extend([
            "-v".to_string(),
            format!("{}:{}", run.mount_dir.display(), run.workdir),
            "-w".to_string(),
            run.workdir.clone(),
            run.image.clone(),
            "sh".to_string(),
            "-c".to_string(),
            run.command.clone(),
        ]);
        args
    }

    /// Arguments for a named interactive container
    pub(crate) fn named_args(run: &NamedRun) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--name".to_string(),
            run.name.clone(),
            "-i".to_string(),
            run.image.clone(),
        ];
        args.extend(run.command.split_whitespace().map(str::to_string));
        args
    }
}

impl Default for DockerProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuntimeProvider for DockerProvider {
    async fn list_local_images(&self, filter: &str) -> Result<Vec<String>> {
        let output = self
            .command()
            .args(["images", "--format", "{{.Repository}}:{{.Tag}}", filter])
            .output()
            .await
            .map_err(|e| SandboxError::Provider(format!("{} images: {}", self.binary, e)))?;

        if !output.status.success() {
            return Err(SandboxError::Provider(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Ok(parse_image_listing(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let mut child = self
            .command()
            .args(["pull", image])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SandboxError::Provider(format!("{} pull: {}", self.binary, e)))?;

        // Progress goes to the log; the pull result is the exit status
        if let Some(stdout) = child.stdout.take() {
            let image = image.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(image = %image, "{}", line);
                }
            });
        }
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut collected = Vec::new();
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!("{}", line);
                    collected.push(line);
                }
                collected.join("\n")
            })
        });

        let status = child
            .wait()
            .await
            .map_err(|e| SandboxError::Provider(format!("{} pull: {}", self.binary, e)))?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if status.success() {
            Ok(())
        } else {
            Err(SandboxError::Provider(if stderr.is_empty() {
                format!("docker pull exited with {}", status)
            } else {
                stderr
            }))
        }
    }

    async fn run_ephemeral(&self, run: EphemeralRun) -> Result<ProcessStreams> {
        let child = self
            .command()
            .args(self.ephemeral_args(&run))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SandboxError::ProcessSpawnFailed(format!("{}: {}", self.binary, e)))?;

        Ok(supervise(child, None))
    }

    async fn run_named(&self, run: NamedRun) -> Result<InteractiveProcess> {
        let mut child = self
            .command()
            .args(Self::named_args(&run))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::ProcessSpawnFailed(format!("{}: {}", self.binary, e)))?;

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

    async fn remove_named(&self, name: &str) -> Result<()> {
        let output = self
            .command()
            .args(["rm", "-f", name])
            .output()
            .await
            .map_err(|e| SandboxError::Provider(format!("{} rm: {}", self.binary, e)))?;

        if !output.status.success() {
            // Usually "No such container"
            tracing::debug!(
                container = %name,
                "docker rm: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "docker"
    }
}

fn parse_image_listing(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.contains("<none>"))
        .map(str::to_string)
        .collect()
}
