//! Scripted in-memory runtime for tests
//!
//! Records every provider call and fabricates processes: one-shot runs replay
//! canned output, named processes echo their stdin to stdout until killed
//! or told to exit.

use super::RuntimeProvider;
use crate::error::{Result, SandboxError};
use crate::types::{
    EphemeralRun, ExitReport, InteractiveProcess, KillSwitch, NamedRun, ProcessStreams,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, oneshot, Notify};

/// A call made against the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    ListLocalImages(String),
    PullImage(String),
    RunEphemeral(EphemeralRun),
    RunNamed(NamedRun),
    RemoveNamed(String),
}

struct NamedProcess {
    name: String,
    alive: Arc<AtomicBool>,
    quit: Arc<Notify>,
}

#[derive(Default)]
struct ScriptState {
    local_images: Vec<String>,
    failing_pulls: HashSet<String>,
    fail_spawn: bool,
    pull_delay: Option<Duration>,
    stdout: Vec<Vec<u8>>,
    stderr: Vec<Vec<u8>>,
    calls: Vec<ProviderCall>,
    named: Vec<NamedProcess>,
}

/// Cloneable handle; clones share the same script and call log.
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Images reported as stored locally
    pub fn with_local_images<I, S>(self, images: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock().local_images = images.into_iter().map(Into::into).collect();
        self
    }

    /// Make pulls of `image` fail
    pub fn failing_pull(self, image: impl Into<String>) -> Self {
        self.lock().failing_pulls.insert(image.into());
        self
    }

    /// Make every spawn fail
    pub fn failing_spawn(self) -> Self {
        self.lock().fail_spawn = true;
        self
    }

    /// Delay every pull, to widen race windows
    pub fn with_pull_delay(self, delay: Duration) -> Self {
        self.lock().pull_delay = Some(delay);
        self
    }

    /// Output replayed by every one-shot run, chunk by chunk
    pub fn with_output(self, stdout: &[&str], stderr: &[&str]) -> Self {
        {
            let mut state = self.lock();
            state.stdout = stdout.iter().map(|c| c.as_bytes().to_vec()).collect();
            state.stderr = stderr.iter().map(|c| c.as_bytes().to_vec()).collect();
        }
        self
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.lock().calls.clone()
    }

    pub fn pull_count(&self, image: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, ProviderCall::PullImage(name) if name == image))
            .count()
    }

    pub fn spawn_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| {
                matches!(
                    call,
                    ProviderCall::RunEphemeral(_) | ProviderCall::RunNamed(_)
                )
            })
            .count()
    }

    /// Named processes started under `name` that are still alive
    pub fn live_named(&self, name: &str) -> usize {
        self.lock()
            .named
            .iter()
            .filter(|p| p.name == name && p.alive.load(Ordering::SeqCst))
            .count()
    }

    /// Make live processes named `name` exit as if they ended by themselves
    pub fn exit_named(&self, name: &str) {
        for process in self.lock().named.iter().filter(|p| p.name == name) {
            process.quit.notify_one();
        }
    }

    /// Poll until exactly `expected` processes named `name` are alive.
    pub async fn wait_for_live_named(&self, name: &str, expected: usize) -> bool {
        for _ in 0..200 {
            if self.live_named(name) == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: ProviderCall) {
        self.lock().calls.push(call);
    }
}

#[async_trait]
impl RuntimeProvider for ScriptedProvider {
    async fn list_local_images(&self, filter: &str) -> Result<Vec<String>> {
        self.record(ProviderCall::ListLocalImages(filter.to_string()));
        let state = self.lock();
        Ok(state
            .local_images
            .iter()
            .filter(|image| image.starts_with(filter.split(':').next().unwrap_or(filter)))
            .cloned()
            .collect())
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        self.record(ProviderCall::PullImage(image.to_string()));
        let delay = self.lock().pull_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if state.failing_pulls.contains(image) {
            return Err(SandboxError::Provider(format!(
                "pull access denied for {}",
                image
            )));
        }
        if !state.local_images.iter().any(|i| i == image) {
            state.local_images.push(image.to_string());
        }
        Ok(())
    }

    async fn run_ephemeral(&self, run: EphemeralRun) -> Result<ProcessStreams> {
        self.record(ProviderCall::RunEphemeral(run));
        let (stdout, stderr, fail) = {
            let state = self.lock();
            (state.stdout.clone(), state.stderr.clone(), state.fail_spawn)
        };
        if fail {
            return Err(SandboxError::ProcessSpawnFailed("scripted failure".to_string()));
        }

        let (stdout_tx, stdout_rx) = mpsc::channel(stdout.len().max(1));
        let (stderr_tx, stderr_rx) = mpsc::channel(stderr.len().max(1));
        let (exit_tx, exit_rx) = oneshot::channel();
        let exit_code = if stderr.is_empty() { 0 } else { 1 };
        tokio::spawn(async move {
            for chunk in stdout {
                let _ = stdout_tx.send(chunk).await;
            }
            for chunk in stderr {
                let _ = stderr_tx.send(chunk).await;
            }
            let _ = exit_tx.send(ExitReport {
                exit_code,
                duration_ms: 0,
                error: None,
            });
        });

        Ok(ProcessStreams {
            stdout: stdout_rx,
            stderr: stderr_rx,
            exit: exit_rx,
        })
    }

    async fn run_named(&self, run: NamedRun) -> Result<InteractiveProcess> {
        let name = run.name.clone();
        self.record(ProviderCall::RunNamed(run));
        if self.lock().fail_spawn {
            return Err(SandboxError::ProcessSpawnFailed("scripted failure".to_string()));
        }

        let alive = Arc::new(AtomicBool::new(true));
        let quit = Arc::new(Notify::new());
        self.lock().named.push(NamedProcess {
            name,
            alive: alive.clone(),
            quit: quit.clone(),
        });

        let (stdin, mut inner) = tokio::io::duplex(1024);
        let (stdout_tx, stdout_rx) = mpsc::channel(16);
        let (_stderr_tx, stderr_rx) = mpsc::channel(16);
        let (exit_tx, exit_rx) = oneshot::channel();
        let (kill, mut kill_rx) = KillSwitch::new();

        tokio::spawn(async move {
            let mut buf = vec![0u8; 1024];
            let mut exit_code = -1;
            loop {
                tokio::select! {
                    _ = &mut kill_rx => break,
                    _ = quit.notified() => {
                        exit_code = 0;
                        break;
                    }
                    read = inner.read(&mut buf) => match read {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            let _ = stdout_tx.send(buf[..n].to_vec()).await;
                        }
                    },
                }
            }
            alive.store(false, Ordering::SeqCst);
            let _ = exit_tx.send(ExitReport {
                exit_code,
                duration_ms: 0,
                error: None,
            });
        });

        Ok(InteractiveProcess {
            stdin: Box::new(stdin),
            streams: ProcessStreams {
                stdout: stdout_rx,
                stderr: stderr_rx,
                exit: exit_rx,
            },
            kill,
        })
    }

    async fn remove_named(&self, name: &str) -> Result<()> {
        self.record(ProviderCall::RemoveNamed(name.to_string()));
        Ok(())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
