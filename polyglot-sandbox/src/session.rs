//! Interactive session (REPL) lifecycle
//!
//! Sessions are keyed by language id: at most one REPL per language. Starting
//! a REPL for a language that already has one force-terminates the previous
//! session first, whoever owns it.
//!
//! Lifecycle: `Absent → Starting → Running → Stopped → Absent`. A session
//! whose process exits on its own is dropped from the table the same way.

use crate::command::build_repl_command;
use crate::error::{Result, SandboxError};
use crate::image::ImageManager;
use crate::registry::LanguageRegistry;
use crate::router::{forward_streams, ListenerSet, REPL_TAGS};
use crate::runtime::RuntimeProvider;
use crate::types::{ExitReport, InteractiveProcess, KillSwitch, NamedRun};
use polyglot_common::{ConnectionId, ServerEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Mutex};

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Absent,
    Starting,
    Running,
    Stopped,
}

/// Container name of a language's session
pub fn container_name(language_id: &str) -> String {
    format!("{}_repl", language_id)
}

/// Snapshot of a session table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub language_id: String,
    pub container_name: String,
    pub owner: ConnectionId,
    pub state: SessionState,
}

type SessionInput = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;
type SessionTable = Arc<Mutex<HashMap<String, Slot>>>;
type StartLocks = Arc<std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>>;

/// A running interactive process; exclusively owned by the manager
struct ReplSession {
    container_name: String,
    owner: ConnectionId,
    generation: u64,
    stdin: SessionInput,
    kill: KillSwitch,
    listeners: ListenerSet,
}

impl ReplSession {
    /// Detach listeners, kill the process and remove its container.
    ///
    /// In-flight output is not drained.
    async fn terminate(mut self, provider: &dyn RuntimeProvider) {
        self.listeners.detach();
        self.kill.trigger();
        if let Err(e) = provider.remove_named(&self.container_name).await {
            tracing::warn!(container = %self.container_name, "Failed to remove session: {}", e);
        }
        tracing::info!(container = %self.container_name, "Session stopped");
    }
}

enum Slot {
    Starting {
        owner: ConnectionId,
        generation: u64,
    },
    Running(ReplSession),
}

impl Slot {
    fn owner(&self) -> ConnectionId {
        match self {
            Slot::Starting { owner, .. } => *owner,
            Slot::Running(session) => session.owner,
        }
    }

    fn state(&self) -> SessionState {
        match self {
            Slot::Starting { .. } => SessionState::Starting,
            Slot::Running(_) => SessionState::Running,
        }
    }
}

/// Starts, tracks and terminates REPL sessions.
///
/// Lock order: a language's start lock is always taken before the session
/// table, and the table is never held across an await.
pub struct SessionManager {
    registry: Arc<LanguageRegistry>,
    images: ImageManager,
    provider: Arc<dyn RuntimeProvider>,
    sessions: SessionTable,
    /// Serialises start/terminate per language so container names never collide
    start_locks: StartLocks,
    next_generation: AtomicU64,
}

impl SessionManager {
    pub fn new(
        registry: Arc<LanguageRegistry>,
        images: ImageManager,
        provider: Arc<dyn RuntimeProvider>,
    ) -> Self {
        Self {
            registry,
            images,
            provider,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            start_locks: Arc::new(std::sync::Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Start a REPL for `language_id` owned by `owner`, forwarding its output
    /// to `sink` as `repl_out` / `repl_err` events.
    ///
    /// Any existing session for the language is terminated before the new
    /// process is spawned. Languages without an interactive shell fail with
    /// `UnsupportedOperation` before anything is touched.
    pub async fn start_repl(
        &self,
        language_id: &str,
        owner: ConnectionId,
        sink: mpsc::Sender<ServerEvent>,
    ) -> Result<SessionInfo> {
        let spec = self.registry.lookup(language_id)?;
        let command = build_repl_command(spec)?;
        let image = spec.image.clone();
        let name = container_name(language_id);

        let start_lock = self.start_lock(language_id);
        let _guard = start_lock.lock().await;

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let previous = self
            .sessions
            .lock()
            .await
            .insert(language_id.to_string(), Slot::Starting { owner, generation });

        if let Some(Slot::Running(previous)) = previous {
            tracing::info!(
                language = %language_id,
                previous_owner = %previous.owner,
                "Replacing running session"
            );
            previous.terminate(self.provider.as_ref()).await;
        }
        // Clears a container left behind by an earlier server process
        if let Err(e) = self.provider.remove_named(&name).await {
            tracing::debug!(container = %name, "Stale session cleanup failed: {}", e);
        }

        tracing::info!(language = %language_id, owner = %owner, "Starting session");
        let process = match self.spawn(&image, &name, &command).await {
            Ok(process) => process,
            Err(e) => {
                self.discard_starting(language_id, generation).await;
                return Err(e);
            }
        };

        let InteractiveProcess {
            stdin,
            streams,
            kill,
        } = process;
        let exit = streams.exit;
        let session = ReplSession {
            container_name: name.clone(),
            owner,
            generation,
            stdin: Arc::new(Mutex::new(stdin)),
            kill,
            listeners: forward_streams(streams.stdout, streams.stderr, REPL_TAGS, sink),
        };

        let mut sessions = self.sessions.lock().await;
        match sessions.get(language_id) {
            Some(Slot::Starting { generation: g, .. }) if *g == generation => {
                sessions.insert(language_id.to_string(), Slot::Running(session));
                drop(sessions);
                tokio::spawn(reap_on_exit(
                    self.sessions.clone(),
                    self.start_locks.clone(),
                    self.provider.clone(),
                    language_id.to_string(),
                    generation,
                    exit,
                ));
                tracing::info!(language = %language_id, container = %name, "Session running");
                Ok(SessionInfo {
                    language_id: language_id.to_string(),
                    container_name: name,
                    owner,
                    state: SessionState::Running,
                })
            }
            _ => {
                // Stopped while starting
                drop(sessions);
                session.terminate(self.provider.as_ref()).await;
                Err(SandboxError::SessionNotRunning(language_id.to_string()))
            }
        }
    }

    /// Write raw bytes to a running session's stdin.
    pub async fn write(&self, language_id: &str, data: &[u8]) -> Result<()> {
        let stdin = match self.sessions.lock().await.get(language_id) {
            Some(Slot::Running(session)) => session.stdin.clone(),
            _ => return Err(SandboxError::SessionNotRunning(language_id.to_string())),
        };
        write_input(language_id, &stdin, data).await
    }

    /// Write to a running session only if `owner` started it.
    ///
    /// A session that was replaced by another connection's start counts as
    /// not running for its previous owner.
    pub async fn write_owned(
        &self,
        language_id: &str,
        owner: ConnectionId,
        data: &[u8],
    ) -> Result<()> {
        let stdin = match self.sessions.lock().await.get(language_id) {
            Some(Slot::Running(session)) if session.owner == owner => session.stdin.clone(),
            _ => return Err(SandboxError::SessionNotRunning(language_id.to_string())),
        };
        write_input(language_id, &stdin, data).await
    }

    /// Stop the session for `language_id`.
    ///
    /// Returns `false` when there was nothing to stop; stopping an absent
    /// session is not an error.
    pub async fn stop_repl(&self, language_id: &str) -> Result<bool> {
        Ok(self.stop_matching(language_id, None).await)
    }

    /// Stop every session owned by `owner`; used when a connection closes.
    pub async fn disconnect(&self, owner: ConnectionId) -> usize {
        let owned: Vec<String> = self
            .sessions
            .lock()
            .await
            .iter()
            .filter(|(_, slot)| slot.owner() == owner)
            .map(|(id, _)| id.clone())
            .collect();

        let mut stopped = 0;
        for language_id in owned {
            if self.stop_matching(&language_id, Some(owner)).await {
                stopped += 1;
            }
        }
        if stopped > 0 {
            tracing::info!(owner = %owner, stopped, "Stopped sessions of closed connection");
        }
        stopped
    }

    pub async fn state(&self, language_id: &str) -> SessionState {
        self.sessions
            .lock()
            .await
            .get(language_id)
            .map(Slot::state)
            .unwrap_or(SessionState::Absent)
    }

    pub async fn active_sessions(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.lock().await;
        let mut infos: Vec<SessionInfo> = sessions
            .iter()
            .map(|(id, slot)| SessionInfo {
                language_id: id.clone(),
                container_name: container_name(id),
                owner: slot.owner(),
                state: slot.state(),
            })
            .collect();
        infos.sort_by(|a, b| a.language_id.cmp(&b.language_id));
        infos
    }

    async fn spawn(&self, image: &str, name: &str, command: &str) -> Result<InteractiveProcess> {
        self.images.ensure_available(image).await?;
        self.provider
            .run_named(NamedRun {
                name: name.to_string(),
                image: image.to_string(),
                command: command.to_string(),
            })
            .await
    }

    /// Remove a Starting entry if it still belongs to `generation`.
    async fn discard_starting(&self, language_id: &str, generation: u64) {
        let mut sessions = self.sessions.lock().await;
        if matches!(
            sessions.get(language_id),
            Some(Slot::Starting { generation: g, .. }) if *g == generation
        ) {
            sessions.remove(language_id);
        }
    }

    /// Stop the session if present (and owned by `owner`, when given).
    async fn stop_matching(&self, language_id: &str, owner: Option<ConnectionId>) -> bool {
        let owned_by = |slot: &Slot| owner.map_or(true, |o| slot.owner() == o);

        // A session still starting is cancelled by dropping its entry; the
        // starter notices when it tries to promote it.
        {
            let mut sessions = self.sessions.lock().await;
            match sessions.get(language_id) {
                None => return false,
                Some(slot) if !owned_by(slot) => return false,
                Some(Slot::Starting { .. }) => {
                    sessions.remove(language_id);
                    tracing::info!(language = %language_id, "Session cancelled while starting");
                    return true;
                }
                Some(Slot::Running(_)) => {}
            }
        }

        let start_lock = self.start_lock(language_id);
        let _guard = start_lock.lock().await;

        let removed = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get(language_id) {
                Some(slot @ Slot::Running(_)) if owned_by(slot) => sessions.remove(language_id),
                _ => None,
            }
        };

        match removed {
            Some(Slot::Running(session)) => {
                session.terminate(self.provider.as_ref()).await;
                true
            }
            _ => false,
        }
    }

    fn start_lock(&self, language_id: &str) -> Arc<Mutex<()>> {
        start_lock(&self.start_locks, language_id)
    }
}

fn start_lock(locks: &StartLocks, language_id: &str) -> Arc<Mutex<()>> {
    let mut locks = locks.lock().unwrap_or_else(|e| e.into_inner());
    locks
        .entry(language_id.to_string())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

async fn write_input(language_id: &str, stdin: &SessionInput, data: &[u8]) -> Result<()> {
    // A closed pipe means the process is gone
    let not_running = |e: std::io::Error| match e.kind() {
        std::io::ErrorKind::BrokenPipe => {
            SandboxError::SessionNotRunning(language_id.to_string())
        }
        _ => SandboxError::Provider(format!("session input: {}", e)),
    };
    let mut stdin = stdin.lock().await;
    stdin.write_all(data).await.map_err(not_running)?;
    stdin.flush().await.map_err(not_running)?;
    Ok(())
}

/// Drop a session whose process exited by itself.
///
/// Sessions stopped or replaced through the manager are already gone from the
/// table (or carry a newer generation) by the time their exit arrives.
async fn reap_on_exit(
    sessions: SessionTable,
    start_locks: StartLocks,
    provider: Arc<dyn RuntimeProvider>,
    language_id: String,
    generation: u64,
    exit: oneshot::Receiver<ExitReport>,
) {
    let report = exit.await.ok();

    let start_lock = start_lock(&start_locks, &language_id);
    let _guard = start_lock.lock().await;

    let removed = {
        let mut sessions = sessions.lock().await;
        match sessions.get(&language_id) {
            Some(Slot::Running(session)) if session.generation == generation => {
                sessions.remove(&language_id)
            }
            _ => None,
        }
    };

    if let Some(Slot::Running(session)) = removed {
        tracing::info!(
            language = %language_id,
            exit_code = ?report.as_ref().map(|r| r.exit_code),
            "Session process exited"
        );
        // Listeners are left to drain the remaining output
        if let Err(e) = provider.remove_named(&session.container_name).await {
            tracing::warn!(
                container = %session.container_name,
                "Failed to remove session: {}",
                e
            );
        }
    }
}
