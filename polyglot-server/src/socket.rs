//! Persistent WebSocket connection
//!
//! Every frame is a JSON text message `{"event": ..., "data": ...}`. A
//! connection can stream one-shot runs and drive REPL sessions; sessions it
//! started are stopped when it closes.
//!
//! REPL commands from one connection are applied in order by a worker task,
//! so the read loop keeps reading while a start waits on an image pull.

use crate::http::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use polyglot_common::{ClientMessage, ConnectionId, ReplInput, ServerEvent, SocketRunRequest};
use polyglot_sandbox::{forward_streams, ExecutionRequest, SandboxError, SessionState, RUN_TAGS};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Outbound events buffered per connection
const EVENT_BUFFER: usize = 256;

/// Handle `GET /ws`
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let id = ConnectionId::new();
    info!(connection = %id, "WebSocket connection established");

    let (mut sender, mut receiver) = socket.split();
    let (events_tx, mut events_rx) = mpsc::channel::<ServerEvent>(EVENT_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to serialize event: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let connection = Connection::new(id, state.clone(), events_tx.clone());
    let worker = tokio::spawn(connection.serve(commands_rx));

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                dispatch(&text, id, &state, &events_tx, &commands_tx).await
            }
            Ok(Message::Close(_)) => {
                debug!(connection = %id, "Close frame received");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(connection = %id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    drop(commands_tx);
    state.service.sessions().disconnect(id).await;
    writer.abort();
    info!(connection = %id, "WebSocket connection closed");

    // A start still queued or in flight can finish after the sweep above
    let service = state.service.clone();
    tokio::spawn(async move {
        let _ = worker.await;
        service.sessions().disconnect(id).await;
    });
}

fn parse_message(text: &str) -> Result<ClientMessage, ServerEvent> {
    serde_json::from_str(text).map_err(|e| ServerEvent::error("invalid_message", e.to_string()))
}

/// Route one inbound frame without waiting on session work.
async fn dispatch(
    text: &str,
    id: ConnectionId,
    state: &AppState,
    events: &mpsc::Sender<ServerEvent>,
    commands: &mpsc::UnboundedSender<ClientMessage>,
) {
    let message = match parse_message(text) {
        Ok(message) => message,
        Err(event) => {
            debug!(connection = %id, "Unparseable message");
            let _ = events.send(event).await;
            return;
        }
    };

    match message {
        ClientMessage::Run(request) => spawn_run(state, events.clone(), id, request),
        ClientMessage::StopRepl(target) => {
            // A start still waiting on its image is cancelled at once; anything
            // else is stopped in order behind the commands queued before it
            let sessions = state.service.sessions();
            if sessions.state(&target.language_id).await == SessionState::Starting {
                let _ = sessions.stop_repl(&target.language_id).await;
                debug!(
                    connection = %id,
                    language = %target.language_id,
                    "Pending start cancelled"
                );
            }
            let _ = commands.send(ClientMessage::StopRepl(target));
        }
        other => {
            let _ = commands.send(other);
        }
    }
}

/// Runs in the background so the connection keeps reading while the
/// image is pulled.
fn spawn_run(
    state: &AppState,
    sink: mpsc::Sender<ServerEvent>,
    connection: ConnectionId,
    request: SocketRunRequest,
) {
    let service = state.service.clone();

    tokio::spawn(async move {
        let language_id = request.language.id;
        let execution = ExecutionRequest::new(&language_id, request.filename, request.content);
        let streams = match service.prepare_run(execution).await {
            Ok(streams) => streams,
            Err(e) => {
                warn!(connection = %connection, language = %language_id, "Run rejected: {}", e);
                let _ = sink.send(error_event(&e)).await;
                return;
            }
        };

        let exit = streams.exit;
        forward_streams(streams.stdout, streams.stderr, RUN_TAGS, sink)
            .finished()
            .await;
        if let Ok(report) = exit.await {
            info!(
                connection = %connection,
                language = %language_id,
                exit_code = report.exit_code,
                duration_ms = report.duration_ms,
                "Run finished"
            );
        }
    });
}

/// Per-connection REPL state, driven by the worker task
struct Connection {
    id: ConnectionId,
    state: AppState,
    events: mpsc::Sender<ServerEvent>,
    /// Language of the REPL this connection started last; untargeted
    /// `repl_in` goes there
    active_repl: Option<String>,
}

impl Connection {
    fn new(id: ConnectionId, state: AppState, events: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            id,
            state,
            events,
            active_repl: None,
        }
    }

    async fn serve(mut self, mut commands: mpsc::UnboundedReceiver<ClientMessage>) {
        while let Some(message) = commands.recv().await {
            self.handle(message).await;
        }
    }

    async fn handle(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::Run(request) => {
                spawn_run(&self.state, self.events.clone(), self.id, request)
            }
            ClientMessage::StartRepl(target) => self.start_repl(target.language_id).await,
            ClientMessage::ReplIn(input) => self.repl_in(input).await,
            ClientMessage::StopRepl(target) => self.stop_repl(&target.language_id).await,
        }
    }

    async fn start_repl(&mut self, language_id: String) {
        let result = self
            .state
            .service
            .sessions()
            .start_repl(&language_id, self.id, self.events.clone())
            .await;
        match result {
            Ok(_) => self.active_repl = Some(language_id),
            Err(e) => {
                warn!(connection = %self.id, language = %language_id, "REPL start failed: {}", e);
                self.send(error_event(&e)).await;
            }
        }
    }

    async fn repl_in(&mut self, input: ReplInput) {
        let sessions = self.state.service.sessions();
        let (language_id, result) = match input {
            ReplInput::Targeted { language_id, data } => {
                let result = sessions.write(&language_id, data.as_bytes()).await;
                (language_id, result)
            }
            ReplInput::Text(data) => {
                let Some(language_id) = self.active_repl.clone() else {
                    self.send_error("session_not_running", "no active REPL on this connection")
                        .await;
                    return;
                };
                let result = sessions
                    .write_owned(&language_id, self.id, data.as_bytes())
                    .await;
                // Replaced by another connection or exited
                if let Err(SandboxError::SessionNotRunning(_)) = result {
                    self.active_repl = None;
                }
                (language_id, result)
            }
        };

        if let Err(e) = result {
            debug!(connection = %self.id, language = %language_id, "REPL input dropped: {}", e);
            self.send(error_event(&e)).await;
        }
    }

    async fn stop_repl(&mut self, language_id: &str) {
        if self.active_repl.as_deref() == Some(language_id) {
            self.active_repl = None;
        }
        match self.state.service.sessions().stop_repl(language_id).await {
            Ok(stopped) => debug!(connection = %self.id, language = %language_id, stopped, "stopRepl"),
            Err(e) => self.send(error_event(&e)).await,
        }
    }

    async fn send(&self, event: ServerEvent) {
        let _ = self.events.send(event).await;
    }

    async fn send_error(&self, kind: &str, message: impl Into<String>) {
        self.send(ServerEvent::error(kind, message)).await;
    }
}

fn error_event(err: &SandboxError) -> ServerEvent {
    ServerEvent::error(err.kind(), err.to_string())
}
