//! Routes process output back to the caller that started it

use crate::types::{ExitReport, ProcessStreams};
use polyglot_common::{ServerEvent, StreamTag};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Event tags for a stdout/stderr pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamTags {
    pub stdout: StreamTag,
    pub stderr: StreamTag,
}

/// Tags for streamed one-shot runs
pub const RUN_TAGS: StreamTags = StreamTags {
    stdout: StreamTag::StdoutStream,
    stderr: StreamTag::StderrStream,
};

/// Tags for interactive sessions
pub const REPL_TAGS: StreamTags = StreamTags {
    stdout: StreamTag::ReplOut,
    stderr: StreamTag::ReplErr,
};

/// Which stream a buffered response carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

/// Exactly one of a process's output streams, ready to be piped into a
/// response body.
pub struct ResponseStream {
    source: StreamSource,
    first: Option<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
    exit: Option<oneshot::Receiver<ExitReport>>,
}

impl ResponseStream {
    pub fn source(&self) -> StreamSource {
        self.source
    }

    pub async fn next_chunk(&mut self) -> Option<Vec<u8>> {
        match self.first.take() {
            Some(chunk) => Some(chunk),
            None => self.rx.recv().await,
        }
    }

    /// Exit report of the process; `None` once taken
    pub fn take_exit(&mut self) -> Option<oneshot::Receiver<ExitReport>> {
        self.exit.take()
    }

    /// First chunk (if any) and the receiver for the rest
    pub fn into_parts(self) -> (Option<Vec<u8>>, mpsc::Receiver<Vec<u8>>) {
        (self.first, self.rx)
    }
}

/// Pick the stream that produces data first; the other is discarded.
///
/// Stdout wins when both are ready at once, and is returned (empty) when
/// neither produces anything. The chosen stream is never interleaved with
/// the other.
pub async fn select_response_stream(streams: ProcessStreams) -> ResponseStream {
    let ProcessStreams {
        mut stdout,
        mut stderr,
        exit,
    } = streams;
    let mut stdout_open = true;
    let mut stderr_open = true;

    while stdout_open || stderr_open {
        tokio::select! {
            biased;
            chunk = stdout.recv(), if stdout_open => match chunk {
                Some(chunk) => {
                    return ResponseStream {
                        source: StreamSource::Stdout,
                        first: Some(chunk),
                        rx: stdout,
                        exit: Some(exit),
                    };
                }
                None => stdout_open = false,
            },
            chunk = stderr.recv(), if stderr_open => match chunk {
                Some(chunk) => {
                    return ResponseStream {
                        source: StreamSource::Stderr,
                        first: Some(chunk),
                        rx: stderr,
                        exit: Some(exit),
                    };
                }
                None => stderr_open = false,
            },
        }
    }

    ResponseStream {
        source: StreamSource::Stdout,
        first: None,
        rx: stdout,
        exit: Some(exit),
    }
}

/// Data listeners attached to a process's streams
#[derive(Debug, Default)]
pub struct ListenerSet {
    handles: Vec<JoinHandle<()>>,
}

impl ListenerSet {
    /// Stop forwarding; chunks not yet delivered are dropped.
    pub fn detach(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }

    pub fn is_attached(&self) -> bool {
        self.handles.iter().any(|h| !h.is_finished())
    }

    /// Wait until both streams have ended.
    pub async fn finished(mut self) {
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
    }
}

/// Forward each chunk of both streams to `sink` as a tagged event.
///
/// One listener per stream keeps that stream's chunks in arrival order;
/// stdout and stderr chunks are not ordered relative to each other.
pub fn forward_streams(
    stdout: mpsc::Receiver<Vec<u8>>,
    stderr: mpsc::Receiver<Vec<u8>>,
    tags: StreamTags,
    sink: mpsc::Sender<ServerEvent>,
) -> ListenerSet {
    ListenerSet {
        handles: vec![
            tokio::spawn(forward(stdout, tags.stdout, sink.clone())),
            tokio::spawn(forward(stderr, tags.stderr, sink)),
        ],
    }
}

async fn forward(
    mut rx: mpsc::Receiver<Vec<u8>>,
    tag: StreamTag,
    sink: mpsc::Sender<ServerEvent>,
) {
    // Bytes of a character split across reads wait here for the rest of it
    let mut pending: Vec<u8> = Vec::new();
    while let Some(chunk) = rx.recv().await {
        tracing::trace!(tag = %tag, bytes = chunk.len(), "Forwarding chunk");
        pending.extend_from_slice(&chunk);
        let complete = complete_utf8_len(&pending);
        if complete == 0 {
            continue;
        }
        let rest = pending.split_off(complete);
        let text = std::mem::replace(&mut pending, rest);
        if sink.send(ServerEvent::output(tag, &text)).await.is_err() {
            tracing::debug!(tag = %tag, "Caller gone, dropping listener");
            return;
        }
    }
    if !pending.is_empty() {
        let _ = sink.send(ServerEvent::output(tag, &pending)).await;
    }
}

/// Length of the prefix of `buf` that does not end inside a UTF-8 sequence.
///
/// Invalid bytes are not held back; they are replaced when the chunk is sent.
fn complete_utf8_len(buf: &[u8]) -> usize {
    match std::str::from_utf8(buf) {
        Ok(_) => buf.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(_) => buf.len(),
    }
}
