//! Persistent-connection protocol.
//!
//! Every WebSocket frame is a JSON object `{"event": <name>, "data": <payload>}`.
//! Event names match the original socket protocol so existing clients only need
//! to swap the transport.

use crate::ErrorPayload;
use serde::{Deserialize, Serialize};

/// Reference to a language inside a `run` message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageRef {
    pub id: String,
}

/// Payload of the `run` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketRunRequest {
    pub language: LanguageRef,
    pub filename: String,
    /// Base64-encoded source code
    pub content: String,
}

/// Payload of `startRepl` and `stopRepl`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplTarget {
    #[serde(rename = "languageId")]
    pub language_id: String,
}

/// Payload of `repl_in`: raw text for the connection's active session, or
/// text addressed to a specific language's session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReplInput {
    Text(String),
    Targeted {
        #[serde(rename = "languageId")]
        language_id: String,
        data: String,
    },
}

/// Client → server messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "run")]
    Run(SocketRunRequest),
    #[serde(rename = "startRepl")]
    StartRepl(ReplTarget),
    #[serde(rename = "repl_in")]
    ReplIn(ReplInput),
    #[serde(rename = "stopRepl")]
    StopRepl(ReplTarget),
}

/// Which stream a forwarded output chunk came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamTag {
    #[serde(rename = "stdout_stream")]
    StdoutStream,
    #[serde(rename = "stderr_stream")]
    StderrStream,
    #[serde(rename = "repl_out")]
    ReplOut,
    #[serde(rename = "repl_err")]
    ReplErr,
}

impl StreamTag {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamTag::StdoutStream => "stdout_stream",
            StreamTag::StderrStream => "stderr_stream",
            StreamTag::ReplOut => "repl_out",
            StreamTag::ReplErr => "repl_err",
        }
    }
}

impl std::fmt::Display for StreamTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server → client messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "stdout_stream")]
    StdoutStream(String),
    #[serde(rename = "stderr_stream")]
    StderrStream(String),
    #[serde(rename = "repl_out")]
    ReplOut(String),
    #[serde(rename = "repl_err")]
    ReplErr(String),
    #[serde(rename = "error")]
    Error(ErrorPayload),
}

impl ServerEvent {
    /// Wrap a raw output chunk in the event matching its stream.
    pub fn output(tag: StreamTag, chunk: &[u8]) -> Self {
        let text = String::from_utf8_lossy(chunk).into_owned();
        match tag {
            StreamTag::StdoutStream => ServerEvent::StdoutStream(text),
            StreamTag::StderrStream => ServerEvent::StderrStream(text),
            StreamTag::ReplOut => ServerEvent::ReplOut(text),
            StreamTag::ReplErr => ServerEvent::ReplErr(text),
        }
    }

    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorPayload::new(kind, message))
    }
}
