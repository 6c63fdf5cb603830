//! HTTP request and response bodies

use serde::{Deserialize, Serialize};

/// Body of `POST /run/{languageId}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    /// Target filename, including the language's extension
    pub filename: String,
    /// Base64-encoded source code
    pub content: String,
}

/// One entry of `GET /languages`.
///
/// Only the fields a client needs for discovery; image names and command
/// templates stay on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicLanguage {
    pub id: String,
    pub name: String,
    pub extension: String,
    /// Whether an interactive session can be started for this language
    pub repl: bool,
}

/// Body of `GET /codesample/{languageId}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeSampleResponse {
    pub base64encodedsample: String,
}

/// Error details carried by HTTP error responses and `error` socket events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Stable machine-readable error kind, e.g. `unknown_language`
    pub kind: String,
    pub message: String,
}

impl ErrorPayload {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// JSON envelope for failed HTTP requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorPayload,
}
