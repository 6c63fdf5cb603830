//! Error taxonomy for execution and session orchestration

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the orchestration core.
///
/// Every variant is terminal for the request that triggered it; nothing in the
/// core retries on its own.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Unknown language '{0}'")]
    UnknownLanguage(String),

    #[error("Failed to pull image '{image}': {reason}")]
    ImagePullFailed { image: String, reason: String },

    #[error("Language '{0}' does not support interactive sessions")]
    UnsupportedOperation(String),

    #[error("Failed to start process: {0}")]
    ProcessSpawnFailed(String),

    #[error("Failed to write source file '{}': {source}", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Source content is not valid base64: {0}")]
    InvalidSource(#[from] base64::DecodeError),

    #[error("Invalid filename '{0}'")]
    InvalidFilename(String),

    #[error("No running session for language '{0}'")]
    SessionNotRunning(String),

    #[error("Runtime provider error: {0}")]
    Provider(String),

    #[error("Invalid language configuration: {0}")]
    Config(String),
}

impl SandboxError {
    /// Stable identifier used in error envelopes sent to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            SandboxError::UnknownLanguage(_) => "unknown_language",
            SandboxError::ImagePullFailed { .. } => "image_pull_failed",
            SandboxError::UnsupportedOperation(_) => "unsupported_operation",
            SandboxError::ProcessSpawnFailed(_) => "process_spawn_failed",
            SandboxError::WriteFailed { .. } => "write_failed",
            SandboxError::InvalidSource(_) => "invalid_source",
            SandboxError::InvalidFilename(_) => "invalid_filename",
            SandboxError::SessionNotRunning(_) => "session_not_running",
            SandboxError::Provider(_) => "provider_error",
            SandboxError::Config(_) => "config_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;
