//! Polyglot Sandbox - run untrusted code in isolated processes
//!
//! Turns a language id plus base64 source into a started process whose
//! output streams back to the caller, and keeps one interactive session
//! (REPL) per language. Supports multiple runtime backends (docker CLI,
//! plain host processes, a scripted backend for tests).

mod command;
mod error;
mod image;
mod launcher;
mod registry;
mod router;
mod runtime;
mod service;
mod session;
mod source;
mod types;

pub use command::{basename, build_repl_command, build_run_command, BASENAME_PLACEHOLDER};
pub use error::{Result, SandboxError};
pub use image::ImageManager;
pub use launcher::{Launcher, DEFAULT_WORKDIR};
pub use registry::{LanguageRegistry, LanguageSpec};
pub use router::{
    forward_streams, select_response_stream, ListenerSet, ResponseStream, StreamSource,
    StreamTags, REPL_TAGS, RUN_TAGS,
};
pub use runtime::{DockerProvider, HostProvider, RuntimeProvider};
pub use service::{SandboxConfig, SandboxService};
pub use session::{container_name, SessionInfo, SessionManager, SessionState};
pub use source::SourceMaterializer;
pub use types::{
    EphemeralRun, ExecutionRequest, ExitReport, InteractiveProcess, KillSwitch, NamedRun,
    ProcessStreams,
};

/// In-memory provider for tests
#[cfg(any(test, feature = "testing"))]
pub mod testing {
    pub use crate::runtime::{ProviderCall, ScriptedProvider};
}
