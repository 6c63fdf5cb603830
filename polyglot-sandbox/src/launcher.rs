//! Starts one-shot isolated processes

use crate::error::Result;
use crate::runtime::RuntimeProvider;
use crate::types::{EphemeralRun, ProcessStreams};
use std::path::Path;
use std::sync::Arc;

/// Default path the source directory is mounted under
pub const DEFAULT_WORKDIR: &str = "/usr/src/myapp";

/// Fire-and-forget launcher for one-shot runs
#[derive(Clone)]
pub struct Launcher {
    provider: Arc<dyn RuntimeProvider>,
    workdir: String,
}

impl Launcher {
    pub fn new(provider: Arc<dyn RuntimeProvider>) -> Self {
        Self::with_workdir(provider, DEFAULT_WORKDIR)
    }

    pub fn with_workdir(provider: Arc<dyn RuntimeProvider>, workdir: impl Into<String>) -> Self {
        Self {
            provider,
            workdir: workdir.into(),
        }
    }

    /// Start `command` under `sh -c` in an auto-removed process of `image`,
    /// with `mount_dir` as its working directory.
    ///
    /// Returns as soon as the process is started; never waits for exit.
    /// Failures inside the runtime (unknown image, bad mount) appear as
    /// stderr output rather than as an error here.
    pub async fn launch(
        &self,
        image: &str,
        command: &str,
        mount_dir: &Path,
    ) -> Result<ProcessStreams> {
        tracing::info!(
            image = %image,
            provider = self.provider.name(),
            command = %command,
            "Launching process"
        );

        self.provider
            .run_ephemeral(EphemeralRun {
                image: image.to_string(),
                mount_dir: mount_dir.to_path_buf(),
                workdir: self.workdir.clone(),
                command: command.to_string(),
            })
            .await
    }
}
