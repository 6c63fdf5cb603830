//! Sandbox service - main entry point

use crate::command::build_run_command;
use crate::error::Result;
use crate::image::ImageManager;
use crate::launcher::{Launcher, DEFAULT_WORKDIR};
use crate::registry::LanguageRegistry;
use crate::runtime::RuntimeProvider;
use crate::session::SessionManager;
use crate::source::SourceMaterializer;
use crate::types::{ExecutionRequest, ProcessStreams};
use polyglot_common::PublicLanguage;
use std::path::PathBuf;
use std::sync::Arc;

/// Where submissions land and where they appear inside the process
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub runtime_dir: PathBuf,
    pub workdir: String,
}

impl SandboxConfig {
    pub fn new(runtime_dir: impl Into<PathBuf>) -> Self {
        Self {
            runtime_dir: runtime_dir.into(),
            workdir: DEFAULT_WORKDIR.to_string(),
        }
    }

    pub fn with_workdir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = workdir.into();
        self
    }
}

/// One-shot runs and interactive sessions over a single runtime provider
pub struct SandboxService {
    registry: Arc<LanguageRegistry>,
    provider: Arc<dyn RuntimeProvider>,
    images: ImageManager,
    sources: SourceMaterializer,
    launcher: Launcher,
    sessions: SessionManager,
}

impl SandboxService {
    /// Create a service; fails if the runtime directory cannot be created.
    pub fn new(
        registry: LanguageRegistry,
        provider: impl RuntimeProvider + 'static,
        config: SandboxConfig,
    ) -> Result<Self> {
        Self::with_provider(Arc::new(registry), Arc::new(provider), config)
    }

    pub fn with_provider(
        registry: Arc<LanguageRegistry>,
        provider: Arc<dyn RuntimeProvider>,
        config: SandboxConfig,
    ) -> Result<Self> {
        let images = ImageManager::new(provider.clone());
        let sources = SourceMaterializer::new(&config.runtime_dir)?;
        let launcher = Launcher::with_workdir(provider.clone(), config.workdir);
        let sessions = SessionManager::new(registry.clone(), images.clone(), provider.clone());

        tracing::info!(
            provider = provider.name(),
            runtime_dir = %sources.mount_dir().display(),
            languages = registry.len(),
            "Sandbox service ready"
        );

        Ok(Self {
            registry,
            provider,
            images,
            sources,
            launcher,
            sessions,
        })
    }

    /// Run a source file once.
    ///
    /// Lookup, command building, image availability, materialization and
    /// launch happen in that order; the first failure ends the request.
    /// Resolves once the process has started.
    pub async fn prepare_run(&self, request: ExecutionRequest) -> Result<ProcessStreams> {
        let spec = self.registry.lookup(&request.language_id)?;
        let command = build_run_command(spec, &request.filename);

        tracing::info!(
            language = %spec.id,
            filename = %request.filename,
            code_len = request.content.len(),
            "Preparing run"
        );

        self.images.ensure_available(&spec.image).await?;
        self.sources
            .materialize(&request.filename, &request.content)
            .await?;
        self.launcher
            .launch(&spec.image, &command, self.sources.mount_dir())
            .await
    }

    /// Public listing of every configured language, in configuration order
    pub fn languages(&self) -> Vec<PublicLanguage> {
        self.registry.list_public()
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }
}
