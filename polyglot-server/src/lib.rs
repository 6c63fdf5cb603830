use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use polyglot_sandbox::{
    DockerProvider, HostProvider, LanguageRegistry, RuntimeProvider, SandboxConfig,
    SandboxService,
};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub mod config;
pub mod http;
pub mod samples;
pub mod socket;

pub use config::{ProviderConfig, ProviderKind, ServerConfig};
pub use http::{ApiError, AppState};
pub use samples::CodeSamples;

pub struct ServerArgs {
    pub config: Option<PathBuf>,
    pub bind: Option<String>,
    pub provider: Option<ProviderKind>,
    pub verbose: bool,
}

/// Build the HTTP + WebSocket router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/run/:language_id", post(http::run_code))
        .route("/languages", get(http::list_languages))
        .route("/codesample/:language_id", get(http::code_sample))
        .route("/health", get(http::health))
        .route("/ws", get(socket::ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Assemble the sandbox service and samples from a loaded config
pub fn build_state(config: &ServerConfig) -> Result<AppState> {
    let registry = LanguageRegistry::load(&config.languages_file).with_context(|| {
        format!(
            "Failed to load languages from {}",
            config.languages_file.display()
        )
    })?;

    let provider: Arc<dyn RuntimeProvider> = match config.provider.kind {
        ProviderKind::Docker => Arc::new(
            DockerProvider::with_binary(&config.provider.docker_binary)
                .publish_ports(config.provider.publish_ports),
        ),
        ProviderKind::Host => {
            warn!("Host provider runs submitted code directly on this machine, without isolation");
            Arc::new(HostProvider::new())
        }
    };

    let sandbox_config =
        SandboxConfig::new(&config.runtime_dir).with_workdir(&config.provider.workdir);
    let service = SandboxService::with_provider(Arc::new(registry), provider, sandbox_config)
        .context("Failed to initialise sandbox service")?;

    Ok(AppState::new(
        service,
        CodeSamples::new(&config.samples_dir),
    ))
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(listener: tokio::net::TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let bind_addr = listener
        .local_addr()
        .context("Failed to obtain server bind address")?;
    info!("Listening on {}", bind_addr);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server error")?;
    Ok(())
}

pub async fn run_server(args: ServerArgs) -> Result<()> {
    let mut config = ServerConfig::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(kind) = args.provider {
        config.provider.kind = kind;
    }

    // Initialize tracing to both console and file
    let _guard = init_tracing(&config.log_file, args.verbose)?;

    info!("Starting polyglot server");
    info!("Provider: {:?}", config.provider.kind);
    info!("Languages: {}", config.languages_file.display());

    let state = build_state(&config)?;
    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;

    serve(listener, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutting down");
    })
    .await
}

fn init_tracing(
    log_file: &Path,
    verbose: bool,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = if verbose { "debug" } else { "info" };
    let dir = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = log_file
        .file_name()
        .context("log_file must name a file")?;

    let file_appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!(
                    "polyglot_server={},polyglot_sandbox={},polyglot_common={}",
                    log_level, log_level, log_level
                ))
            }),
        )
        .try_init()
        .context("Failed to initialise tracing")?;

    Ok(guard)
}
