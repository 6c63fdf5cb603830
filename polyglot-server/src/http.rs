//! HTTP API
//!
//! `POST /run/{languageId}` streams the output of a one-shot run as a plain
//! text body; the other routes serve discovery data.

use crate::samples::CodeSamples;
use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::stream::{self, StreamExt};
use polyglot_common::{CodeSampleResponse, ErrorEnvelope, ErrorPayload, PublicLanguage, RunRequest};
use polyglot_sandbox::{select_response_stream, ExecutionRequest, SandboxError, SandboxService};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

/// Shared state for all routes
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SandboxService>,
    pub samples: Arc<CodeSamples>,
}

impl AppState {
    pub fn new(service: SandboxService, samples: CodeSamples) -> Self {
        Self {
            service: Arc::new(service),
            samples: Arc::new(samples),
        }
    }
}

/// Error response carrying the JSON error envelope
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    payload: ErrorPayload,
}

impl ApiError {
    pub fn not_found(kind: &str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            payload: ErrorPayload::new(kind, message),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

/// HTTP status for a sandbox failure
pub fn status_for(err: &SandboxError) -> StatusCode {
    match err {
        SandboxError::UnknownLanguage(_) => StatusCode::NOT_FOUND,
        SandboxError::InvalidSource(_)
        | SandboxError::InvalidFilename(_)
        | SandboxError::UnsupportedOperation(_) => StatusCode::BAD_REQUEST,
        SandboxError::ImagePullFailed { .. } => StatusCode::BAD_GATEWAY,
        SandboxError::SessionNotRunning(_) => StatusCode::CONFLICT,
        SandboxError::WriteFailed { .. }
        | SandboxError::ProcessSpawnFailed(_)
        | SandboxError::Provider(_)
        | SandboxError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<SandboxError> for ApiError {
    fn from(err: SandboxError) -> Self {
        Self {
            status: status_for(&err),
            payload: ErrorPayload::new(err.kind(), err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorEnvelope {
            error: self.payload,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Handle `POST /run/{languageId}`.
///
/// The body carries exactly one of the process's streams: whichever produced
/// data first.
pub async fn run_code(
    State(state): State<AppState>,
    Path(language_id): Path<String>,
    Json(body): Json<RunRequest>,
) -> Result<Response, ApiError> {
    let request = ExecutionRequest::new(&language_id, body.filename, body.content);
    let streams = state.service.prepare_run(request).await.map_err(|e| {
        warn!(language = %language_id, "Run rejected: {}", e);
        ApiError::from(e)
    })?;

    let mut selected = select_response_stream(streams).await;
    debug!(language = %language_id, source = ?selected.source(), "Streaming response");

    if let Some(exit) = selected.take_exit() {
        let language_id = language_id.clone();
        tokio::spawn(async move {
            if let Ok(report) = exit.await {
                info!(
                    language = %language_id,
                    exit_code = report.exit_code,
                    duration_ms = report.duration_ms,
                    "Run finished"
                );
            }
        });
    }

    let (first, rest) = selected.into_parts();
    let chunks = stream::iter(first)
        .chain(ReceiverStream::new(rest))
        .map(|chunk| Ok::<_, Infallible>(Bytes::from(chunk)));

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(chunks),
    )
        .into_response())
}

/// Handle `GET /languages`
pub async fn list_languages(State(state): State<AppState>) -> Json<Vec<PublicLanguage>> {
    Json(state.service.languages())
}

/// Handle `GET /codesample/{languageId}`
pub async fn code_sample(
    State(state): State<AppState>,
    Path(language_id): Path<String>,
) -> Result<Json<CodeSampleResponse>, ApiError> {
    let spec = state.service.registry().lookup(&language_id)?;
    let base64encodedsample = state.samples.encoded_sample(spec).await.map_err(|e| {
        debug!(language = %language_id, "No code sample: {:#}", e);
        ApiError::not_found("sample_not_found", format!("no code sample for '{}'", language_id))
    })?;
    Ok(Json(CodeSampleResponse {
        base64encodedsample,
    }))
}

/// Handle `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "provider": state.service.provider_name(),
    }))
}
