//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/start-job` | Validate and enqueue a generation job (202) |
//! | `POST` | `/fetch-patterns` | Suggest include/exclude globs for a GitHub repo |
//! | `GET`  | `/output-structure/{repo_name}` | Chapter/lesson tree of a tutorial |
//! | `GET`  | `/output-content/{repo_name}/{*file_path}` | One tutorial file |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Errors are flat JSON objects; `details` is present only when there is
//! something useful to add:
//!
//! ```json
//! { "error": "GitHub API error: 404", "details": "Not Found" }
//! ```
//!
//! Internal failures are written to the error sink before the 500 is
//! returned. Client mistakes and missing resources are not.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the browser frontend
//! can be served from a different origin.

use std::future::Future;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

use crate::artifacts::ArtifactRepository;
use crate::config::Config;
use crate::error::TutorError;
use crate::error_sink::ErrorSink;
use crate::github::{parse_github_url, GithubClient};
use crate::jobs::validate_submission;
use crate::models::{ArtifactTree, PatternSuggestion};
use crate::patterns::suggest_patterns;
use crate::queue::{JobQueue, SqliteJobQueue};
use crate::store::open_store;

/// Shared handles passed to every route handler.
#[derive(Clone)]
pub struct AppState {
    queue: Arc<dyn JobQueue>,
    artifacts: ArtifactRepository,
    errors: ErrorSink,
    github: Arc<GithubClient>,
}

impl AppState {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        artifacts: ArtifactRepository,
        errors: ErrorSink,
        github: Arc<GithubClient>,
    ) -> Self {
        Self {
            queue,
            artifacts,
            errors,
            github,
        }
    }

    /// Open the queue, both store namespaces and the GitHub client from
    /// configuration.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let queue = SqliteJobQueue::connect(config).await?;
        let artifacts = open_store(config, &config.storage.artifacts_namespace)?;
        let errors = open_store(config, &config.storage.errors_namespace)?;
        Ok(Self::new(
            Arc::new(queue),
            ArtifactRepository::new(artifacts),
            ErrorSink::new(errors),
            Arc::new(GithubClient::new(&config.github)?),
        ))
    }

    /// Convert a service error into a response, recording internal
    /// failures. `internal` replaces the message of 500s.
    async fn reject(&self, err: TutorError, internal: &str) -> AppError {
        match err {
            TutorError::ClientInput(message) => AppError::new(StatusCode::BAD_REQUEST, message),
            TutorError::NotFound(message) => AppError::new(StatusCode::NOT_FOUND, message),
            TutorError::Upstream {
                status,
                message,
                details,
            } => AppError {
                status: StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
                error: message,
                details: Some(details),
            },
            err @ (TutorError::Transient(_) | TutorError::Generation(_)) => {
                let text = match &err {
                    TutorError::Transient(inner) => format!("{:#}", inner),
                    other => other.to_string(),
                };
                tracing::error!(kind = err.kind(), error = %text, "{}", internal);
                self.errors.record(format!("{}: {}", internal, text)).await;
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    error: internal.to_string(),
                    details: Some(text),
                }
            }
        }
    }
}

/// Build the router with all routes and the CORS layer.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/start-job", post(handle_start_job))
        .route("/fetch-patterns", post(handle_fetch_patterns))
        .route("/output-structure/{repo_name}", get(handle_output_structure))
        .route(
            "/output-content/{repo_name}/{*file_path}",
            get(handle_output_content),
        )
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config).await?;
    serve(config, state, std::future::pending()).await
}

/// Serve `state` on `[server].bind` until `shutdown` resolves.
pub async fn serve(
    config: &Config,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "HTTP server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

struct AppError {
    status: StatusCode,
    error: String,
    details: Option<String>,
}

impl AppError {
    fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            details: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.error,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

// ============ POST /start-job ============

/// Validates the body and enqueues it unchanged. Nothing is enqueued when
/// validation fails.
async fn handle_start_job(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), AppError> {
    if let Err(e) = validate_submission(&body) {
        return Err(state.reject(e, "Failed to enqueue job").await);
    }
    let payload = std::str::from_utf8(&body)
        .map_err(|_| AppError::new(StatusCode::BAD_REQUEST, "Invalid JSON"))?;

    match state.queue.send(payload).await {
        Ok(id) => {
            tracing::info!(id = %id, "job accepted");
            Ok((
                StatusCode::ACCEPTED,
                Json(json!({ "message": "Job accepted." })),
            ))
        }
        Err(e) => Err(state
            .reject(TutorError::Transient(e), "Failed to enqueue job")
            .await),
    }
}

// ============ POST /fetch-patterns ============

#[derive(Serialize)]
struct PatternsResponse {
    patterns: Vec<PatternSuggestion>,
    file_count: usize,
}

async fn handle_fetch_patterns(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<PatternsResponse>, AppError> {
    match fetch_patterns(&state, &body).await {
        Ok(response) => Ok(Json(response)),
        Err(e) => Err(state.reject(e, "Failed to fetch repository files").await),
    }
}

async fn fetch_patterns(state: &AppState, body: &[u8]) -> Result<PatternsResponse, TutorError> {
    let request: serde_json::Map<String, Value> = serde_json::from_slice(body)
        .ok()
        .filter(|map: &serde_json::Map<String, Value>| !map.is_empty())
        .ok_or_else(|| TutorError::client("Invalid JSON"))?;

    let repo_url = match request.get("repo_url") {
        Some(Value::String(url)) if !url.is_empty() => url.as_str(),
        _ => return Err(TutorError::client("Missing repository URL")),
    };
    let token = request.get("github_token").and_then(Value::as_str);

    let slug = parse_github_url(repo_url)?;
    let files = state.github.list_files(&slug, token).await?;
    let patterns = suggest_patterns(&files);

    tracing::info!(
        owner = %slug.owner,
        repo = %slug.repo,
        files = files.len(),
        suggestions = patterns.len(),
        "analyzed repository tree"
    );

    Ok(PatternsResponse {
        patterns,
        file_count: files.len(),
    })
}

// ============ GET /output-structure/{repo_name} ============

async fn handle_output_structure(
    State(state): State<AppState>,
    Path(repo_name): Path<String>,
) -> Result<Json<ArtifactTree>, AppError> {
    match state.artifacts.structure(&repo_name).await {
        Ok(tree) => Ok(Json(tree)),
        Err(e) => Err(state.reject(e, "Failed to read tutorial structure").await),
    }
}

// ============ GET /output-content/{repo_name}/{*file_path} ============

#[derive(Serialize)]
struct ContentResponse {
    content: String,
}

async fn handle_output_content(
    State(state): State<AppState>,
    Path((repo_name, file_path)): Path<(String, String)>,
) -> Result<Json<ContentResponse>, AppError> {
    match state.artifacts.content(&repo_name, &file_path).await {
        Ok(content) => Ok(Json(ContentResponse { content })),
        Err(e) => Err(state.reject(e, "Failed to read file content").await),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    /// Always `"ok"` when the server is running.
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
