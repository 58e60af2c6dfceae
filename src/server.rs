//! JSON HTTP API over the control plane and the inference reader.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/entities` | Registered entities |
//! | `POST` | `/ensure` | Run `ensure_fresh` for one entity |
//! | `POST` | `/retrieve` | Read-only retrieval for one ticker |
//! | `POST` | `/orchestrate` | Ensure, then retrieve |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "unresolved_entity", "message": "unresolved entity 'XYZ': ..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `unresolved_entity` (404),
//! `embeddings_disabled` (400), `timeout` (408), `all_components_failed` (502),
//! `index_error` (502), `fetch_failed` (502), `storage_unavailable` (503),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use ticker_mirror_core::models::{DataCategory, Entity, ExternalId};
use ticker_mirror_core::outcome::OrchestrationResult;
use ticker_mirror_core::Error;

use crate::config::Config;
use crate::orchestrate::{checklist_from, OrchestrationReport, Orchestrator};
use crate::pipeline::deadline_after;
use crate::reader::RetrievalResult;

#[derive(Clone)]
struct AppState {
    orchestrator: Orchestrator,
    default_top_k: usize,
}

/// Serve until the process is terminated.
pub async fn run_server(config: &Config, orchestrator: Orchestrator) -> anyhow::Result<()> {
    let state = Arc::new(AppState {
        orchestrator,
        default_top_k: config.retrieval.top_k,
    });
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "listening");
    println!("Ticker Mirror listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;
    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/entities", get(handle_entities))
        .route("/ensure", post(handle_ensure))
        .route("/retrieve", post(handle_retrieve))
        .route("/orchestrate", post(handle_orchestrate))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let message = err.detail();
        let (status, code) = match &err {
            Error::UnresolvedEntity { .. } => (StatusCode::NOT_FOUND, "unresolved_entity"),
            Error::UnknownComponent(_) | Error::InvalidMaxAge { .. } => {
                (StatusCode::BAD_REQUEST, "bad_request")
            }
            Error::StorageUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable")
            }
            Error::Timeout { .. } => (StatusCode::REQUEST_TIMEOUT, "timeout"),
            Error::Embedding { .. } if message.contains("disabled") => {
                (StatusCode::BAD_REQUEST, "embeddings_disabled")
            }
            Error::AllComponentsFailed { .. } => (StatusCode::BAD_GATEWAY, "all_components_failed"),
            Error::Index { .. } => (StatusCode::BAD_GATEWAY, "index_error"),
            Error::FetchFailed { .. } => (StatusCode::BAD_GATEWAY, "fetch_failed"),
            Error::Embedding { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        AppError {
            status,
            code,
            message,
        }
    }
}

fn external_id(
    ticker: &str,
    cik: Option<String>,
    scrip_code: Option<String>,
) -> Result<Option<ExternalId>, AppError> {
    Ok(ExternalId::from_parts(ticker, cik, scrip_code)?)
}

fn request_deadline(timeout_secs: Option<u64>) -> Result<Option<Instant>, AppError> {
    timeout_secs
        .map(|secs| {
            deadline_after(secs)
                .ok_or_else(|| bad_request(format!("timeout_secs {} is out of range", secs)))
        })
        .transpose()
}

fn parse_category(category: Option<&str>) -> Result<Option<DataCategory>, AppError> {
    category
        .map(|c| c.parse::<DataCategory>().map_err(bad_request))
        .transpose()
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /entities ============

#[derive(Serialize)]
struct EntitiesResponse {
    entities: Vec<Entity>,
}

async fn handle_entities(State(state): State<Arc<AppState>>) -> Json<EntitiesResponse> {
    let entities = state
        .orchestrator
        .control()
        .registry()
        .entities()
        .cloned()
        .collect();
    Json(EntitiesResponse { entities })
}

// ============ POST /ensure ============

#[derive(Deserialize)]
struct EnsureRequest {
    ticker: String,
    #[serde(default)]
    components: Vec<String>,
    #[serde(default)]
    unstructured: Option<bool>,
    #[serde(default)]
    force_refresh: bool,
    #[serde(default)]
    cik: Option<String>,
    #[serde(default)]
    scrip_code: Option<String>,
    /// Overall deadline for the call.
    #[serde(default)]
    timeout_secs: Option<u64>,
}

async fn handle_ensure(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EnsureRequest>,
) -> Result<Json<OrchestrationResult>, AppError> {
    let checklist = checklist_from(&req.components, req.unstructured)?;
    let external = external_id(&req.ticker, req.cik, req.scrip_code)?;
    let deadline = request_deadline(req.timeout_secs)?;

    let result = state
        .orchestrator
        .control()
        .ensure_fresh(
            &req.ticker,
            &checklist,
            req.force_refresh,
            external.as_ref(),
            deadline,
        )
        .await?;
    Ok(Json(result))
}

// ============ POST /retrieve ============

#[derive(Deserialize)]
struct RetrieveRequest {
    ticker: String,
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
    /// `narrative` or `narrated_numeric`.
    #[serde(default)]
    category: Option<String>,
}

#[derive(Serialize)]
struct RetrieveResponse {
    #[serde(flatten)]
    result: RetrievalResult,
    context: String,
}

async fn handle_retrieve(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RetrieveRequest>,
) -> Result<Json<RetrieveResponse>, AppError> {
    let category = parse_category(req.category.as_deref())?;
    let top_k = req.top_k.unwrap_or(state.default_top_k);

    let result = state
        .orchestrator
        .reader()
        .retrieve(&req.ticker, &req.query, top_k, category)
        .await?;
    let context = result.context(state.orchestrator.max_context_chars());
    Ok(Json(RetrieveResponse { result, context }))
}

// ============ POST /orchestrate ============

#[derive(Deserialize)]
struct OrchestrateRequest {
    ticker: String,
    query: String,
    #[serde(default)]
    components: Vec<String>,
    #[serde(default)]
    unstructured: Option<bool>,
    #[serde(default)]
    force_refresh: bool,
    #[serde(default)]
    cik: Option<String>,
    #[serde(default)]
    scrip_code: Option<String>,
    #[serde(default)]
    top_k: Option<usize>,
}

async fn handle_orchestrate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OrchestrateRequest>,
) -> Result<Json<OrchestrationReport>, AppError> {
    let checklist = checklist_from(&req.components, req.unstructured)?;
    let external = external_id(&req.ticker, req.cik, req.scrip_code)?;
    let top_k = req.top_k.unwrap_or(state.default_top_k);

    let report = state
        .orchestrator
        .orchestrate(
            &req.ticker,
            &req.query,
            &checklist,
            req.force_refresh,
            external.as_ref(),
            top_k,
        )
        .await?;
    Ok(Json(report))
}
