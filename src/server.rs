//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Status, version, routing thresholds |
//! | `POST` | `/search` | Hybrid search, returns `{count, results}` |
//! | `POST` | `/run` | Plan, route and record an incident |
//! | `POST` | `/ocr_run` | Multipart image upload, OCR, then `/run` |
//! | `GET`  | `/runs` | Page runs, most recent first |
//! | `GET`  | `/runs/{id}` | Fetch one run |
//! | `POST` | `/runs/{id}/replay` | Re-plan a run's incident as a new run |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "not found: run 42" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `ocr_empty` (422),
//! `dependency_unavailable` (502), `dependency_timeout` (504),
//! `dimension_mismatch` (500), `internal` (500).
//!
//! Malformed JSON bodies, non-numeric path ids and bad query strings are
//! reported as `bad_request` in the same envelope.
//!
//! # Action Status
//!
//! `action_status` is the notification outcome, optionally followed by
//! `; jira_ok` or `; jira_skip` when a ticket was attempted:
//!
//! - `skipped_low_conf`: confidence below `conf_min`, nothing posted
//! - `not_requested`: confidence high enough but `notify` was false
//! - `posted`: Slack confirmed the message
//! - `post_failed`: Slack errored, timed out or is not configured

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        DefaultBodyLimit, Multipart, Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use incident_harness_core::models::{
    format_ts_iso, ActionStatus, ChunkId, IncidentId, NextAction, Plan, Preview, Run, RunId,
    RunQuery, SearchHit,
};
use incident_harness_core::search::SearchFilters;
use incident_harness_core::Error;

use crate::config::Config;
use crate::pipeline::{build_pipeline, Pipeline, RunOptions, RunOutcome};

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/search", post(handle_search))
        .route("/run", post(handle_run))
        .route("/ocr_run", post(handle_ocr_run))
        .route("/runs", get(handle_list_runs))
        .route("/runs/{id}", get(handle_get_run))
        .route("/runs/{id}/replay", post(handle_replay))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and runs until terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = build_pipeline(config).await?;
    let app = router(AppState::new(pipeline));

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(%bind_addr, "HTTP server listening");
    axum::serve(listener, app).await?;

    Ok(())
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

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
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

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let (status, code) = match &err {
            Error::InvalidRequest { .. } => (StatusCode::BAD_REQUEST, "bad_request"),
            Error::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            Error::EmptyExtraction => (StatusCode::UNPROCESSABLE_ENTITY, "ocr_empty"),
            Error::DependencyUnavailable { .. } => (StatusCode::BAD_GATEWAY, "dependency_unavailable"),
            Error::DependencyTimeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "dependency_timeout"),
            Error::DimensionMismatch { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "dimension_mismatch")
            }
            Error::Storage { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    conf_min: f64,
    conf_auto: f64,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let thresholds = state.pipeline.settings().thresholds;
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        conf_min: thresholds.conf_min(),
        conf_auto: thresholds.conf_auto(),
    })
}

// ============ POST /search, POST /run ============

/// Request body shared by `/search` and `/run`.
#[derive(Debug, Deserialize)]
struct RunRequest {
    text: String,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    filters: Option<HashMap<String, Value>>,
    #[serde(default = "default_true", alias = "post_to_slack")]
    notify: bool,
    #[serde(default, alias = "create_jira")]
    create_ticket: bool,
}

fn default_true() -> bool {
    true
}

/// Keep string-ish filter values; unknown keys and blanks are dropped
/// by [`SearchFilters::from_map`].
fn clean_filters(raw: Option<&HashMap<String, Value>>) -> SearchFilters {
    let Some(raw) = raw else {
        return SearchFilters::default();
    };
    let strings: HashMap<String, String> = raw
        .iter()
        .filter_map(|(k, v)| {
            let s = match v {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some((k.clone(), s))
        })
        .collect();
    SearchFilters::from_map(&strings)
}

impl RunRequest {
    fn options(&self) -> RunOptions {
        RunOptions {
            top_k: self.top_k,
            filters: clean_filters(self.filters.as_ref()),
            notify: self.notify,
            create_ticket: self.create_ticket,
        }
    }
}

#[derive(Serialize)]
struct SearchResponse {
    count: usize,
    results: Vec<SearchHit>,
}

async fn handle_search(
    State(state): State<AppState>,
    body: Result<Json<RunRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, AppError> {
    let Json(req) = body?;
    let opts = req.options();
    let results = state
        .pipeline
        .search(&req.text, opts.top_k, &opts.filters)
        .await?;
    Ok(Json(SearchResponse {
        count: results.len(),
        results,
    }))
}

async fn handle_run(
    State(state): State<AppState>,
    body: Result<Json<RunRequest>, JsonRejection>,
) -> Result<Json<RunOutcome>, AppError> {
    let Json(req) = body?;
    let outcome = state.pipeline.run(&req.text, &req.options()).await?;
    Ok(Json(outcome))
}

// ============ POST /ocr_run ============

fn parse_form_bool(name: &str, raw: &str) -> Result<bool, AppError> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(bad_request(format!("{name}: expected a boolean, got '{other}'"))),
    }
}

async fn handle_ocr_run(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<RunOutcome>, AppError> {
    let mut image: Option<(String, Vec<u8>)> = None;
    let mut opts = RunOptions::default();
    let mut filters: HashMap<String, String> = HashMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let filename = field.file_name().unwrap_or("upload").to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| bad_request(e.body_text()))?;
            image = Some((filename, bytes.to_vec()));
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| bad_request(e.body_text()))?;
        match name.as_str() {
            "top_k" => {
                let top_k = value
                    .trim()
                    .parse()
                    .map_err(|_| bad_request(format!("top_k: expected an integer, got '{value}'")))?;
                opts.top_k = Some(top_k);
            }
            "notify" | "post_to_slack" => opts.notify = parse_form_bool(&name, &value)?,
            "create_ticket" | "create_jira" => opts.create_ticket = parse_form_bool(&name, &value)?,
            _ => {
                filters.insert(name, value);
            }
        }
    }

    let (filename, bytes) = image.ok_or_else(|| bad_request("missing 'file' field"))?;
    opts.filters = SearchFilters::from_map(&filters);
    let outcome = state.pipeline.run_image(&bytes, &filename, &opts).await?;
    Ok(Json(outcome))
}

// ============ Runs ============

/// Run as returned by the read endpoints, with routing fields lifted out
/// of the stored plan.
#[derive(Debug, Serialize)]
pub struct RunView {
    pub run_id: RunId,
    pub incident_id: IncidentId,
    pub retrieved_ids: Vec<ChunkId>,
    pub confidence: f64,
    pub next_action: Option<NextAction>,
    pub previews: Vec<Preview>,
    pub plan: Plan,
    pub final_summary: String,
    pub action_status: ActionStatus,
    pub created_at: String,
}

impl From<Run> for RunView {
    fn from(run: Run) -> Self {
        Self {
            run_id: run.id,
            incident_id: run.incident_id,
            retrieved_ids: run.retrieved_ids,
            confidence: run.plan.confidence,
            next_action: run.plan.next_action,
            previews: run.plan.previews.clone(),
            plan: run.plan,
            final_summary: run.final_summary,
            action_status: run.action_status,
            created_at: format_ts_iso(run.created_at),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<i64>,
    offset: Option<i64>,
    incident_id: Option<IncidentId>,
}

async fn handle_list_runs(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<Vec<RunView>>, AppError> {
    let Query(params) = params?;
    let query = RunQuery::new(params.limit, params.offset, params.incident_id)?;
    let runs = state.pipeline.list_runs(&query).await?;
    Ok(Json(runs.into_iter().map(RunView::from).collect()))
}

async fn handle_get_run(
    State(state): State<AppState>,
    id: Result<Path<RunId>, PathRejection>,
) -> Result<Json<RunView>, AppError> {
    let Path(id) = id?;
    let run = state.pipeline.get_run(id).await?;
    Ok(Json(RunView::from(run)))
}

#[derive(Debug, Deserialize)]
struct ReplayParams {
    #[serde(default = "default_true", alias = "post_to_slack")]
    notify: bool,
}

async fn handle_replay(
    State(state): State<AppState>,
    id: Result<Path<RunId>, PathRejection>,
    params: Result<Query<ReplayParams>, QueryRejection>,
) -> Result<Json<RunOutcome>, AppError> {
    let Path(id) = id?;
    let Query(params) = params?;
    let outcome = state.pipeline.replay(id, params.notify).await?;
    Ok(Json(outcome))
}
