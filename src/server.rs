//! HTTP API.
//!
//! A thin axum layer over the job manager and the episode store. Handlers
//! never execute pipeline work themselves: actions are submitted to the
//! manager and answered immediately with a job id, everything else is a
//! read. Poll loops therefore stay cheap regardless of what the worker is
//! doing.
//!
//! Routes:
//!
//! - `POST /api/episodes/:id/actions/:action` — submit an action
//! - `GET  /api/jobs/:id` — poll a job snapshot
//! - `GET  /api/episodes` — list episodes
//! - `GET  /api/episodes/:id` — fetch one episode
//! - `GET  /api/episodes/:id/log?n=50` — tail the episode log
//! - `GET  /api/health` — liveness probe

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::jobs::{JobManager, SubmitError, Submission};
use crate::pipeline::StageParams;
use crate::store::EpisodeStore;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<JobManager>,
    pub store: Arc<dyn EpisodeStore>,
}

/// An error response with a machine-readable code and a human message.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": { "code": self.code, "message": self.message }
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<SubmitError> for ApiError {
    fn from(e: SubmitError) -> Self {
        let message = e.to_string();
        match e {
            SubmitError::Conflict { .. } => {
                Self::new(StatusCode::CONFLICT, "conflict", message)
            }
            SubmitError::EpisodeNotFound(_) => Self::not_found(message),
            SubmitError::NothingToRetry(_) => {
                Self::new(StatusCode::PRECONDITION_FAILED, "precondition", message)
            }
            SubmitError::UnknownAction(_) => Self::bad_request(message),
            SubmitError::ShutDown => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "shutdown", message)
            }
            SubmitError::Store(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "store", message)
            }
        }
    }
}

/// Optional JSON body for action submissions.
#[derive(Debug, Default, Deserialize)]
pub struct ActionOptions {
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub dry_run: bool,
}

/// Query parameters for the log tail endpoint.
#[derive(Debug, Deserialize)]
struct LogQuery {
    n: Option<usize>,
}

const DEFAULT_LOG_TAIL: usize = 50;

/// Builds the API router over the given state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/episodes", get(list_episodes))
        .route("/api/episodes/:id", get(get_episode))
        .route("/api/episodes/:id/log", get(get_log))
        .route("/api/episodes/:id/actions/:action", post(post_action))
        .route("/api/jobs/:id", get(get_job))
        .with_state(state)
}

/// Binds `addr` and serves the API until the process stops.
pub async fn serve(addr: &str, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "HTTP API listening");
    axum::serve(listener, router(state)).await
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn post_action(
    State(state): State<AppState>,
    Path((episode_id, action)): Path<(String, String)>,
    body: Option<Json<ActionOptions>>,
) -> Result<Response, ApiError> {
    let kind = action
        .parse()
        .map_err(|_| ApiError::from(SubmitError::UnknownAction(action.clone())))?;

    let options = body.map(|Json(o)| o).unwrap_or_default();
    let params = StageParams::new()
        .with_force(options.force)
        .with_dry_run(options.dry_run);

    match state.manager.submit(&episode_id, kind, params).await? {
        Submission::Queued(job_id) => {
            Ok((StatusCode::ACCEPTED, Json(json!({ "job_id": job_id }))).into_response())
        }
        Submission::NothingToDo(message) => {
            Ok((StatusCode::OK, Json(json!({ "message": message }))).into_response())
        }
    }
}

async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    match state.manager.get(job_id).await {
        Some(snapshot) => Ok(Json(snapshot).into_response()),
        None => Err(ApiError::not_found(format!("Job not found: {job_id}"))),
    }
}

async fn get_log(
    State(state): State<AppState>,
    Path(episode_id): Path<String>,
    Query(query): Query<LogQuery>,
) -> Json<serde_json::Value> {
    let lines = state
        .manager
        .log_tail(&episode_id, query.n.unwrap_or(DEFAULT_LOG_TAIL));
    Json(json!({ "episode_id": episode_id, "lines": lines }))
}

async fn list_episodes(State(state): State<AppState>) -> Result<Response, ApiError> {
    let episodes = state.store.list().await.map_err(SubmitError::Store)?;
    Ok(Json(episodes).into_response())
}

async fn get_episode(
    State(state): State<AppState>,
    Path(episode_id): Path<String>,
) -> Result<Response, ApiError> {
    match state.store.get(&episode_id).await.map_err(SubmitError::Store)? {
        Some(episode) => Ok(Json(episode).into_response()),
        None => Err(ApiError::not_found(format!(
            "Episode not found: {episode_id}"
        ))),
    }
}
