//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use crate::deploy::docker::LogWindow;
use crate::errors::VoltexError;
use crate::events::capture::CapturedEvent;
use crate::models::project::ProjectRequest;
use crate::server::state::ServerState;
use crate::services::projects::QueuedBuild;
use crate::utils::version_info;

/// Lines returned by the logs endpoint when `tail` is absent
pub const DEFAULT_LOG_TAIL: u32 = 100;

/// Error response: `{"error": "..."}` with a status derived from the error
pub struct ApiError(VoltexError);

impl From<VoltexError> for ApiError {
    fn from(e: VoltexError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            VoltexError::ValidationError(_) => StatusCode::BAD_REQUEST,
            VoltexError::NotFound(_) => StatusCode::NOT_FOUND,
            VoltexError::NotDeployed(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "voltex".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    Json(version_info())
}

pub async fn api_root_handler() -> &'static str {
    "Hello Voltex!"
}

/// Response of create and rebuild
#[derive(Debug, Serialize)]
pub struct BuildResponse {
    pub id: String,
    pub build: String,
}

impl From<QueuedBuild> for BuildResponse {
    fn from(queued: QueuedBuild) -> Self {
        Self {
            id: queued.project_id,
            build: queued.build_id,
        }
    }
}

pub async fn list_projects_handler(State(state): State<Arc<ServerState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.projects.list().await?))
}

pub async fn project_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.projects.get(&id).await?))
}

pub async fn create_project_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<ProjectRequest>,
) -> ApiResult<impl IntoResponse> {
    let queued = state.projects.create(request).await?;
    Ok(Json(BuildResponse::from(queued)))
}

#[derive(Debug, Deserialize)]
pub struct RebuildParams {
    pub force_ip: Option<String>,
}

pub async fn rebuild_project_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    Query(params): Query<RebuildParams>,
) -> ApiResult<impl IntoResponse> {
    let queued = state.projects.rebuild(&id, params.force_ip).await?;
    Ok(Json(BuildResponse::from(queued)))
}

pub async fn update_project_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    Json(request): Json<ProjectRequest>,
) -> ApiResult<impl IntoResponse> {
    state.projects.update(&id, request).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn delete_project_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    // Teardown continues on the delete queue
    let _completion = state.projects.delete(&id).await?;
    Ok(Json(json!({ "success": true, "id": id })))
}

pub async fn status_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let status = state.projects.status(&id).await?;
    Ok(Json(json!({ "status": status })))
}

pub async fn start_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.projects.start(&id).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct LogsParams {
    pub tail: Option<u32>,
    pub since: Option<String>,
    pub until: Option<String>,
}

pub async fn logs_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    Query(params): Query<LogsParams>,
) -> ApiResult<impl IntoResponse> {
    let window = LogWindow {
        tail: params.tail.unwrap_or(DEFAULT_LOG_TAIL),
        since: params.since,
        until: params.until,
    };
    let logs = state.projects.container_logs(&id, &window).await?;
    Ok(Json(json!({ "logs": logs })))
}

#[derive(Debug, Deserialize)]
pub struct EventsParams {
    /// Milliseconds since the Unix epoch, inclusive
    pub since: Option<i64>,
    /// Milliseconds since the Unix epoch, inclusive
    pub until: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub events: Vec<CapturedEvent>,
}

pub async fn events_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    Query(params): Query<EventsParams>,
) -> ApiResult<impl IntoResponse> {
    let events = state
        .projects
        .deployment_events(&id, params.since, params.until)
        .await?;
    Ok(Json(EventsResponse { events }))
}

pub async fn deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.projects.deployment(&id).await?))
}
