//! `/operations` HTTP routes: a thin translation layer over [`Engine`].
//!
//! No business logic lives here — every handler validates nothing itself and
//! forwards straight to the matching `Engine` method, translating its
//! `Result` into an HTTP response via [`ApiError`].

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use maintenance_engine::{Engine, Event, InterventionResponse, Operation, OperationRequest};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PauseRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PatchOperationRequest {
    #[serde(default)]
    pub wait_timeout: Option<u64>,
    #[serde(default)]
    #[schema(value_type = Option<Vec<usize>>)]
    pub pause_before_steps: Option<BTreeSet<usize>>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/operations", post(create_operation).get(list_operations))
        .route("/operations/:id", get(get_operation).patch(patch_operation).delete(delete_operation))
        .route("/operations/:id/events", get(list_events))
        .route("/operations/:id/start", post(start_operation))
        .route("/operations/:id/pause", post(pause_operation))
        .route("/operations/:id/resume", post(resume_operation))
        .with_state(state)
}

/// POST /operations
#[utoipa::path(
    post,
    path = "/operations",
    request_body = OperationRequest,
    responses(
        (status = 201, description = "Operation created", body = Operation),
        (status = 400, description = "Invalid parameters")
    ),
    tag = "operations"
)]
pub async fn create_operation(
    State(state): State<AppState>,
    Json(request): Json<OperationRequest>,
) -> Result<(StatusCode, Json<Operation>), ApiError> {
    let op = state.engine.create(request).await?;
    Ok((StatusCode::CREATED, Json(op)))
}

/// GET /operations
#[utoipa::path(
    get,
    path = "/operations",
    responses((status = 200, description = "All known operations", body = Vec<Operation>)),
    tag = "operations"
)]
pub async fn list_operations(State(state): State<AppState>) -> Json<Vec<Operation>> {
    Json(state.engine.list())
}

/// GET /operations/{id}
#[utoipa::path(
    get,
    path = "/operations/{id}",
    params(("id" = Uuid, Path, description = "Operation ID")),
    responses(
        (status = 200, description = "Operation snapshot", body = Operation),
        (status = 404, description = "No such operation")
    ),
    tag = "operations"
)]
pub async fn get_operation(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Operation>, ApiError> {
    Ok(Json(state.engine.get(id)?))
}

/// GET /operations/{id}/events
#[utoipa::path(
    get,
    path = "/operations/{id}/events",
    params(("id" = Uuid, Path, description = "Operation ID")),
    responses(
        (status = 200, description = "Event log", body = Vec<Event>),
        (status = 404, description = "No such operation")
    ),
    tag = "operations"
)]
pub async fn list_events(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Vec<Event>>, ApiError> {
    Ok(Json(state.engine.events(id).await?))
}

/// POST /operations/{id}/start
#[utoipa::path(
    post,
    path = "/operations/{id}/start",
    params(("id" = Uuid, Path, description = "Operation ID")),
    responses(
        (status = 200, description = "Operation started", body = Operation),
        (status = 404, description = "No such operation"),
        (status = 409, description = "Operation is not in state=created")
    ),
    tag = "operations"
)]
pub async fn start_operation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Operation>, ApiError> {
    Ok(Json(state.engine.start(id).await?))
}

/// POST /operations/{id}/pause
#[utoipa::path(
    post,
    path = "/operations/{id}/pause",
    params(("id" = Uuid, Path, description = "Operation ID")),
    request_body = PauseRequest,
    responses(
        (status = 200, description = "Operation paused", body = Operation),
        (status = 404, description = "No such operation"),
        (status = 409, description = "Operation is not running")
    ),
    tag = "operations"
)]
pub async fn pause_operation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<PauseRequest>,
) -> Result<Json<Operation>, ApiError> {
    Ok(Json(state.engine.pause(id, request.reason).await?))
}

/// POST /operations/{id}/resume
#[utoipa::path(
    post,
    path = "/operations/{id}/resume",
    params(("id" = Uuid, Path, description = "Operation ID")),
    request_body = InterventionResponse,
    responses(
        (status = 200, description = "Operation resumed", body = Operation),
        (status = 404, description = "No such operation"),
        (status = 409, description = "Operation is not paused")
    ),
    tag = "operations"
)]
pub async fn resume_operation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(response): Json<InterventionResponse>,
) -> Result<Json<Operation>, ApiError> {
    Ok(Json(state.engine.resume(id, response).await?))
}

/// PATCH /operations/{id}
#[utoipa::path(
    patch,
    path = "/operations/{id}",
    params(("id" = Uuid, Path, description = "Operation ID")),
    request_body = PatchOperationRequest,
    responses(
        (status = 200, description = "Operation updated", body = Operation),
        (status = 404, description = "No such operation"),
        (status = 400, description = "wait_timeout out of bounds")
    ),
    tag = "operations"
)]
pub async fn patch_operation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<PatchOperationRequest>,
) -> Result<Json<Operation>, ApiError> {
    let mut op = state.engine.get(id)?;
    if let Some(wait_timeout) = request.wait_timeout {
        op = state.engine.update_timeout(id, wait_timeout).await?;
    }
    if let Some(pause_before_steps) = request.pause_before_steps {
        op = state.engine.update_pause_before_steps(id, pause_before_steps).await?;
    }
    Ok(Json(op))
}

/// DELETE /operations/{id}
#[utoipa::path(
    delete,
    path = "/operations/{id}",
    params(("id" = Uuid, Path, description = "Operation ID")),
    responses(
        (status = 204, description = "Operation deleted"),
        (status = 404, description = "No such operation"),
        (status = 409, description = "Operation is not in state=created")
    ),
    tag = "operations"
)]
pub async fn delete_operation(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, ApiError> {
    state.engine.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
