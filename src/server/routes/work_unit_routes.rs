//! Work unit routes

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::models::{StatusLogEntry, WorkUnit, WorkUnitPhase, WorkUnitStatus};
use crate::server::error::{ApiError, ApiResult};
use crate::server::AppState;
use crate::utils::validate_chunk_name;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateWorkUnitRequest {
    pub chunk: String,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub phase: Option<WorkUnitPhase>,
}

fn require_unit(state: &AppState, chunk: &str) -> ApiResult<WorkUnit> {
    state
        .store
        .get(chunk)?
        .ok_or_else(|| ApiError::NotFound(format!("Work unit not found: {}", chunk)))
}

pub async fn list_work_units(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<WorkUnit>>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<WorkUnitStatus>)
        .transpose()
        .map_err(ApiError::BadRequest)?;
    Ok(Json(state.store.list(status)?))
}

pub async fn create_work_unit(
    State(state): State<AppState>,
    Json(request): Json<CreateWorkUnitRequest>,
) -> ApiResult<(StatusCode, Json<WorkUnit>)> {
    validate_chunk_name(&request.chunk).map_err(ApiError::BadRequest)?;

    let mut unit = WorkUnit::new(&request.chunk);
    if let Some(priority) = request.priority {
        unit = unit.with_priority(priority);
    }
    if let Some(phase) = request.phase {
        unit = unit.with_phase(phase);
    }

    state.store.create(&unit)?;
    log::info!(
        "[Server] Enqueued {} ({} phase, priority {})",
        unit.chunk,
        unit.phase,
        unit.priority
    );
    Ok((StatusCode::CREATED, Json(require_unit(&state, &unit.chunk)?)))
}

pub async fn get_work_unit(
    State(state): State<AppState>,
    Path(chunk): Path<String>,
) -> ApiResult<Json<WorkUnit>> {
    Ok(Json(require_unit(&state, &chunk)?))
}

/// Only finished units may be removed
pub async fn delete_work_unit(
    State(state): State<AppState>,
    Path(chunk): Path<String>,
) -> ApiResult<StatusCode> {
    let unit = require_unit(&state, &chunk)?;
    if unit.status != WorkUnitStatus::Done {
        return Err(ApiError::Conflict(format!(
            "Work unit {} is {}; only DONE units can be deleted",
            chunk, unit.status
        )));
    }

    state.store.delete(&chunk)?;
    state.store.clear_conflicts_for_chunk(&chunk)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_history(
    State(state): State<AppState>,
    Path(chunk): Path<String>,
) -> ApiResult<Json<Vec<StatusLogEntry>>> {
    require_unit(&state, &chunk)?;
    Ok(Json(state.store.get_status_history(&chunk)?))
}

/// Hand a parked unit back to the scheduler
pub async fn retry_work_unit(
    State(state): State<AppState>,
    Path(chunk): Path<String>,
) -> ApiResult<Json<WorkUnit>> {
    let mut unit = require_unit(&state, &chunk)?;
    if !matches!(
        unit.status,
        WorkUnitStatus::NeedsAttention | WorkUnitStatus::Blocked
    ) {
        return Err(ApiError::BadRequest(format!(
            "Work unit {} is {}; only NEEDS_ATTENTION or BLOCKED units can be retried",
            chunk, unit.status
        )));
    }

    unit.status = WorkUnitStatus::Ready;
    unit.attention_reason = None;
    unit.blocked_by.clear();
    unit.completion_retries = 0;
    let updated = state.store.update(&unit)?;
    log::info!("[Server] {} returned to READY by operator", chunk);
    Ok(Json(updated))
}
