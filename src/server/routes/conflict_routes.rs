//! Conflict verdict routes

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::models::{ConflictAnalysis, ConflictVerdict};
use crate::server::error::{ApiError, ApiResult};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct ConflictQuery {
    pub verdict: Option<String>,
}

pub async fn list_conflicts(
    State(state): State<AppState>,
    Query(query): Query<ConflictQuery>,
) -> ApiResult<Json<Vec<ConflictAnalysis>>> {
    let verdict = query
        .verdict
        .as_deref()
        .map(str::parse::<ConflictVerdict>)
        .transpose()
        .map_err(ApiError::BadRequest)?;
    Ok(Json(state.store.list_all_conflicts(verdict)?))
}

pub async fn chunk_conflicts(
    State(state): State<AppState>,
    Path(chunk): Path<String>,
) -> ApiResult<Json<Vec<ConflictAnalysis>>> {
    Ok(Json(state.store.list_conflicts_for_chunk(&chunk)?))
}

/// Cached verdict when still current, otherwise a fresh analysis
pub async fn analyze_pair(
    State(state): State<AppState>,
    Path((a, b)): Path<(String, String)>,
) -> ApiResult<Json<ConflictAnalysis>> {
    let oracle = state.oracle.clone();
    let analysis = tokio::task::spawn_blocking(move || oracle.should_serialize(&a, &b))
        .await
        .map_err(|e| ApiError::Internal(format!("Conflict analysis failed: {}", e)))?;
    Ok(Json(analysis))
}
