//! Health and status

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::server::error::ApiResult;
use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub pid: u32,
    pub uptime_secs: i64,
    pub counts: BTreeMap<String, i64>,
    pub running: Vec<String>,
}

pub async fn status(State(state): State<AppState>) -> ApiResult<Json<StatusResponse>> {
    Ok(Json(StatusResponse {
        pid: state.pid,
        uptime_secs: state.uptime_secs(),
        counts: state.store.count_by_status()?,
        running: state.scheduler.live_chunks(),
    }))
}
