//! HTTP routes
//!
//! - `status_routes` - health and daemon status
//! - `work_unit_routes` - work unit CRUD, history and retry
//! - `conflict_routes` - cached and on-demand conflict verdicts

pub mod conflict_routes;
pub mod status_routes;
pub mod work_unit_routes;

use axum::routing::{get, post};
use axum::Router;

use super::AppState;

pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(status_routes::health))
        .route("/status", get(status_routes::status))
        .route(
            "/work-units",
            get(work_unit_routes::list_work_units).post(work_unit_routes::create_work_unit),
        )
        .route(
            "/work-units/{chunk}",
            get(work_unit_routes::get_work_unit).delete(work_unit_routes::delete_work_unit),
        )
        .route(
            "/work-units/{chunk}/history",
            get(work_unit_routes::get_history),
        )
        .route(
            "/work-units/{chunk}/retry",
            post(work_unit_routes::retry_work_unit),
        )
        .route("/conflicts", get(conflict_routes::list_conflicts))
        .route("/conflicts/{chunk}", get(conflict_routes::chunk_conflicts))
        .route("/conflicts/{a}/{b}", get(conflict_routes::analyze_pair))
}
