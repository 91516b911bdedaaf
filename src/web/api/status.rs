use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use utoipa::IntoParams;

use crate::predict::Pass;
use crate::state::SystemState;
use crate::store::{CaptureResult, CaptureSummary};

use super::error::{ApiError, ApiResult};
use crate::web::server::AppState;

#[utoipa::path(
    get,
    path = "/api/status",
    responses((status = 200, description = "Current system state", body = SystemState)),
    tag = "status"
)]
pub async fn get_status(State(state): State<AppState>) -> Json<SystemState> {
    Json(state.bus.get_state())
}

#[utoipa::path(
    get,
    path = "/api/passes",
    responses((status = 200, description = "Upcoming passes ordered by AOS", body = Vec<Pass>)),
    tag = "status"
)]
pub async fn get_passes(State(state): State<AppState>) -> Json<Vec<Pass>> {
    Json(state.bus.get_state().upcoming_passes)
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct CapturesQuery {
    /// Maximum number of captures to return, newest first.
    pub limit: Option<usize>,
}

#[utoipa::path(
    get,
    path = "/api/captures",
    params(CapturesQuery),
    responses((status = 200, description = "Recent captures", body = Vec<CaptureResult>)),
    tag = "status"
)]
pub async fn get_captures(
    State(state): State<AppState>,
    Query(query): Query<CapturesQuery>,
) -> ApiResult<Json<Vec<CaptureResult>>> {
    let limit = query.limit.unwrap_or(20);
    let captures = state
        .store
        .recent(limit)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(captures))
}

#[utoipa::path(
    get,
    path = "/api/summary",
    responses((status = 200, description = "Capture counters", body = CaptureSummary)),
    tag = "status"
)]
pub async fn get_summary(State(state): State<AppState>) -> ApiResult<Json<CaptureSummary>> {
    let summary = state
        .store
        .summary()
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(summary))
}
