use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::Status;

use super::error::{ApiError, ApiResult};
use crate::web::server::AppState;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SstvStatusResponse {
    pub manual_enabled: bool,
    pub ground_scan_enabled: bool,
    pub status: Status,
    pub scanning: bool,
}

#[utoipa::path(
    get,
    path = "/api/sstv/status",
    responses((status = 200, description = "SSTV feature state", body = SstvStatusResponse)),
    tag = "sstv"
)]
pub async fn get_status(State(state): State<AppState>) -> Json<SstvStatusResponse> {
    Json(SstvStatusResponse {
        manual_enabled: state.config.sstv.manual_enabled,
        ground_scan_enabled: state.config.sstv.ground_scan_enabled,
        status: state.bus.get_state().status,
        scanning: state.scheduler.scanner().is_scanning(),
    })
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CaptureRequest {
    pub frequency_hz: u64,
    pub duration_s: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CaptureStarted {
    pub started: bool,
    pub frequency_hz: u64,
    pub duration_s: u64,
}

/// Kick off a manual ground SSTV capture. The capture runs in the
/// background; its result arrives on the WebSocket as `pass_complete`.
#[utoipa::path(
    post,
    path = "/api/sstv/capture",
    request_body = CaptureRequest,
    responses(
        (status = 200, description = "Capture started", body = CaptureStarted),
        (status = 403, description = "Manual capture disabled"),
        (status = 409, description = "Busy with a pass"),
        (status = 400, description = "Invalid request")
    ),
    tag = "sstv"
)]
pub async fn capture(
    State(state): State<AppState>,
    Json(request): Json<CaptureRequest>,
) -> ApiResult<Json<CaptureStarted>> {
    if !state.config.sstv.manual_enabled {
        return Err(ApiError::Forbidden("manual_sstv_disabled"));
    }
    if request.duration_s == 0 || request.duration_s > 600 {
        return Err(ApiError::Validation(
            "duration_s must be between 1 and 600".into(),
        ));
    }
    let status = state.bus.get_state().status;
    if matches!(status, Status::Capturing | Status::Decoding) {
        return Err(ApiError::Conflict("capture_in_progress"));
    }

    let scheduler = state.scheduler.clone();
    let frequency_hz = request.frequency_hz;
    let duration_s = request.duration_s;
    tokio::spawn(async move {
        let result = scheduler
            .capture_sstv_manual(frequency_hz, duration_s)
            .await;
        log::info!(
            "manual SSTV capture finished: success={} ({})",
            result.success,
            result.id
        );
    });

    Ok(Json(CaptureStarted {
        started: true,
        frequency_hz: request.frequency_hz,
        duration_s: request.duration_s,
    }))
}
