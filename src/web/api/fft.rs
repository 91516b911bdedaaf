use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::fft::{FftParams, Notch};

use super::error::{ApiError, ApiResult};
use crate::web::server::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct FftStatusResponse {
    pub running: bool,
    pub subscribers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<FftParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/fft/status",
    responses((status = 200, description = "FFT stream state", body = FftStatusResponse)),
    tag = "fft"
)]
pub async fn get_status(State(state): State<AppState>) -> Json<FftStatusResponse> {
    Json(FftStatusResponse {
        running: state.fft.is_running(),
        subscribers: state.fft.subscriber_count(),
        config: state.fft.get_config(),
        error: state.fft.get_error(),
    })
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FftStopResponse {
    pub success: bool,
    pub running: bool,
}

#[utoipa::path(
    post,
    path = "/api/fft/stop",
    responses((status = 200, description = "Stream stopped", body = FftStopResponse)),
    tag = "fft"
)]
pub async fn stop(State(state): State<AppState>) -> Json<FftStopResponse> {
    state.fft.stop().await;
    Json(FftStopResponse {
        success: true,
        running: false,
    })
}

#[utoipa::path(
    get,
    path = "/api/fft/notch",
    responses((status = 200, description = "Configured notch filters", body = Vec<Notch>)),
    tag = "fft"
)]
pub async fn get_notches(State(state): State<AppState>) -> Json<Vec<Notch>> {
    Json(state.fft.get_notches())
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddNotchRequest {
    pub frequency_hz: u64,
    pub bandwidth_hz: u64,
}

#[utoipa::path(
    post,
    path = "/api/fft/notch",
    request_body = AddNotchRequest,
    responses(
        (status = 200, description = "Notch added", body = Notch),
        (status = 400, description = "Invalid notch")
    ),
    tag = "fft"
)]
pub async fn add_notch(
    State(state): State<AppState>,
    Json(request): Json<AddNotchRequest>,
) -> ApiResult<Json<Notch>> {
    if request.bandwidth_hz == 0 {
        return Err(ApiError::Validation("bandwidth_hz must be nonzero".into()));
    }
    Ok(Json(
        state.fft.add_notch(request.frequency_hz, request.bandwidth_hz),
    ))
}

#[utoipa::path(
    delete,
    path = "/api/fft/notch/{id}",
    params(("id" = u32, Path, description = "Notch id")),
    responses(
        (status = 204, description = "Notch removed"),
        (status = 404, description = "Unknown notch")
    ),
    tag = "fft"
)]
pub async fn delete_notch(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> ApiResult<StatusCode> {
    if state.fft.remove_notch(id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("notch_not_found"))
    }
}
