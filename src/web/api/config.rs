use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::error::{ApiError, ApiResult};
use crate::web::server::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct GainRequest {
    pub gain: f64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GainResponse {
    pub success: bool,
    pub gain: f64,
}

/// Adjust tuner gain for subsequent producer starts. RTL dongles accept
/// 0 through 49 dB.
#[utoipa::path(
    post,
    path = "/api/config/gain",
    request_body = GainRequest,
    responses(
        (status = 200, description = "Gain applied", body = GainResponse),
        (status = 400, description = "Gain outside [0, 49]")
    ),
    tag = "config"
)]
pub async fn set_gain(
    State(state): State<AppState>,
    Json(request): Json<GainRequest>,
) -> ApiResult<Json<GainResponse>> {
    if !(0.0..=49.0).contains(&request.gain) || !request.gain.is_finite() {
        return Err(ApiError::Validation(format!(
            "gain {} outside [0, 49]",
            request.gain
        )));
    }
    state.fft.set_gain(request.gain);
    log::info!("tuner gain set to {} dB", request.gain);
    Ok(Json(GainResponse {
        success: true,
        gain: request.gain,
    }))
}
