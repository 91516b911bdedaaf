use utoipa::OpenApi;

use crate::web::api::error::ErrorResponse;
use crate::web::api::fft::{AddNotchRequest, FftStatusResponse, FftStopResponse};
use crate::web::api::sstv::{CaptureRequest, CaptureStarted, SstvStatusResponse};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::web::api::status::get_status,
        crate::web::api::status::get_passes,
        crate::web::api::status::get_captures,
        crate::web::api::status::get_summary,
        crate::web::api::fft::get_status,
        crate::web::api::fft::stop,
        crate::web::api::fft::get_notches,
        crate::web::api::fft::add_notch,
        crate::web::api::fft::delete_notch,
        crate::web::api::sstv::get_status,
        crate::web::api::sstv::capture,
        crate::web::api::config::set_gain,
        crate::web::api::images::get_image,
    ),
    components(
        schemas(
            ErrorResponse,
            FftStatusResponse,
            FftStopResponse,
            AddNotchRequest,
            SstvStatusResponse,
            CaptureRequest,
            CaptureStarted,
            crate::web::api::config::GainRequest,
            crate::web::api::config::GainResponse,
            crate::state::SystemState,
            crate::state::Status,
            crate::state::CaptureProgress,
            crate::state::DopplerInfo,
            crate::predict::Pass,
            crate::store::CaptureResult,
            crate::store::CaptureSummary,
            crate::satellite::Satellite,
            crate::satellite::SignalKind,
            crate::satellite::SignalParams,
            crate::satellite::Demodulation,
            crate::fft::Notch,
            crate::fft::FftParams,
        )
    ),
    info(
        title = "Night Watch API",
        description = "Operator surface of the autonomous ground station",
        version = "0.1.0"
    ),
    tags(
        (name = "status", description = "System state and pass schedule"),
        (name = "fft", description = "Spectrum stream control"),
        (name = "sstv", description = "Ground SSTV capture"),
        (name = "config", description = "Runtime tunables"),
        (name = "images", description = "Decoded imagery")
    )
)]
pub struct ApiDoc;
