use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::ReceiverConfig;
use crate::fft::FftStream;
use crate::scheduler::Scheduler;
use crate::state::StateBus;
use crate::store::Store;

use super::api;
use super::api_doc::ApiDoc;
use super::ws;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ReceiverConfig>,
    pub bus: StateBus,
    pub fft: FftStream,
    pub scheduler: Arc<Scheduler>,
    pub store: Arc<Store>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Operator telemetry socket
        .route("/ws", get(ws::handle_ws))
        // Status & passes
        .route("/api/status", get(api::status::get_status))
        .route("/api/passes", get(api::status::get_passes))
        .route("/api/captures", get(api::status::get_captures))
        .route("/api/summary", get(api::status::get_summary))
        // FFT stream
        .route("/api/fft/status", get(api::fft::get_status))
        .route("/api/fft/stop", post(api::fft::stop))
        .route("/api/fft/notch", get(api::fft::get_notches))
        .route("/api/fft/notch", post(api::fft::add_notch))
        .route("/api/fft/notch/{id}", delete(api::fft::delete_notch))
        // SSTV
        .route("/api/sstv/status", get(api::sstv::get_status))
        .route("/api/sstv/capture", post(api::sstv::capture))
        // Config
        .route("/api/config/gain", post(api::config::set_gain))
        // Decoded images
        .route("/api/images/{name}", get(api::images::get_image))
        // OpenAPI / Swagger
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .fallback(reject_stray_upgrades)
        // Middleware
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The only WebSocket endpoint is `/ws`; an upgrade attempt anywhere
/// else is a client bug and gets a 400 rather than a plain 404.
async fn reject_stray_upgrades(headers: axum::http::HeaderMap) -> axum::http::StatusCode {
    let is_upgrade = headers
        .get(axum::http::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    if is_upgrade {
        axum::http::StatusCode::BAD_REQUEST
    } else {
        axum::http::StatusCode::NOT_FOUND
    }
}

pub async fn run_server(state: AppState, bind: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    log::info!("web interface on {}", listener.local_addr()?);
    serve(state, listener).await
}

/// Serve on an already-bound listener (tests bind an ephemeral port).
pub async fn serve(state: AppState, listener: tokio::net::TcpListener) -> std::io::Result<()> {
    axum::serve(listener, build_router(state)).await
}
