use axum::extract::{Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use percent_encoding::percent_decode_str;

use super::error::ApiError;
use crate::web::server::AppState;

/// Serve a decoded image by file name. Names are percent-decoded first,
/// then any `..` segment (or an absolute path) is refused outright so
/// the handler can never escape the images directory.
#[utoipa::path(
    get,
    path = "/api/images/{name}",
    params(("name" = String, Path, description = "Image file name")),
    responses(
        (status = 200, description = "PNG image"),
        (status = 403, description = "Path traversal rejected"),
        (status = 404, description = "No such image")
    ),
    tag = "images"
)]
pub async fn get_image(
    State(state): State<AppState>,
    UrlPath(name): UrlPath<String>,
) -> Result<Response, ApiError> {
    let decoded = percent_decode_str(&name)
        .decode_utf8()
        .map_err(|_| ApiError::Validation("invalid encoding".into()))?;

    if decoded.starts_with('/')
        || decoded
            .split(['/', '\\'])
            .any(|segment| segment == "..")
    {
        log::warn!("rejected image path {:?}", decoded);
        return Err(ApiError::Forbidden("path_traversal"));
    }

    let path = state.config.paths.images_dir.join(decoded.as_ref());
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| ApiError::NotFound("image_not_found"))?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "image/png")],
        bytes,
    )
        .into_response())
}
