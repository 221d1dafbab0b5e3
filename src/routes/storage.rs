use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use crate::error::AppResult;
use crate::model::FileId;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/storage/{id}/preview", get(preview))
        .route("/avatars/initials/{initials}", get(initials_avatar))
}

async fn preview(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Response> {
    let (data, file) = state.gateway.read_file(&FileId::new(id)).await?;
    let mime = file
        .mime_type
        .unwrap_or_else(|| "application/octet-stream".to_string());
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime),
            (header::CACHE_CONTROL, "public, max-age=86400".to_string()),
        ],
        data,
    )
        .into_response())
}

/// Placeholder avatar for users without a profile image
async fn initials_avatar(Path(initials): Path<String>) -> Response {
    let text: String = initials
        .chars()
        .filter(|c| c.is_alphanumeric())
        .take(2)
        .flat_map(char::to_uppercase)
        .collect();
    let svg = format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="128" height="128" viewBox="0 0 128 128"><rect width="128" height="128" fill="#877eff"/><text x="50%" y="50%" dominant-baseline="central" text-anchor="middle" font-family="sans-serif" font-size="52" fill="#ffffff">{text}</text></svg>"##
    );
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/svg+xml".to_string()),
            (header::CACHE_CONTROL, "public, max-age=86400".to_string()),
        ],
        svg,
    )
        .into_response()
}
