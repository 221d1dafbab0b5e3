use axum::extract::{Multipart, Path, Query};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use super::posts::{post_views, PostView};
use super::MultipartForm;
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentSession;
use crate::model::{UpdateUser, User, UserId};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct UsersParams {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
struct ProfileResponse {
    user: User,
    posts: Vec<PostView>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/users", get(list_users))
        .route("/api/profile/{id}", get(profile).put(update_profile))
}

async fn list_users(
    CurrentSession(session): CurrentSession,
    Query(params): Query<UsersParams>,
) -> AppResult<Response> {
    let users = session.queries.get_users(params.limit).await?;
    Ok(Json(users).into_response())
}

async fn profile(
    CurrentSession(session): CurrentSession,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let id = UserId::new(id);
    let user = session.queries.get_user_by_id(&id).await?;
    let viewer = session.current_user().await?;
    let posts = session.queries.get_user_posts(&id).await?;

    Ok(Json(ProfileResponse {
        user,
        posts: post_views(&session, &viewer, posts),
    })
    .into_response())
}

/// Only the signed-in user may edit their own profile
async fn update_profile(
    CurrentSession(session): CurrentSession,
    Path(id): Path<String>,
    multipart: Multipart,
) -> AppResult<Response> {
    let id = UserId::new(id);
    if &id != session.interactions.user() {
        return Err(AppError::Forbidden);
    }
    let form = MultipartForm::read(multipart).await?;

    let user = session
        .queries
        .update_user(UpdateUser {
            user_id: id,
            name: form.text("name"),
            bio: form.optional_text("bio"),
            file: form.file.clone(),
        })
        .await?;
    Ok(Json(user).into_response())
}
