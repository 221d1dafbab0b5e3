use axum::extract::{Multipart, Path, Query};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use super::MultipartForm;
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentSession;
use crate::interaction::{LikeView, SaveView};
use crate::model::{NewPost, Page, Post, PostId, UpdatePost, Upload, User};
use crate::session::ClientSession;
use crate::state::AppState;

/// A post as the signed-in user sees it, interaction state included
#[derive(Serialize)]
pub struct PostView {
    #[serde(flatten)]
    pub post: Post,
    pub like: LikeView,
    pub saved: SaveView,
}

#[derive(Serialize)]
struct PageView {
    posts: Vec<PostView>,
    cursor: Option<String>,
}

#[derive(Serialize)]
struct FeedResponse {
    pages: Vec<PageView>,
    has_next_page: bool,
}

#[derive(Serialize)]
struct NextPageResponse {
    page: Option<PageView>,
    has_next_page: bool,
}

#[derive(Serialize)]
struct SearchResponse {
    term: String,
    sequence: u64,
    /// False when a newer search superseded this one
    current: bool,
    posts: Vec<PostView>,
}

#[derive(Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/posts", post(create_post))
        .route("/api/posts/recent", get(recent_posts))
        .route(
            "/api/posts/{id}",
            get(get_post).put(update_post).delete(delete_post),
        )
        .route("/api/posts/{id}/like", post(like_post))
        .route("/api/posts/{id}/save", post(save_post))
        .route("/api/explore", get(explore))
        .route("/api/explore/next", post(explore_next))
        .route("/api/explore/search", get(search))
        .route("/api/explore/search/input", post(search_input))
        .route("/api/explore/search/results", get(search_results))
        .route("/api/saved", get(saved_posts))
}

fn post_view(session: &ClientSession, user: &User, post: Post) -> PostView {
    let like = session.interactions.observe_post(&post);
    let saved = session.interactions.observe_saves(user, &post.id);
    PostView { post, like, saved }
}

pub(super) fn post_views(session: &ClientSession, user: &User, posts: Vec<Post>) -> Vec<PostView> {
    posts
        .into_iter()
        .map(|post| post_view(session, user, post))
        .collect()
}

fn page_view(session: &ClientSession, user: &User, page: Page) -> PageView {
    PageView {
        cursor: page.cursor.as_ref().map(ToString::to_string),
        posts: post_views(session, user, page.posts),
    }
}

async fn require_creator(session: &ClientSession, id: &PostId) -> AppResult<Post> {
    let post = session.queries.get_post_by_id(id).await?;
    if &post.creator != session.interactions.user() {
        return Err(AppError::Forbidden);
    }
    Ok(post)
}

async fn create_post(
    CurrentSession(session): CurrentSession,
    multipart: Multipart,
) -> AppResult<Response> {
    let form = MultipartForm::read(multipart).await?;
    let file = form.file.clone().unwrap_or_else(|| Upload {
        name: String::new(),
        mime_type: None,
        data: Default::default(),
    });

    let created = session
        .queries
        .create_post(NewPost {
            creator: session.interactions.user().clone(),
            caption: form.text("caption"),
            file,
            location: form.text("location"),
            tags: form.text("tags"),
        })
        .await?;

    let user = session.current_user().await?;
    Ok((StatusCode::CREATED, Json(post_view(&session, &user, created))).into_response())
}

async fn recent_posts(CurrentSession(session): CurrentSession) -> AppResult<Response> {
    let user = session.current_user().await?;
    let posts = session.queries.get_recent_posts().await?;
    Ok(Json(post_views(&session, &user, posts)).into_response())
}

async fn get_post(
    CurrentSession(session): CurrentSession,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let user = session.current_user().await?;
    let post = session.queries.get_post_by_id(&PostId::new(id)).await?;
    Ok(Json(post_view(&session, &user, post)).into_response())
}

async fn update_post(
    CurrentSession(session): CurrentSession,
    Path(id): Path<String>,
    multipart: Multipart,
) -> AppResult<Response> {
    let id = PostId::new(id);
    require_creator(&session, &id).await?;
    let form = MultipartForm::read(multipart).await?;

    let updated = session
        .queries
        .update_post(UpdatePost {
            post_id: id,
            caption: form.text("caption"),
            location: form.text("location"),
            tags: form.text("tags"),
            file: form.file.clone(),
        })
        .await?;

    let user = session.current_user().await?;
    Ok(Json(post_view(&session, &user, updated)).into_response())
}

async fn delete_post(
    CurrentSession(session): CurrentSession,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let id = PostId::new(id);
    require_creator(&session, &id).await?;
    session.queries.delete_post(&id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn like_post(
    CurrentSession(session): CurrentSession,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let post = session.queries.get_post_by_id(&PostId::new(id)).await?;
    let view = session.interactions.toggle_like(&post).await?;
    Ok(Json(view).into_response())
}

async fn save_post(
    CurrentSession(session): CurrentSession,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let id = PostId::new(id);
    session.queries.get_post_by_id(&id).await?;
    let user = session.current_user().await?;
    let view = session.interactions.toggle_save(&user, &id).await?;
    Ok(Json(view).into_response())
}

async fn explore(CurrentSession(session): CurrentSession) -> AppResult<Response> {
    let user = session.current_user().await?;
    let pages = session.queries.get_infinite_posts().await?;
    let has_next_page = session.queries.infinite_posts().has_next_page().await;
    Ok(Json(FeedResponse {
        pages: pages
            .into_iter()
            .map(|page| page_view(&session, &user, page))
            .collect(),
        has_next_page,
    })
    .into_response())
}

async fn explore_next(CurrentSession(session): CurrentSession) -> AppResult<Response> {
    let user = session.current_user().await?;
    let page = session.queries.fetch_next_page().await?;
    let has_next_page = session.queries.infinite_posts().has_next_page().await;
    Ok(Json(NextPageResponse {
        page: page.map(|page| page_view(&session, &user, page)),
        has_next_page,
    })
    .into_response())
}

async fn search(
    CurrentSession(session): CurrentSession,
    Query(params): Query<SearchParams>,
) -> AppResult<Response> {
    let current = session.search.search(&params.q).await?;
    let results = session.search.results();
    let user = session.current_user().await?;
    Ok(Json(SearchResponse {
        term: results.term,
        sequence: results.sequence,
        current,
        posts: post_views(&session, &user, results.posts),
    })
    .into_response())
}

/// Keystroke-level input; the search itself runs after the debounce delay
async fn search_input(
    CurrentSession(session): CurrentSession,
    Json(params): Json<SearchParams>,
) -> AppResult<Response> {
    session.type_search(&params.q);
    Ok(StatusCode::ACCEPTED.into_response())
}

async fn search_results(CurrentSession(session): CurrentSession) -> AppResult<Response> {
    let results = session.search.results();
    let user = session.current_user().await?;
    Ok(Json(SearchResponse {
        term: results.term,
        sequence: results.sequence,
        current: true,
        posts: post_views(&session, &user, results.posts),
    })
    .into_response())
}

async fn saved_posts(CurrentSession(session): CurrentSession) -> AppResult<Response> {
    let user = session.current_user().await?;
    let posts = session.queries.get_saved_posts(&user.id).await?;
    Ok(Json(post_views(&session, &user, posts)).into_response())
}
