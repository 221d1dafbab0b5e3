use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::config::AuthConfig;
use crate::error::AppResult;
use crate::extractors::CurrentSession;
use crate::model::NewUser;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SignUpRequest {
    pub name: String,
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/sign-up", post(sign_up))
        .route("/api/sign-in", post(sign_in))
        .route("/api/sign-out", post(sign_out))
        .route("/api/me", get(me))
}

fn session_cookie(auth: &AuthConfig, token: &str) -> String {
    format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        auth.cookie_name,
        token,
        auth.session_hours * 3600
    )
}

fn clear_session_cookie(auth: &AuthConfig) -> String {
    format!(
        "{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0",
        auth.cookie_name
    )
}

/// Create the account and profile, then sign straight in
async fn sign_up(
    State(state): State<AppState>,
    Json(req): Json<SignUpRequest>,
) -> AppResult<Response> {
    let user = state
        .gateway
        .create_user_account(NewUser {
            name: req.name.trim().to_string(),
            username: req.username.trim().to_string(),
            email: req.email.trim().to_string(),
            password: req.password.clone(),
        })
        .await?;

    let session = state
        .gateway
        .sign_in_account(&user.email, &req.password)
        .await?;
    tracing::info!(user_id = %user.id, "Signed up");

    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, session_cookie(&state.config.auth, &session.token))],
        Json(user),
    )
        .into_response())
}

async fn sign_in(
    State(state): State<AppState>,
    Json(req): Json<SignInRequest>,
) -> AppResult<Response> {
    let session = state
        .gateway
        .sign_in_account(req.email.trim(), &req.password)
        .await?;
    let client = state.sessions.get_or_open(&session.token).await?;
    let user = client.current_user().await?;

    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, session_cookie(&state.config.auth, &session.token))],
        Json(user),
    )
        .into_response())
}

async fn sign_out(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> AppResult<Response> {
    session.queries.sign_out_account(&session.token).await?;
    state.sessions.remove(&session.token);

    Ok((
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, clear_session_cookie(&state.config.auth))],
    )
        .into_response())
}

async fn me(CurrentSession(session): CurrentSession) -> AppResult<Response> {
    let user = session.current_user().await?;
    Ok(Json(user).into_response())
}
