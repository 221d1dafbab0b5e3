mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::Harness;
use snapgram::config::Config;
use snapgram::routes;
use snapgram::state::AppState;

const BOUNDARY: &str = "snapgram-test-boundary";

fn app(h: &Harness) -> Router {
    routes::app(AppState::new(Config::default(), h.gateway.clone()))
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Option<String>, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(str::to_string);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, cookie, json)
}

fn json_request(method: &str, uri: &str, cookie: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn empty_request(method: &str, uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

fn multipart_request(
    method: &str,
    uri: &str,
    cookie: &str,
    fields: &[(&str, &str)],
    file: Option<&[u8]>,
) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some(data) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"photo.png\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(method)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .header(header::COOKIE, cookie)
        .body(Body::from(body))
        .unwrap()
}

async fn sign_up(app: &Router, name: &str, username: &str, email: &str) -> (String, Value) {
    let (status, cookie, user) = send(
        app,
        json_request(
            "POST",
            "/api/sign-up",
            None,
            json!({
                "name": name,
                "username": username,
                "email": email,
                "password": "password123",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "sign-up failed: {user}");
    (cookie.expect("session cookie"), user)
}

#[tokio::test]
async fn test_me_requires_session_cookie() {
    let h = Harness::new();
    let app = app(&h);

    let (status, _, _) = send(&app, empty_request("GET", "/api/me", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = send(
        &app,
        empty_request("GET", "/api/me", Some("snapgram_session=bogus")),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_sign_up_sign_in_and_sign_out() {
    let h = Harness::new();
    let app = app(&h);
    let (cookie, user) = sign_up(&app, "Ada Lovelace", "ada", "ada@example.com").await;
    assert!(cookie.starts_with("snapgram_session="));
    assert_eq!(user["username"], "ada");

    let (status, _, me) = send(&app, empty_request("GET", "/api/me", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["id"], user["id"]);

    let (status, second_cookie, _) = send(
        &app,
        json_request(
            "POST",
            "/api/sign-in",
            None,
            json!({ "email": "ada@example.com", "password": "password123" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(second_cookie.as_deref(), Some(cookie.as_str()));

    let (status, _, _) = send(&app, empty_request("POST", "/api/sign-out", Some(&cookie))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _, _) = send(&app, empty_request("GET", "/api/me", Some(&cookie))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_sign_up_validation_errors_are_422() {
    let h = Harness::new();
    let app = app(&h);
    let (status, _, body) = send(
        &app,
        json_request(
            "POST",
            "/api/sign-up",
            None,
            json!({ "name": "A", "username": "ada", "email": "nope", "password": "password123" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let fields: Vec<&str> = body["fields"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["field"].as_str().unwrap())
        .collect();
    assert_eq!(fields, vec!["name", "email"]);
}

#[tokio::test]
async fn test_post_like_save_and_explore() {
    let h = Harness::new();
    let app = app(&h);
    let (cookie, user) = sign_up(&app, "Ada Lovelace", "ada", "ada@example.com").await;

    let (status, _, post) = send(
        &app,
        multipart_request(
            "POST",
            "/api/posts",
            &cookie,
            &[
                ("caption", "Sunset over the river"),
                ("location", "Lisbon"),
                ("tags", "travel, food"),
            ],
            Some(b"\x89PNG fake image".as_slice()),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create failed: {post}");
    assert_eq!(post["creator"], user["id"]);
    assert_eq!(post["tags"], json!(["travel", "food"]));
    assert_eq!(post["like"]["count"], 0);
    let post_id = post["id"].as_str().unwrap().to_string();

    let (status, _, like) = send(
        &app,
        empty_request("POST", &format!("/api/posts/{post_id}/like"), Some(&cookie)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(like["liked"], true);
    assert_eq!(like["count"], 1);
    assert_eq!(like["state"], "confirmed");

    let (status, _, feed) = send(&app, empty_request("GET", "/api/explore", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
    let first = &feed["pages"][0]["posts"][0];
    assert_eq!(first["id"], post_id.as_str());
    assert_eq!(first["like"]["liked"], true);

    let (status, _, save) = send(
        &app,
        empty_request("POST", &format!("/api/posts/{post_id}/save"), Some(&cookie)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(save["saved"], true);

    let (_, _, saved) = send(&app, empty_request("GET", "/api/saved", Some(&cookie))).await;
    assert_eq!(saved.as_array().unwrap().len(), 1);
    assert_eq!(saved[0]["saved"]["saved"], true);

    let (status, _, search) = send(
        &app,
        empty_request("GET", "/api/explore/search?q=sunset", Some(&cookie)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(search["current"], true);
    assert_eq!(search["posts"].as_array().unwrap().len(), 1);

    let image_url = post["image_url"].as_str().unwrap().to_string();
    let response = app
        .clone()
        .oneshot(empty_request("GET", &image_url, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
}

#[tokio::test]
async fn test_post_without_image_is_rejected() {
    let h = Harness::new();
    let app = app(&h);
    let (cookie, _) = sign_up(&app, "Ada Lovelace", "ada", "ada@example.com").await;

    let (status, _, body) = send(
        &app,
        multipart_request(
            "POST",
            "/api/posts",
            &cookie,
            &[("caption", "Sunset over the river"), ("location", "Lisbon")],
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["fields"][0]["field"], "file");
    assert_eq!(h.stored_file_count(), 0);
}

#[tokio::test]
async fn test_only_creator_may_edit_or_delete() {
    let h = Harness::new();
    let app = app(&h);
    let (ada, _) = sign_up(&app, "Ada Lovelace", "ada", "ada@example.com").await;
    let (bob, bob_user) = sign_up(&app, "Bob Builder", "bob", "bob@example.com").await;

    let (_, _, post) = send(
        &app,
        multipart_request(
            "POST",
            "/api/posts",
            &ada,
            &[("caption", "Sunset over the river"), ("location", "Lisbon")],
            Some(b"image".as_slice()),
        ),
    )
    .await;
    let uri = format!("/api/posts/{}", post["id"].as_str().unwrap());

    let (status, _, _) = send(&app, empty_request("DELETE", &uri, Some(&bob))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, _) = send(
        &app,
        multipart_request(
            "PUT",
            &format!("/api/profile/{}", post["creator"].as_str().unwrap()),
            &bob,
            &[("name", "Mallory")],
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, profile) = send(
        &app,
        multipart_request(
            "PUT",
            &format!("/api/profile/{}", bob_user["id"].as_str().unwrap()),
            &bob,
            &[("name", "Robert Builder"), ("bio", "Can we fix it")],
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["name"], "Robert Builder");
    assert_eq!(profile["bio"], "Can we fix it");

    let (status, _, _) = send(&app, empty_request("DELETE", &uri, Some(&ada))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _, _) = send(&app, empty_request("GET", &uri, Some(&ada))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_debounced_search_input_settles_on_last_term() {
    let h = Harness::new();
    let mut config = Config::default();
    config.search.debounce_ms = 50;
    let app = routes::app(AppState::new(config, h.gateway.clone()));
    let (cookie, _) = sign_up(&app, "Ada Lovelace", "ada", "ada@example.com").await;
    send(
        &app,
        multipart_request(
            "POST",
            "/api/posts",
            &cookie,
            &[("caption", "Sunset over the river"), ("location", "Lisbon")],
            Some(b"image".as_slice()),
        ),
    )
    .await;

    for q in ["s", "su", "sunset"] {
        let (status, _, _) = send(
            &app,
            json_request(
                "POST",
                "/api/explore/search/input",
                Some(&cookie),
                json!({ "q": q }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    let mut results = Value::Null;
    for _ in 0..40 {
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        let (_, _, body) = send(
            &app,
            empty_request("GET", "/api/explore/search/results", Some(&cookie)),
        )
        .await;
        if body["term"] == "sunset" {
            results = body;
            break;
        }
    }
    assert_eq!(results["term"], "sunset");
    assert_eq!(results["posts"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_expired_session_is_rejected_and_evicted() {
    let h = Harness::new();
    let state = AppState::new(Config::default(), h.gateway.clone());
    let app = routes::app(state.clone());
    let (cookie, _) = sign_up(&app, "Ada Lovelace", "ada", "ada@example.com").await;

    let (status, _, _) = send(&app, empty_request("GET", "/api/posts/recent", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state.sessions.len(), 1);

    let token = cookie.split_once('=').unwrap().1.to_string();
    h.pool
        .get()
        .unwrap()
        .execute(
            "UPDATE sessions SET expires_at = '2000-01-01T00:00:00.000000Z' WHERE token = ?1",
            [&token],
        )
        .unwrap();

    for uri in ["/api/posts/recent", "/api/users", "/api/me"] {
        let (status, _, _) = send(&app, empty_request("GET", uri, Some(&cookie))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri} accepted an expired session");
    }
    assert!(state.sessions.is_empty());
}
