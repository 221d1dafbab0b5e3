pub mod auth;
pub mod posts;
pub mod storage;
pub mod users;

use axum::extract::Multipart;
use axum::Router;
use std::collections::HashMap;
use tower_http::trace::TraceLayer;

use crate::error::AppResult;
use crate::model::Upload;
use crate::state::AppState;

/// The full application router with state applied
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(auth::router())
        .merge(posts::router())
        .merge(users::router())
        .merge(storage::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Text fields plus the optional `file` part of a multipart form
#[derive(Debug, Default)]
pub struct MultipartForm {
    pub fields: HashMap<String, String>,
    pub file: Option<Upload>,
}

impl MultipartForm {
    pub async fn read(mut multipart: Multipart) -> AppResult<Self> {
        let mut form = MultipartForm::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            if name == "file" {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let mime_type = field.content_type().map(str::to_string);
                let data = field.bytes().await?;
                form.file = Some(Upload {
                    name: file_name,
                    mime_type,
                    data,
                });
            } else {
                let value = field.text().await?;
                form.fields.insert(name, value);
            }
        }
        Ok(form)
    }

    pub fn text(&self, name: &str) -> String {
        self.fields
            .get(name)
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    }

    pub fn optional_text(&self, name: &str) -> Option<String> {
        Some(self.text(name)).filter(|v| !v.is_empty())
    }
}
