//! Remote data gateway.
//!
//! One method per domain operation, each mapped onto the backend services in
//! [`BackendClient`]. The gateway owns no state of its own. Documents are
//! decoded into typed entities here so malformed data never leaves this
//! module.

use bytes::Bytes;
use futures::future::join_all;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::backend::{BackendClient, BackendError, Query, Session, SortField, StoredFile};
use crate::config::FeedConfig;
use crate::model::{
    decode_all, dedup_likes, parse_tags, DecodeError, FeedCursor, FileId, NewPost, NewUser,
    Page, Post, PostId, RecordId, SavedPostRecord, UpdatePost, UpdateUser, Upload, User, UserId,
};
use crate::validation::{self, ValidationErrors};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Backend error: {0}")]
    Backend(BackendError),

    #[error("Malformed document: {0}")]
    Decode(#[from] DecodeError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,
}

impl From<BackendError> for GatewayError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotFound(what) => GatewayError::NotFound(what),
            BackendError::Unauthorized => GatewayError::Unauthorized,
            other => GatewayError::Backend(other),
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn saved_record_id(user: &UserId, post: &PostId) -> RecordId {
    RecordId::new(format!("{}_{}", user.as_str(), post.as_str()))
}

/// Placeholder avatar built from the initials of a display name
pub fn initials_avatar_url(name: &str) -> String {
    let initials: String = name
        .split_whitespace()
        .filter_map(|word| word.chars().next())
        .take(2)
        .flat_map(char::to_uppercase)
        .collect();
    format!("/avatars/initials/{}", initials)
}

#[derive(Clone)]
pub struct Gateway {
    backend: BackendClient,
    feed: FeedConfig,
}

impl Gateway {
    pub fn new(backend: BackendClient, feed: FeedConfig) -> Self {
        Self { backend, feed }
    }

    // --- Accounts ---

    pub async fn create_user_account(&self, user: NewUser) -> GatewayResult<User> {
        validation::validate_sign_up(&user.name, &user.username, &user.email, &user.password)?;

        let account = self
            .backend
            .accounts
            .create_account(&user.email, &user.password, &user.name)
            .await?;

        let fields = object(json!({
            "account_id": account.id.as_str(),
            "name": account.name,
            "username": user.username,
            "email": account.email,
            "image_url": initials_avatar_url(&user.name),
            "image_id": Value::Null,
            "bio": Value::Null,
        }));

        let doc = self
            .backend
            .documents
            .create_document(&self.backend.collections.users, &new_id(), fields)
            .await
            .map_err(|e| {
                tracing::error!(account_id = %account.id, "Account created but user record failed: {}", e);
                e
            })?;

        Ok(User::try_from(&doc)?)
    }

    pub async fn sign_in_account(&self, email: &str, password: &str) -> GatewayResult<Session> {
        validation::validate_sign_in(email, password)?;
        Ok(self
            .backend
            .accounts
            .create_session(email, password)
            .await?)
    }

    pub async fn sign_out_account(&self, token: &str) -> GatewayResult<()> {
        Ok(self.backend.accounts.delete_session(token).await?)
    }

    /// The session behind `token` if it is still live
    pub async fn verify_session(&self, token: &str) -> GatewayResult<Session> {
        Ok(self.backend.accounts.session(token).await?)
    }

    /// Profile of the account owning the session token
    pub async fn get_current_user(&self, token: &str) -> GatewayResult<User> {
        let account = self.backend.accounts.current_account(token).await?;
        let docs = self
            .backend
            .documents
            .list_documents(
                &self.backend.collections.users,
                &[Query::Equal("account_id", account.id.as_str().to_string())],
            )
            .await?;
        let doc = docs
            .first()
            .ok_or_else(|| GatewayError::NotFound(format!("user for account {}", account.id)))?;
        self.with_saved(User::try_from(doc)?).await
    }

    // --- Posts ---

    pub async fn create_post(&self, post: NewPost) -> GatewayResult<Post> {
        validation::validate_post(&post.caption, &post.location, !post.file.data.is_empty())?;

        let upload = self.upload(&post.file).await?;
        match self.persist_new_post(&post, &upload).await {
            Ok(created) => {
                tracing::info!(post_id = %created.id, "Created post");
                Ok(created)
            }
            Err(e) => {
                self.discard_upload(&upload.id).await;
                Err(e)
            }
        }
    }

    async fn persist_new_post(&self, post: &NewPost, upload: &StoredFile) -> GatewayResult<Post> {
        let image_url = self.backend.files.preview_url(&upload.id).await?;
        let fields = object(json!({
            "creator": post.creator.as_str(),
            "caption": post.caption,
            "image_id": upload.id.as_str(),
            "image_url": image_url,
            "location": post.location,
            "tags": parse_tags(&post.tags),
            "likes": Vec::<String>::new(),
        }));
        let doc = self
            .backend
            .documents
            .create_document(&self.backend.collections.posts, &new_id(), fields)
            .await?;
        Ok(Post::try_from(&doc)?)
    }

    pub async fn get_recent_posts(&self) -> GatewayResult<Vec<Post>> {
        self.list_posts(&[
            Query::OrderDesc(SortField::CreatedAt),
            Query::Limit(self.feed.recent_limit),
        ])
        .await
    }

    /// One page of the explore feed, strictly after `cursor`
    pub async fn get_infinite_posts(&self, cursor: Option<FeedCursor>) -> GatewayResult<Page> {
        let mut queries = vec![
            Query::OrderDesc(SortField::UpdatedAt),
            Query::Limit(self.feed.page_size),
        ];
        if let Some(cursor) = cursor {
            queries.push(Query::CursorAfter(cursor));
        }
        Ok(Page::new(self.list_posts(&queries).await?))
    }

    pub async fn search_posts(&self, term: &str) -> GatewayResult<Vec<Post>> {
        let term = term.trim();
        if term.is_empty() {
            return Ok(Vec::new());
        }
        self.list_posts(&[Query::Search("caption", term.to_string())])
            .await
    }

    pub async fn get_post_by_id(&self, id: &PostId) -> GatewayResult<Post> {
        let doc = self
            .backend
            .documents
            .get_document(&self.backend.collections.posts, id.as_str())
            .await?;
        Ok(Post::try_from(&doc)?)
    }

    pub async fn get_user_posts(&self, user: &UserId) -> GatewayResult<Vec<Post>> {
        self.list_posts(&[
            Query::Equal("creator", user.as_str().to_string()),
            Query::OrderDesc(SortField::CreatedAt),
        ])
        .await
    }

    pub async fn update_post(&self, update: UpdatePost) -> GatewayResult<Post> {
        validation::validate_post(&update.caption, &update.location, true)?;
        let existing = self.get_post_by_id(&update.post_id).await?;

        let mut fields = object(json!({
            "caption": update.caption,
            "location": update.location,
            "tags": parse_tags(&update.tags),
        }));

        let replacement = match &update.file {
            Some(file) if !file.data.is_empty() => Some(self.upload(file).await?),
            _ => None,
        };

        let result = async {
            if let Some(upload) = &replacement {
                let url = self.backend.files.preview_url(&upload.id).await?;
                fields.insert("image_id".into(), json!(upload.id.as_str()));
                fields.insert("image_url".into(), json!(url));
            }
            let doc = self
                .backend
                .documents
                .update_document(&self.backend.collections.posts, existing.id.as_str(), fields)
                .await?;
            Ok::<_, GatewayError>(Post::try_from(&doc)?)
        }
        .await;

        match (result, replacement) {
            (Ok(post), Some(_)) => {
                self.discard_upload(&existing.image_id).await;
                Ok(post)
            }
            (Ok(post), None) => Ok(post),
            (Err(e), Some(upload)) => {
                self.discard_upload(&upload.id).await;
                Err(e)
            }
            (Err(e), None) => Err(e),
        }
    }

    /// Delete a post, its saved records and its stored image
    pub async fn delete_post(&self, id: &PostId) -> GatewayResult<()> {
        let post = self.get_post_by_id(id).await?;
        self.backend
            .documents
            .delete_document(&self.backend.collections.posts, id.as_str())
            .await?;

        match self.saves_where(&[Query::Equal("post", id.as_str().to_string())]).await {
            Ok(records) => {
                let results =
                    join_all(records.iter().map(|record| self.delete_saved_post(&record.id))).await;
                for (record, result) in records.iter().zip(results) {
                    if let Err(e) = result {
                        tracing::warn!(record_id = %record.id, "Failed to remove saved record: {}", e);
                    }
                }
            }
            Err(e) => tracing::warn!(post_id = %id, "Failed to list saved records: {}", e),
        }

        self.discard_upload(&post.image_id).await;
        tracing::info!(post_id = %id, "Deleted post");
        Ok(())
    }

    /// Persist the full liker list computed by the caller
    pub async fn like_post(&self, id: &PostId, likes: &[UserId]) -> GatewayResult<Post> {
        let likes: Vec<String> = dedup_likes(likes)
            .into_iter()
            .map(|id| id.0)
            .collect();
        let doc = self
            .backend
            .documents
            .update_document(
                &self.backend.collections.posts,
                id.as_str(),
                object(json!({ "likes": likes })),
            )
            .await?;
        Ok(Post::try_from(&doc)?)
    }

    /// Save a post for a user. An existing record for the pair is returned as is.
    ///
    /// The record id is derived from the pair, so concurrent saves collide in
    /// the store instead of producing a second record.
    pub async fn save_post(&self, user: &UserId, post: &PostId) -> GatewayResult<SavedPostRecord> {
        let id = saved_record_id(user, post);
        let saves = &self.backend.collections.saves;
        let created = self
            .backend
            .documents
            .create_document(
                saves,
                id.as_str(),
                object(json!({ "user": user.as_str(), "post": post.as_str() })),
            )
            .await;

        let doc = match created {
            Ok(doc) => doc,
            Err(BackendError::Conflict(_)) => {
                self.backend.documents.get_document(saves, id.as_str()).await?
            }
            Err(e) => return Err(e.into()),
        };
        Ok(SavedPostRecord::try_from(&doc)?)
    }

    pub async fn find_saved_record(
        &self,
        user: &UserId,
        post: &PostId,
    ) -> GatewayResult<Option<SavedPostRecord>> {
        let records = self
            .saves_where(&[
                Query::Equal("user", user.as_str().to_string()),
                Query::Equal("post", post.as_str().to_string()),
            ])
            .await?;
        Ok(records.into_iter().next())
    }

    /// Remove a saved record. Removing a record that no longer exists succeeds.
    pub async fn delete_saved_post(&self, record: &RecordId) -> GatewayResult<()> {
        match self
            .backend
            .documents
            .delete_document(&self.backend.collections.saves, record.as_str())
            .await
        {
            Ok(()) | Err(BackendError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_saved_posts(&self, user: &UserId) -> GatewayResult<Vec<Post>> {
        let records = self
            .saves_where(&[Query::Equal("user", user.as_str().to_string())])
            .await?;
        let mut posts = Vec::with_capacity(records.len());
        for record in records {
            match self.get_post_by_id(&record.post).await {
                Ok(post) => posts.push(post),
                Err(GatewayError::NotFound(_)) => {
                    tracing::warn!(record_id = %record.id, "Saved record points at a missing post");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(posts)
    }

    // --- Users ---

    pub async fn get_users(&self, limit: Option<usize>) -> GatewayResult<Vec<User>> {
        let docs = self
            .backend
            .documents
            .list_documents(
                &self.backend.collections.users,
                &[
                    Query::OrderDesc(SortField::CreatedAt),
                    Query::Limit(limit.unwrap_or(self.feed.users_limit)),
                ],
            )
            .await?;
        Ok(decode_all(&docs)?)
    }

    pub async fn get_user_by_id(&self, id: &UserId) -> GatewayResult<User> {
        let doc = self
            .backend
            .documents
            .get_document(&self.backend.collections.users, id.as_str())
            .await?;
        self.with_saved(User::try_from(&doc)?).await
    }

    pub async fn update_user(&self, update: UpdateUser) -> GatewayResult<User> {
        let existing = self.get_user_by_id(&update.user_id).await?;
        validation::validate_profile(&update.name, &existing.username, &existing.email)?;

        let mut fields = object(json!({
            "name": update.name,
            "bio": update.bio,
        }));

        let replacement = match &update.file {
            Some(file) if !file.data.is_empty() => Some(self.upload(file).await?),
            _ => None,
        };

        let result = async {
            if let Some(upload) = &replacement {
                let url = self.backend.files.preview_url(&upload.id).await?;
                fields.insert("image_id".into(), json!(upload.id.as_str()));
                fields.insert("image_url".into(), json!(url));
            }
            let doc = self
                .backend
                .documents
                .update_document(&self.backend.collections.users, existing.id.as_str(), fields)
                .await?;
            Ok::<_, GatewayError>(User::try_from(&doc)?)
        }
        .await;

        match (result, replacement) {
            (Ok(user), upload) => {
                if let (Some(_), Some(old)) = (upload, &existing.image_id) {
                    self.discard_upload(old).await;
                }
                Ok(User {
                    saved: existing.saved,
                    ..user
                })
            }
            (Err(e), Some(upload)) => {
                self.discard_upload(&upload.id).await;
                Err(e)
            }
            (Err(e), None) => Err(e),
        }
    }

    // --- Files ---

    pub async fn read_file(&self, id: &FileId) -> GatewayResult<(Bytes, StoredFile)> {
        Ok(self.backend.files.read_file(id).await?)
    }

    // --- Helpers ---

    async fn upload(&self, file: &Upload) -> GatewayResult<StoredFile> {
        Ok(self
            .backend
            .files
            .create_file(file.data.clone(), &file.name, file.mime_type.as_deref())
            .await?)
    }

    /// Best-effort removal of a stored file; failures are logged, never returned
    async fn discard_upload(&self, id: &FileId) {
        if let Err(e) = self.backend.files.delete_file(id).await {
            tracing::warn!(file_id = %id, "Failed to delete stored file: {}", e);
        }
    }

    async fn list_posts(&self, queries: &[Query]) -> GatewayResult<Vec<Post>> {
        let docs = self
            .backend
            .documents
            .list_documents(&self.backend.collections.posts, queries)
            .await?;
        Ok(decode_all(&docs)?)
    }

    async fn saves_where(&self, queries: &[Query]) -> GatewayResult<Vec<SavedPostRecord>> {
        let docs = self
            .backend
            .documents
            .list_documents(&self.backend.collections.saves, queries)
            .await?;
        Ok(decode_all(&docs)?)
    }

    async fn with_saved(&self, mut user: User) -> GatewayResult<User> {
        user.saved = self
            .saves_where(&[Query::Equal("user", user.id.as_str().to_string())])
            .await?;
        Ok(user)
    }
}
