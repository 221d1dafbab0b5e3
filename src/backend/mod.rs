//! Backend-as-a-service boundary.
//!
//! Accounts, documents and files are reached only through these traits. The
//! gateway receives a [`BackendClient`] built once at startup; nothing here is
//! a process-wide global.

mod files;
mod sqlite;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

use crate::model::{AccountId, FeedCursor, FileId};

pub use self::files::DiskFileStorage;
pub use self::sqlite::SqliteBackend;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Password hashing error: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid credentials")]
    Unauthorized,

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// A stored document as the service returns it: untyped fields plus metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: String,
    pub collection: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    CreatedAt,
    UpdatedAt,
}

/// Filters and paging applied by [`DocumentStore::list_documents`].
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// String field equals value
    Equal(&'static str, String),
    /// Case-insensitive substring match on a string field
    Search(&'static str, String),
    OrderDesc(SortField),
    Limit(usize),
    /// Only documents strictly after the cursor in `updated_at` descending order
    CursorAfter(FeedCursor),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    pub id: AccountId,
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub account_id: AccountId,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub id: FileId,
    pub name: String,
    pub mime_type: Option<String>,
    pub size: u64,
}

#[async_trait]
pub trait AccountService: Send + Sync {
    async fn create_account(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> BackendResult<Account>;

    /// Email + password sign-in
    async fn create_session(&self, email: &str, password: &str) -> BackendResult<Session>;

    async fn current_account(&self, token: &str) -> BackendResult<Account>;

    /// The live session behind `token`; expired or unknown tokens are `Unauthorized`
    async fn session(&self, token: &str) -> BackendResult<Session>;

    async fn delete_session(&self, token: &str) -> BackendResult<()>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn create_document(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> BackendResult<Document>;

    async fn get_document(&self, collection: &str, id: &str) -> BackendResult<Document>;

    /// Merge `fields` into the stored document and bump `updated_at`
    async fn update_document(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> BackendResult<Document>;

    async fn delete_document(&self, collection: &str, id: &str) -> BackendResult<()>;

    async fn list_documents(
        &self,
        collection: &str,
        queries: &[Query],
    ) -> BackendResult<Vec<Document>>;
}

#[async_trait]
pub trait FileStorage: Send + Sync {
    async fn create_file(
        &self,
        data: Bytes,
        name: &str,
        mime_type: Option<&str>,
    ) -> BackendResult<StoredFile>;

    /// URL of a display-sized preview of the file
    async fn preview_url(&self, id: &FileId) -> BackendResult<String>;

    async fn read_file(&self, id: &FileId) -> BackendResult<(Bytes, StoredFile)>;

    async fn delete_file(&self, id: &FileId) -> BackendResult<()>;
}

/// Collection names used for each entity
#[derive(Debug, Clone)]
pub struct Collections {
    pub users: String,
    pub posts: String,
    pub saves: String,
}

impl Default for Collections {
    fn default() -> Self {
        Self {
            users: "users".to_string(),
            posts: "posts".to_string(),
            saves: "saves".to_string(),
        }
    }
}

/// Connection handles to every backend service
#[derive(Clone)]
pub struct BackendClient {
    pub accounts: Arc<dyn AccountService>,
    pub documents: Arc<dyn DocumentStore>,
    pub files: Arc<dyn FileStorage>,
    pub collections: Collections,
}

impl BackendClient {
    pub fn new(
        accounts: Arc<dyn AccountService>,
        documents: Arc<dyn DocumentStore>,
        files: Arc<dyn FileStorage>,
    ) -> Self {
        Self {
            accounts,
            documents,
            files,
            collections: Collections::default(),
        }
    }

    /// Self-hosted backend: SQLite for accounts and documents, disk for files
    pub fn self_hosted(backend: SqliteBackend, files: DiskFileStorage) -> Self {
        let backend = Arc::new(backend);
        Self::new(backend.clone(), backend, Arc::new(files))
    }
}
