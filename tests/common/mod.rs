#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use snapgram::backend::{
    BackendClient, BackendError, BackendResult, DiskFileStorage, Document, DocumentStore,
    FileStorage, Query, SqliteBackend, StoredFile,
};
use snapgram::config::FeedConfig;
use snapgram::db::{self, DbPool};
use snapgram::gateway::Gateway;
use snapgram::model::{FileId, NewPost, NewUser, Post, Upload, User};

/// Document store that can fail or hold back selected calls
pub struct FaultyDocuments {
    inner: Arc<SqliteBackend>,
    fail_create_in: Mutex<Option<String>>,
    fail_updates: AtomicBool,
    gate_updates: AtomicBool,
    update_gate: Semaphore,
    search_delays: Mutex<HashMap<String, Duration>>,
}

impl FaultyDocuments {
    pub fn fail_creates_in(&self, collection: &str) {
        *self.fail_create_in.lock().unwrap() = Some(collection.to_string());
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// Hold every update until [`release_update`](Self::release_update)
    pub fn gate_updates(&self) {
        self.gate_updates.store(true, Ordering::SeqCst);
    }

    pub fn release_update(&self) {
        self.update_gate.add_permits(1);
    }

    pub fn delay_search(&self, term: &str, delay: Duration) {
        self.search_delays
            .lock()
            .unwrap()
            .insert(term.to_string(), delay);
    }
}

#[async_trait]
impl DocumentStore for FaultyDocuments {
    async fn create_document(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> BackendResult<Document> {
        let failing = self.fail_create_in.lock().unwrap().clone();
        if failing.as_deref() == Some(collection) {
            return Err(BackendError::Unavailable("create refused".into()));
        }
        self.inner.create_document(collection, id, fields).await
    }

    async fn get_document(&self, collection: &str, id: &str) -> BackendResult<Document> {
        self.inner.get_document(collection, id).await
    }

    async fn update_document(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> BackendResult<Document> {
        if self.gate_updates.load(Ordering::SeqCst) {
            self.update_gate.acquire().await.unwrap().forget();
        }
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("update refused".into()));
        }
        self.inner.update_document(collection, id, fields).await
    }

    async fn delete_document(&self, collection: &str, id: &str) -> BackendResult<()> {
        self.inner.delete_document(collection, id).await
    }

    async fn list_documents(
        &self,
        collection: &str,
        queries: &[Query],
    ) -> BackendResult<Vec<Document>> {
        let delay = queries.iter().find_map(|q| match q {
            Query::Search(_, term) => self.search_delays.lock().unwrap().get(term).copied(),
            _ => None,
        });
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.list_documents(collection, queries).await
    }
}

/// File storage that counts deletions and can refuse them
pub struct CountingFiles {
    inner: DiskFileStorage,
    deletes: AtomicUsize,
    fail_deletes: AtomicBool,
}

impl CountingFiles {
    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl FileStorage for CountingFiles {
    async fn create_file(
        &self,
        data: Bytes,
        name: &str,
        mime_type: Option<&str>,
    ) -> BackendResult<StoredFile> {
        self.inner.create_file(data, name, mime_type).await
    }

    async fn preview_url(&self, id: &FileId) -> BackendResult<String> {
        self.inner.preview_url(id).await
    }

    async fn read_file(&self, id: &FileId) -> BackendResult<(Bytes, StoredFile)> {
        self.inner.read_file(id).await
    }

    async fn delete_file(&self, id: &FileId) -> BackendResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("delete refused".into()));
        }
        self.inner.delete_file(id).await
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub pool: DbPool,
    pub documents: Arc<FaultyDocuments>,
    pub files: Arc<CountingFiles>,
    pub gateway: Gateway,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_feed(FeedConfig::default())
    }

    pub fn with_feed(feed: FeedConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let pool = db::create_pool(&dir.path().join("test.db")).unwrap();
        db::run_migrations(&pool).unwrap();

        let sqlite = Arc::new(SqliteBackend::new(pool.clone(), 24).with_hash_cost(4));
        let documents = Arc::new(FaultyDocuments {
            inner: sqlite.clone(),
            fail_create_in: Mutex::new(None),
            fail_updates: AtomicBool::new(false),
            gate_updates: AtomicBool::new(false),
            update_gate: Semaphore::new(0),
            search_delays: Mutex::new(HashMap::new()),
        });
        let files = Arc::new(CountingFiles {
            inner: DiskFileStorage::new(pool.clone(), dir.path().join("uploads"), "/storage"),
            deletes: AtomicUsize::new(0),
            fail_deletes: AtomicBool::new(false),
        });

        let backend = BackendClient::new(sqlite, documents.clone(), files.clone());
        let gateway = Gateway::new(backend, feed);
        Self {
            dir,
            pool,
            documents,
            files,
            gateway,
        }
    }

    pub fn stored_file_count(&self) -> i64 {
        let conn = self.pool.get().unwrap();
        conn.query_row("SELECT COUNT(*) FROM files", [], |r| r.get(0))
            .unwrap()
    }

    pub async fn sign_up(&self, name: &str, email: &str) -> User {
        self.gateway
            .create_user_account(NewUser {
                name: name.to_string(),
                username: name.to_lowercase().replace(' ', "_"),
                email: email.to_string(),
                password: "password123".to_string(),
            })
            .await
            .unwrap()
    }

    pub async fn post(&self, creator: &User, caption: &str) -> Post {
        self.gateway
            .create_post(NewPost {
                creator: creator.id.clone(),
                caption: caption.to_string(),
                file: image("photo.png"),
                location: "Lisbon".to_string(),
                tags: "travel, food".to_string(),
            })
            .await
            .unwrap()
    }
}

pub fn image(name: &str) -> Upload {
    Upload {
        name: name.to_string(),
        mime_type: Some("image/png".to_string()),
        data: Bytes::from_static(b"\x89PNG\r\n\x1a\nfake image bytes"),
    }
}
