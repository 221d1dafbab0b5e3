// File storage on local disk with metadata rows in SQLite
use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, OptionalExtension};
use std::path::PathBuf;

use super::{BackendError, BackendResult, FileStorage, StoredFile};
use crate::db::DbPool;
use crate::model::FileId;

pub struct DiskFileStorage {
    db: DbPool,
    root: PathBuf,
    public_url: String,
}

impl DiskFileStorage {
    pub fn new(db: DbPool, root: impl Into<PathBuf>, public_url: impl Into<String>) -> Self {
        Self {
            db,
            root: root.into(),
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn path_for(&self, id: &FileId) -> PathBuf {
        self.root.join(id.as_str())
    }

    fn lookup(&self, id: &FileId) -> BackendResult<StoredFile> {
        let conn = self.db.get()?;
        conn.query_row(
            "SELECT id, name, mime_type, size FROM files WHERE id = ?1",
            params![id.as_str()],
            |row| {
                Ok(StoredFile {
                    id: FileId::new(row.get::<_, String>(0)?),
                    name: row.get(1)?,
                    mime_type: row.get(2)?,
                    size: row.get::<_, i64>(3)? as u64,
                })
            },
        )
        .optional()?
        .ok_or_else(|| BackendError::NotFound(format!("file {id}")))
    }
}

#[async_trait]
impl FileStorage for DiskFileStorage {
    async fn create_file(
        &self,
        data: Bytes,
        name: &str,
        mime_type: Option<&str>,
    ) -> BackendResult<StoredFile> {
        let id = FileId::new(uuid::Uuid::now_v7().to_string());
        let mime_type = mime_type.map(str::to_string).or_else(|| {
            mime_guess::from_path(name)
                .first()
                .map(|m| m.essence_str().to_string())
        });

        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(self.path_for(&id), &data).await?;

        let file = StoredFile {
            id,
            name: name.to_string(),
            mime_type,
            size: data.len() as u64,
        };

        let conn = self.db.get()?;
        conn.execute(
            "INSERT INTO files (id, name, mime_type, size) VALUES (?1, ?2, ?3, ?4)",
            params![file.id.as_str(), file.name, file.mime_type, file.size as i64],
        )?;

        tracing::debug!(file_id = %file.id, size = file.size, "Stored file");
        Ok(file)
    }

    async fn preview_url(&self, id: &FileId) -> BackendResult<String> {
        self.lookup(id)?;
        Ok(format!("{}/{}/preview", self.public_url, id))
    }

    async fn read_file(&self, id: &FileId) -> BackendResult<(Bytes, StoredFile)> {
        let file = self.lookup(id)?;
        let data = tokio::fs::read(self.path_for(id)).await?;
        Ok((Bytes::from(data), file))
    }

    async fn delete_file(&self, id: &FileId) -> BackendResult<()> {
        {
            let conn = self.db.get()?;
            let deleted = conn.execute("DELETE FROM files WHERE id = ?1", params![id.as_str()])?;
            if deleted == 0 {
                return Err(BackendError::NotFound(format!("file {id}")));
            }
        }

        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(file_id = %id, "File metadata existed without blob");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
