// Self-hosted accounts and document store on SQLite
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use rand::Rng;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, OptionalExtension};
use serde_json::{Map, Value};

use super::{
    Account, AccountService, BackendError, BackendResult, Document, DocumentStore, Query,
    Session, SortField,
};
use crate::db::DbPool;
use crate::model::AccountId;

pub struct SqliteBackend {
    pool: DbPool,
    session_hours: u64,
    hash_cost: u32,
}

impl SqliteBackend {
    pub fn new(pool: DbPool, session_hours: u64) -> Self {
        Self {
            pool,
            session_hours,
            hash_cost: bcrypt::DEFAULT_COST,
        }
    }

    /// Lower bcrypt cost, for tests
    pub fn with_hash_cost(mut self, cost: u32) -> Self {
        self.hash_cost = cost;
        self
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time at the precision timestamps are stored with
fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn parse_timestamp(s: &str) -> BackendResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| BackendError::InvalidQuery(format!("bad timestamp {s}: {e}")))
}

fn json_path(field: &str) -> BackendResult<String> {
    if field.is_empty() || !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(BackendError::InvalidQuery(format!(
            "invalid field name: {field}"
        )));
    }
    Ok(format!("$.{field}"))
}

/// Generate a cryptographically random 32-byte hex token.
fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

type DocumentRow = (String, String, String, String, String);

fn row_to_document(row: DocumentRow) -> BackendResult<Document> {
    let (collection, id, data, created_at, updated_at) = row;
    let fields: Map<String, Value> = serde_json::from_str(&data)?;
    Ok(Document {
        id,
        collection,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        fields,
    })
}

#[async_trait]
impl AccountService for SqliteBackend {
    async fn create_account(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> BackendResult<Account> {
        let conn = self.pool.get()?;

        let taken: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM accounts WHERE email = ?1",
            params![email],
            |row| row.get(0),
        )?;
        if taken {
            return Err(BackendError::Conflict(format!(
                "an account with email {email} already exists"
            )));
        }

        let id = uuid::Uuid::now_v7().to_string();
        let hash = bcrypt::hash(password, self.hash_cost)?;
        conn.execute(
            "INSERT INTO accounts (id, email, name, password_hash) VALUES (?1, ?2, ?3, ?4)",
            params![id, email, name, hash],
        )?;

        tracing::info!(account_id = %id, "Created account");
        Ok(Account {
            id: AccountId::new(id),
            email: email.to_string(),
            name: name.to_string(),
        })
    }

    async fn create_session(&self, email: &str, password: &str) -> BackendResult<Session> {
        let conn = self.pool.get()?;

        let found: Option<(String, String)> = conn
            .query_row(
                "SELECT id, password_hash FROM accounts WHERE email = ?1",
                params![email],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((account_id, hash)) = found else {
            return Err(BackendError::Unauthorized);
        };
        if !bcrypt::verify(password, &hash)? {
            return Err(BackendError::Unauthorized);
        }

        let token = generate_token();
        let expires_at = Utc::now() + Duration::hours(self.session_hours as i64);
        conn.execute(
            "INSERT INTO sessions (id, account_id, token, expires_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                uuid::Uuid::now_v7().to_string(),
                account_id,
                token,
                timestamp(expires_at)
            ],
        )?;

        Ok(Session {
            account_id: AccountId::new(account_id),
            token,
            expires_at,
        })
    }

    async fn current_account(&self, token: &str) -> BackendResult<Account> {
        let conn = self.pool.get()?;
        conn.query_row(
            "SELECT a.id, a.email, a.name FROM sessions s \
             JOIN accounts a ON a.id = s.account_id \
             WHERE s.token = ?1 AND s.expires_at > ?2",
            params![token, timestamp(Utc::now())],
            |row| {
                Ok(Account {
                    id: AccountId::new(row.get::<_, String>(0)?),
                    email: row.get(1)?,
                    name: row.get(2)?,
                })
            },
        )
        .optional()?
        .ok_or(BackendError::Unauthorized)
    }

    async fn session(&self, token: &str) -> BackendResult<Session> {
        let conn = self.pool.get()?;
        let found: Option<(String, String)> = conn
            .query_row(
                "SELECT account_id, expires_at FROM sessions WHERE token = ?1 AND expires_at > ?2",
                params![token, timestamp(Utc::now())],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((account_id, expires_at)) = found else {
            return Err(BackendError::Unauthorized);
        };
        Ok(Session {
            account_id: AccountId::new(account_id),
            token: token.to_string(),
            expires_at: parse_timestamp(&expires_at)?,
        })
    }

    async fn delete_session(&self, token: &str) -> BackendResult<()> {
        let conn = self.pool.get()?;
        conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for SqliteBackend {
    async fn create_document(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> BackendResult<Document> {
        let conn = self.pool.get()?;
        let now = now_micros();
        let data = serde_json::to_string(&fields)?;

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO documents (collection, id, data, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![collection, id, data, timestamp(now)],
        )?;
        if inserted == 0 {
            return Err(BackendError::Conflict(format!(
                "{collection}/{id} already exists"
            )));
        }

        Ok(Document {
            id: id.to_string(),
            collection: collection.to_string(),
            created_at: now,
            updated_at: now,
            fields,
        })
    }

    async fn get_document(&self, collection: &str, id: &str) -> BackendResult<Document> {
        let conn = self.pool.get()?;
        let row: Option<DocumentRow> = conn
            .query_row(
                "SELECT collection, id, data, created_at, updated_at FROM documents
                 WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()?;

        match row {
            Some(row) => row_to_document(row),
            None => Err(BackendError::NotFound(format!("{collection}/{id}"))),
        }
    }

    async fn update_document(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> BackendResult<Document> {
        let mut doc = self.get_document(collection, id).await?;
        for (key, value) in fields {
            doc.fields.insert(key, value);
        }

        // Keep updated_at strictly increasing per document
        let now = now_micros();
        doc.updated_at = if now > doc.updated_at {
            now
        } else {
            doc.updated_at + Duration::microseconds(1)
        };

        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE documents SET data = ?1, updated_at = ?2 WHERE collection = ?3 AND id = ?4",
            params![
                serde_json::to_string(&doc.fields)?,
                timestamp(doc.updated_at),
                collection,
                id
            ],
        )?;
        Ok(doc)
    }

    async fn delete_document(&self, collection: &str, id: &str) -> BackendResult<()> {
        let conn = self.pool.get()?;
        let deleted = conn.execute(
            "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )?;
        if deleted == 0 {
            return Err(BackendError::NotFound(format!("{collection}/{id}")));
        }
        Ok(())
    }

    async fn list_documents(
        &self,
        collection: &str,
        queries: &[Query],
    ) -> BackendResult<Vec<Document>> {
        let mut sql = String::from(
            "SELECT collection, id, data, created_at, updated_at FROM documents WHERE collection = ?",
        );
        let mut values: Vec<SqlValue> = vec![SqlValue::Text(collection.to_string())];
        let mut order = SortField::UpdatedAt;
        let mut limit: Option<usize> = None;

        for query in queries {
            match query {
                Query::Equal(field, value) => {
                    sql.push_str(" AND json_extract(data, ?) = ?");
                    values.push(SqlValue::Text(json_path(field)?));
                    values.push(SqlValue::Text(value.clone()));
                }
                Query::Search(field, term) => {
                    sql.push_str(" AND instr(lower(json_extract(data, ?)), lower(?)) > 0");
                    values.push(SqlValue::Text(json_path(field)?));
                    values.push(SqlValue::Text(term.clone()));
                }
                Query::CursorAfter(cursor) => {
                    sql.push_str(" AND (updated_at < ? OR (updated_at = ? AND id < ?))");
                    let at = timestamp(cursor.updated_at);
                    values.push(SqlValue::Text(at.clone()));
                    values.push(SqlValue::Text(at));
                    values.push(SqlValue::Text(cursor.id.as_str().to_string()));
                }
                Query::OrderDesc(field) => order = *field,
                Query::Limit(n) => limit = Some(*n),
            }
        }

        let has_cursor = queries.iter().any(|q| matches!(q, Query::CursorAfter(_)));
        if has_cursor && order != SortField::UpdatedAt {
            return Err(BackendError::InvalidQuery(
                "cursor paging requires updated_at ordering".to_string(),
            ));
        }

        match order {
            SortField::UpdatedAt => sql.push_str(" ORDER BY updated_at DESC, id DESC"),
            SortField::CreatedAt => sql.push_str(" ORDER BY created_at DESC, id DESC"),
        }
        if let Some(n) = limit {
            sql.push_str(" LIMIT ?");
            values.push(SqlValue::Integer(n as i64));
        }

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })?
            .collect::<Result<Vec<DocumentRow>, _>>()?;

        rows.into_iter().map(row_to_document).collect()
    }
}
