//! libSQL implementation of `CompletionStore`.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{CompletionRecord, CompletionStore};

/// libSQL completion store.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlCompletionStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlCompletionStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests and CLI runs).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn row_to_completion(row: &libsql::Row) -> Result<CompletionRecord, DatabaseError> {
    let id: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("completion id: {e}")))?;
    let user_id: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("completion user_id: {e}")))?;
    let session_id: Option<String> = row.get(2).ok();
    let choices: String = row
        .get(3)
        .map_err(|e| DatabaseError::Query(format!("completion choices: {e}")))?;
    let completed_at: String = row
        .get(4)
        .map_err(|e| DatabaseError::Query(format!("completion completed_at: {e}")))?;

    Ok(CompletionRecord {
        id: Uuid::parse_str(&id).map_err(|e| DatabaseError::Serialization(e.to_string()))?,
        user_id,
        session_id: session_id.and_then(|s| Uuid::parse_str(&s).ok()),
        choices: serde_json::from_str(&choices)
            .map_err(|e| DatabaseError::Serialization(format!("choices: {e}")))?,
        completed_at: parse_datetime(&completed_at),
    })
}

#[async_trait]
impl CompletionStore for LibSqlCompletionStore {
    async fn record_completion(
        &self,
        session_id: Uuid,
        user_id: &str,
        choices: &[String],
    ) -> Result<Uuid, DatabaseError> {
        let id = Uuid::new_v4();
        let choices_json = serde_json::to_string(choices)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        self.conn()
            .execute(
                "INSERT INTO completions (id, user_id, session_id, choices, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id.to_string(),
                    user_id,
                    session_id.to_string(),
                    choices_json,
                    now
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_completion: {e}")))?;

        debug!(completion_id = %id, user_id, "Completion recorded");
        Ok(id)
    }

    async fn list_completions(&self, user_id: &str) -> Result<Vec<CompletionRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, user_id, session_id, choices, completed_at
                 FROM completions WHERE user_id = ?1
                 ORDER BY completed_at DESC, rowid DESC",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_completions: {e}")))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_completions: {e}")))?
        {
            out.push(row_to_completion(&row)?);
        }
        Ok(out)
    }

    async fn count_completions(&self) -> Result<u64, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT COUNT(*) FROM completions", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("count_completions: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("count_completions: {e}")))?;
                Ok(count.max(0) as u64)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("count_completions: {e}"))),
        }
    }
}
