//! `CompletionStore` trait, the append-only record of finished postcards.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::DatabaseError;

/// One finished wizard run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionRecord {
    pub id: Uuid,
    pub user_id: String,
    pub session_id: Option<Uuid>,
    pub choices: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Where completed runs are registered. Rows are never updated or deleted.
#[async_trait]
pub trait CompletionStore: Send + Sync {
    /// Append a completion and return its id.
    async fn record_completion(
        &self,
        session_id: Uuid,
        user_id: &str,
        choices: &[String],
    ) -> Result<Uuid, DatabaseError>;

    /// Completions for `user_id`, newest first.
    async fn list_completions(&self, user_id: &str) -> Result<Vec<CompletionRecord>, DatabaseError>;

    /// Total number of completions.
    async fn count_completions(&self) -> Result<u64, DatabaseError>;
}
