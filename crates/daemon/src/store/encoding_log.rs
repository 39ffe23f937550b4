//! Append-only encoding event log, used for post-hoc auditing.

use super::Store;
use crate::error::Result;
use chrono::NaiveDateTime;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct EncodingLogEntry {
    pub id: i64,
    pub file_id: i64,
    pub event: String,
    pub details: Option<String>,
    pub created_at: NaiveDateTime,
}

impl Store {
    pub async fn log_encoding_event(
        &self,
        file_id: i64,
        event: &str,
        details: Option<&str>,
    ) -> Result<()> {
        sqlx::query("INSERT INTO encoding_log (file_id, event, details) VALUES (?, ?, ?)")
            .bind(file_id)
            .bind(event)
            .bind(details)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn encoding_log_for_file(&self, file_id: i64) -> Result<Vec<EncodingLogEntry>> {
        let rows = sqlx::query_as::<_, EncodingLogEntry>(
            "SELECT * FROM encoding_log WHERE file_id = ? ORDER BY id",
        )
        .bind(file_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }
}
