//! File rows and the status state machine.
//!
//! `file_path` is the system-wide identity of a file: re-discovery updates the
//! existing row in place and never creates a duplicate.

use super::Store;
use crate::error::{Error, Result};
use crate::settings::{LibraryPriority, QueueSettings, SortOrder};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Closed status enum for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum FileStatus {
    Queued,
    Encoding,
    Finished,
    Skipped,
    Excluded,
    Rejected,
    Errored,
    Cancelled,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Queued => "queued",
            FileStatus::Encoding => "encoding",
            FileStatus::Finished => "finished",
            FileStatus::Skipped => "skipped",
            FileStatus::Excluded => "excluded",
            FileStatus::Rejected => "rejected",
            FileStatus::Errored => "errored",
            FileStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal outcomes the encoder can produce.
    pub fn is_terminal_outcome(&self) -> bool {
        matches!(
            self,
            FileStatus::Finished | FileStatus::Rejected | FileStatus::Errored | FileStatus::Cancelled
        )
    }
}

/// One discovered media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct FileRecord {
    pub id: i64,
    pub library_id: i64,
    pub file_path: String,
    pub file_name: String,
    pub original_codec: Option<String>,
    pub original_bitrate: Option<i64>,
    pub original_size: Option<i64>,
    pub original_width: Option<i64>,
    pub original_height: Option<i64>,
    pub is_hdr: bool,
    pub new_size: Option<i64>,
    pub status: FileStatus,
    pub skip_reason: Option<String>,
    pub error_message: Option<String>,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Input for the upsert-by-path operation.
#[derive(Debug, Clone, Default)]
pub struct NewFile {
    pub library_id: i64,
    pub file_path: String,
    pub file_name: String,
    pub original_codec: Option<String>,
    pub original_bitrate: Option<i64>,
    pub original_size: Option<i64>,
    pub original_width: Option<i64>,
    pub original_height: Option<i64>,
    pub is_hdr: bool,
    /// When `None`, an existing row keeps its current status.
    pub status: Option<FileStatus>,
    pub skip_reason: Option<String>,
    pub error_message: Option<String>,
}

/// Per-status row counts for the queue view.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusCounts {
    pub queued: i64,
    pub encoding: i64,
    pub finished: i64,
    pub skipped: i64,
    pub excluded: i64,
    pub rejected: i64,
    pub errored: i64,
    pub cancelled: i64,
}

impl Store {
    /// Create or update a file keyed by `file_path`.
    ///
    /// `id` and `created_at` are always preserved on update; `status`,
    /// `skip_reason`, and `error_message` only change when the caller
    /// supplies a status.
    pub async fn upsert_file(&self, new: &NewFile) -> Result<FileRecord> {
        let sql = if new.status.is_some() {
            r#"
            INSERT INTO files (
                library_id, file_path, file_name, original_codec, original_bitrate,
                original_size, original_width, original_height, is_hdr,
                status, skip_reason, error_message
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(file_path) DO UPDATE SET
                library_id = excluded.library_id,
                file_name = excluded.file_name,
                original_codec = excluded.original_codec,
                original_bitrate = excluded.original_bitrate,
                original_size = excluded.original_size,
                original_width = excluded.original_width,
                original_height = excluded.original_height,
                is_hdr = excluded.is_hdr,
                status = excluded.status,
                skip_reason = excluded.skip_reason,
                error_message = excluded.error_message,
                updated_at = datetime('now')
            RETURNING *
            "#
        } else {
            r#"
            INSERT INTO files (
                library_id, file_path, file_name, original_codec, original_bitrate,
                original_size, original_width, original_height, is_hdr
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(file_path) DO UPDATE SET
                library_id = excluded.library_id,
                file_name = excluded.file_name,
                original_codec = excluded.original_codec,
                original_bitrate = excluded.original_bitrate,
                original_size = excluded.original_size,
                original_width = excluded.original_width,
                original_height = excluded.original_height,
                is_hdr = excluded.is_hdr,
                updated_at = datetime('now')
            RETURNING *
            "#
        };

        let mut query = sqlx::query_as::<_, FileRecord>(sql)
            .bind(new.library_id)
            .bind(&new.file_path)
            .bind(&new.file_name)
            .bind(&new.original_codec)
            .bind(new.original_bitrate)
            .bind(new.original_size)
            .bind(new.original_width)
            .bind(new.original_height)
            .bind(new.is_hdr);

        if let Some(status) = new.status {
            query = query
                .bind(status)
                .bind(&new.skip_reason)
                .bind(&new.error_message);
        }

        Ok(query.fetch_one(self.pool()).await?)
    }

    pub async fn get_file(&self, id: i64) -> Result<FileRecord> {
        sqlx::query_as::<_, FileRecord>("SELECT * FROM files WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::NotFound(format!("file {}", id)))
    }

    pub async fn get_file_by_path(&self, path: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query_as::<_, FileRecord>("SELECT * FROM files WHERE file_path = ?")
            .bind(path)
            .fetch_optional(self.pool())
            .await?;
        Ok(row)
    }

    /// List files, optionally filtered by status and/or library.
    pub async fn list_files(
        &self,
        status: Option<FileStatus>,
        library_id: Option<i64>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<FileRecord>> {
        let mut sql = String::from("SELECT * FROM files WHERE 1 = 1");
        if status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if library_id.is_some() {
            sql.push_str(" AND library_id = ?");
        }
        sql.push_str(" ORDER BY updated_at DESC, id DESC LIMIT ? OFFSET ?");

        let mut query = sqlx::query_as::<_, FileRecord>(&sql);
        if let Some(status) = status {
            query = query.bind(status);
        }
        if let Some(library_id) = library_id {
            query = query.bind(library_id);
        }
        let rows = query.bind(limit).bind(offset).fetch_all(self.pool()).await?;
        Ok(rows)
    }

    pub async fn list_files_with_status(&self, status: FileStatus) -> Result<Vec<FileRecord>> {
        let rows =
            sqlx::query_as::<_, FileRecord>("SELECT * FROM files WHERE status = ? ORDER BY id")
                .bind(status)
                .fetch_all(self.pool())
                .await?;
        Ok(rows)
    }

    pub async fn count_files_by_status(&self) -> Result<StatusCounts> {
        let rows: Vec<(FileStatus, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM files GROUP BY status")
                .fetch_all(self.pool())
                .await?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            match status {
                FileStatus::Queued => counts.queued = count,
                FileStatus::Encoding => counts.encoding = count,
                FileStatus::Finished => counts.finished = count,
                FileStatus::Skipped => counts.skipped = count,
                FileStatus::Excluded => counts.excluded = count,
                FileStatus::Rejected => counts.rejected = count,
                FileStatus::Errored => counts.errored = count,
                FileStatus::Cancelled => counts.cancelled = count,
            }
        }
        Ok(counts)
    }

    /// Pick the next queued file under the ordering policy.
    ///
    /// Round-robin walks the name-ordered set of libraries that currently
    /// have queued work, starting at the successor of `last_library_id`.
    pub async fn next_queued(
        &self,
        queue: QueueSettings,
        last_library_id: Option<i64>,
    ) -> Result<Option<FileRecord>> {
        let file_order = match queue.sort_order {
            SortOrder::BitrateDesc => "f.original_bitrate IS NULL, f.original_bitrate DESC",
            SortOrder::BitrateAsc => "f.original_bitrate IS NULL, f.original_bitrate ASC",
            SortOrder::Alphabetical => "f.file_name COLLATE NOCASE ASC",
            SortOrder::Random => "RANDOM()",
        };

        match queue.library_priority {
            LibraryPriority::AlphabeticalAsc | LibraryPriority::AlphabeticalDesc => {
                let direction = if queue.library_priority == LibraryPriority::AlphabeticalAsc {
                    "ASC"
                } else {
                    "DESC"
                };
                let sql = format!(
                    r#"
                    SELECT f.* FROM files f
                    JOIN libraries l ON l.id = f.library_id
                    WHERE f.status = 'queued'
                    ORDER BY l.name COLLATE NOCASE {direction}, {file_order}
                    LIMIT 1
                    "#
                );
                let row = sqlx::query_as::<_, FileRecord>(&sql)
                    .fetch_optional(self.pool())
                    .await?;
                Ok(row)
            }
            LibraryPriority::RoundRobin => {
                let candidates: Vec<i64> = sqlx::query_scalar(
                    r#"
                    SELECT l.id FROM libraries l
                    WHERE EXISTS (
                        SELECT 1 FROM files f
                        WHERE f.library_id = l.id AND f.status = 'queued'
                    )
                    ORDER BY l.name COLLATE NOCASE ASC
                    "#,
                )
                .fetch_all(self.pool())
                .await?;

                let Some(&library_id) = pick_round_robin(&candidates, last_library_id) else {
                    return Ok(None);
                };

                let sql = format!(
                    r#"
                    SELECT f.* FROM files f
                    WHERE f.status = 'queued' AND f.library_id = ?
                    ORDER BY {file_order}
                    LIMIT 1
                    "#
                );
                let row = sqlx::query_as::<_, FileRecord>(&sql)
                    .bind(library_id)
                    .fetch_optional(self.pool())
                    .await?;
                Ok(row)
            }
        }
    }

    /// `queued -> encoding`, stamping `started_at`.
    pub async fn mark_encoding(&self, id: i64) -> Result<FileRecord> {
        sqlx::query_as::<_, FileRecord>(
            r#"
            UPDATE files
            SET status = 'encoding', started_at = datetime('now'), updated_at = datetime('now')
            WHERE id = ? AND status = 'queued'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| Error::Conflict(format!("file {} is not queued", id)))
    }

    /// Record a terminal pipeline outcome for a file in `encoding`.
    pub async fn complete_encoding(
        &self,
        id: i64,
        status: FileStatus,
        new_size: Option<i64>,
        error_message: Option<&str>,
    ) -> Result<FileRecord> {
        if !status.is_terminal_outcome() {
            return Err(Error::Conflict(format!(
                "{} is not a terminal outcome",
                status.as_str()
            )));
        }

        sqlx::query_as::<_, FileRecord>(
            r#"
            UPDATE files
            SET status = ?, new_size = ?, error_message = ?,
                completed_at = datetime('now'), updated_at = datetime('now')
            WHERE id = ? AND status = 'encoding'
            RETURNING *
            "#,
        )
        .bind(status)
        .bind(new_size)
        .bind(error_message)
        .bind(id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| Error::Conflict(format!("file {} is not encoding", id)))
    }

    /// Crash recovery: any row stuck in `encoding` returns to `queued` with
    /// `started_at` cleared. Returns the number of recovered rows.
    pub async fn reset_encoding(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE files
            SET status = 'queued', started_at = NULL, updated_at = datetime('now')
            WHERE status = 'encoding'
            "#,
        )
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Manual retry: `errored | rejected -> queued`, clearing the error
    /// fields and timestamps.
    pub async fn retry_file(&self, id: i64) -> Result<FileRecord> {
        let updated = sqlx::query_as::<_, FileRecord>(
            r#"
            UPDATE files
            SET status = 'queued', error_message = NULL, skip_reason = NULL,
                new_size = NULL, started_at = NULL, completed_at = NULL,
                updated_at = datetime('now')
            WHERE id = ? AND status IN ('errored', 'rejected')
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        match updated {
            Some(row) => Ok(row),
            None => {
                let existing = self.get_file(id).await?;
                Err(Error::Conflict(format!(
                    "cannot retry file {} in status {}",
                    id,
                    existing.status.as_str()
                )))
            }
        }
    }

    /// Manual skip: `queued -> skipped`.
    pub async fn skip_file(&self, id: i64, reason: &str) -> Result<FileRecord> {
        let updated = sqlx::query_as::<_, FileRecord>(
            r#"
            UPDATE files
            SET status = 'skipped', skip_reason = ?, updated_at = datetime('now')
            WHERE id = ? AND status = 'queued'
            RETURNING *
            "#,
        )
        .bind(reason)
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        match updated {
            Some(row) => Ok(row),
            None => {
                let existing = self.get_file(id).await?;
                Err(Error::Conflict(format!(
                    "cannot skip file {} in status {}",
                    id,
                    existing.status.as_str()
                )))
            }
        }
    }

    /// Bulk `queued -> excluded` used by exclusion retroactivity. Rows in any
    /// other status are untouched.
    pub async fn mark_files_excluded(&self, ids: &[i64], reason: &str) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            r#"
            UPDATE files
            SET status = 'excluded', skip_reason = ?, updated_at = datetime('now')
            WHERE status = 'queued' AND id IN ({placeholders})
            "#
        );

        let mut query = sqlx::query(&sql).bind(reason);
        for id in ids {
            query = query.bind(id);
        }
        let result = query.execute(self.pool()).await?;
        Ok(result.rows_affected())
    }

    /// Re-admission target for a formerly excluded file: `queued` when the
    /// remaining checks pass, `skipped` otherwise.
    pub async fn release_excluded(
        &self,
        id: i64,
        status: FileStatus,
        skip_reason: Option<&str>,
    ) -> Result<FileRecord> {
        sqlx::query_as::<_, FileRecord>(
            r#"
            UPDATE files
            SET status = ?, skip_reason = ?, updated_at = datetime('now')
            WHERE id = ? AND status = 'excluded'
            RETURNING *
            "#,
        )
        .bind(status)
        .bind(skip_reason)
        .bind(id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| Error::Conflict(format!("file {} is not excluded", id)))
    }

    /// Disabling a library drops its queued rows; history stays.
    pub async fn delete_queued_for_library(&self, library_id: i64) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM files WHERE library_id = ? AND status = 'queued'")
                .bind(library_id)
                .execute(self.pool())
                .await?;
        Ok(result.rows_affected())
    }
}

/// Successor selection for round-robin: the first candidate after
/// `last_library_id` in the given order, wrapping; the first candidate when
/// there is no usable last id.
fn pick_round_robin(candidates: &[i64], last_library_id: Option<i64>) -> Option<&i64> {
    if candidates.is_empty() {
        return None;
    }
    match last_library_id.and_then(|last| candidates.iter().position(|&id| id == last)) {
        Some(pos) => candidates.get((pos + 1) % candidates.len()),
        None => candidates.first(),
    }
}
