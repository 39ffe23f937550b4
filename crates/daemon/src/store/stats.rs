//! Aggregate counters.
//!
//! Daily and hourly rows are updated additively (`col = col + delta`); callers
//! never compute absolute totals. The row for the current date or hour is
//! created on first touch.

use super::Store;
use crate::error::Result;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

/// Additive update produced by one classification or terminal outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsDelta {
    pub total_files_processed: i64,
    pub total_space_saved: i64,
    pub files_finished: i64,
    pub files_skipped: i64,
    pub files_rejected: i64,
    pub files_errored: i64,
}

impl StatsDelta {
    pub fn finished(space_saved: i64) -> Self {
        Self {
            total_files_processed: 1,
            total_space_saved: space_saved,
            files_finished: 1,
            ..Default::default()
        }
    }

    pub fn skipped() -> Self {
        Self {
            total_files_processed: 1,
            files_skipped: 1,
            ..Default::default()
        }
    }

    pub fn rejected() -> Self {
        Self {
            total_files_processed: 1,
            files_rejected: 1,
            ..Default::default()
        }
    }

    pub fn errored() -> Self {
        Self {
            total_files_processed: 1,
            files_errored: 1,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub total_files_processed: i64,
    pub total_space_saved: i64,
    pub files_finished: i64,
    pub files_skipped: i64,
    pub files_rejected: i64,
    pub files_errored: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct HourlyStats {
    pub hour_utc: NaiveDateTime,
    pub total_files_processed: i64,
    pub total_space_saved: i64,
    pub files_finished: i64,
    pub files_skipped: i64,
    pub files_rejected: i64,
    pub files_errored: i64,
}

/// Lifetime sums over the daily table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, sqlx::FromRow)]
pub struct StatsTotals {
    pub total_files_processed: i64,
    pub total_space_saved: i64,
    pub files_finished: i64,
    pub files_skipped: i64,
    pub files_rejected: i64,
    pub files_errored: i64,
}

impl Store {
    /// Apply one delta to the current UTC day and hour.
    pub async fn record_stats(&self, delta: StatsDelta) -> Result<()> {
        if delta.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool().begin().await?;

        sqlx::query(
            r#"
            INSERT INTO stats_daily (
                date, total_files_processed, total_space_saved,
                files_finished, files_skipped, files_rejected, files_errored
            )
            VALUES (date('now'), ?, ?, ?, ?, ?, ?)
            ON CONFLICT(date) DO UPDATE SET
                total_files_processed = total_files_processed + excluded.total_files_processed,
                total_space_saved = total_space_saved + excluded.total_space_saved,
                files_finished = files_finished + excluded.files_finished,
                files_skipped = files_skipped + excluded.files_skipped,
                files_rejected = files_rejected + excluded.files_rejected,
                files_errored = files_errored + excluded.files_errored
            "#,
        )
        .bind(delta.total_files_processed)
        .bind(delta.total_space_saved)
        .bind(delta.files_finished)
        .bind(delta.files_skipped)
        .bind(delta.files_rejected)
        .bind(delta.files_errored)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO stats_hourly (
                hour_utc, total_files_processed, total_space_saved,
                files_finished, files_skipped, files_rejected, files_errored
            )
            VALUES (strftime('%Y-%m-%d %H:00:00', 'now'), ?, ?, ?, ?, ?, ?)
            ON CONFLICT(hour_utc) DO UPDATE SET
                total_files_processed = total_files_processed + excluded.total_files_processed,
                total_space_saved = total_space_saved + excluded.total_space_saved,
                files_finished = files_finished + excluded.files_finished,
                files_skipped = files_skipped + excluded.files_skipped,
                files_rejected = files_rejected + excluded.files_rejected,
                files_errored = files_errored + excluded.files_errored
            "#,
        )
        .bind(delta.total_files_processed)
        .bind(delta.total_space_saved)
        .bind(delta.files_finished)
        .bind(delta.files_skipped)
        .bind(delta.files_rejected)
        .bind(delta.files_errored)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn daily_stats(&self, limit: i64) -> Result<Vec<DailyStats>> {
        let rows = sqlx::query_as::<_, DailyStats>(
            r#"
            SELECT date, total_files_processed, total_space_saved,
                   files_finished, files_skipped, files_rejected, files_errored
            FROM stats_daily ORDER BY date DESC LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    pub async fn hourly_stats(&self, limit: i64) -> Result<Vec<HourlyStats>> {
        let rows = sqlx::query_as::<_, HourlyStats>(
            r#"
            SELECT hour_utc, total_files_processed, total_space_saved,
                   files_finished, files_skipped, files_rejected, files_errored
            FROM stats_hourly ORDER BY hour_utc DESC LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    pub async fn stats_totals(&self) -> Result<StatsTotals> {
        let totals = sqlx::query_as::<_, StatsTotals>(
            r#"
            SELECT
                COALESCE(SUM(total_files_processed), 0) AS total_files_processed,
                COALESCE(SUM(total_space_saved), 0) AS total_space_saved,
                COALESCE(SUM(files_finished), 0) AS files_finished,
                COALESCE(SUM(files_skipped), 0) AS files_skipped,
                COALESCE(SUM(files_rejected), 0) AS files_rejected,
                COALESCE(SUM(files_errored), 0) AS files_errored
            FROM stats_daily
            "#,
        )
        .fetch_one(self.pool())
        .await?;
        Ok(totals)
    }
}
