//! Schema migrations.
//!
//! Forward-only, identified by monotonic integer version. Applied versions
//! are recorded in `schema_version`; a migration runs at most once. Never
//! edit or delete a migration after it ships.

use crate::error::Result;
use sqlx::SqlitePool;
use tracing::info;

/// All migrations in order: (version, SQL batch).
const MIGRATIONS: &[(i64, &str)] = &[
    (
        1,
        r#"
        CREATE TABLE libraries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            path TEXT NOT NULL UNIQUE,
            enabled INTEGER NOT NULL DEFAULT 1,
            watch_enabled INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE exclusions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            library_id INTEGER REFERENCES libraries(id) ON DELETE CASCADE,
            pattern TEXT NOT NULL,
            kind TEXT NOT NULL CHECK (kind IN ('folder', 'pattern')),
            reason TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            library_id INTEGER NOT NULL REFERENCES libraries(id) ON DELETE CASCADE,
            file_path TEXT NOT NULL UNIQUE,
            file_name TEXT NOT NULL,
            original_codec TEXT,
            original_bitrate INTEGER,
            original_size INTEGER,
            original_width INTEGER,
            original_height INTEGER,
            is_hdr INTEGER NOT NULL DEFAULT 0,
            new_size INTEGER,
            status TEXT NOT NULL DEFAULT 'queued' CHECK (status IN (
                'queued', 'encoding', 'finished', 'skipped',
                'excluded', 'rejected', 'errored', 'cancelled'
            )),
            skip_reason TEXT,
            error_message TEXT,
            started_at TEXT,
            completed_at TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE stats_daily (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            date TEXT NOT NULL UNIQUE,
            total_files_processed INTEGER NOT NULL DEFAULT 0,
            total_space_saved INTEGER NOT NULL DEFAULT 0,
            files_finished INTEGER NOT NULL DEFAULT 0,
            files_skipped INTEGER NOT NULL DEFAULT 0,
            files_rejected INTEGER NOT NULL DEFAULT 0,
            files_errored INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX idx_files_status ON files(status);
        CREATE INDEX idx_files_library_id ON files(library_id);
        CREATE INDEX idx_exclusions_library_id ON exclusions(library_id);
        "#,
    ),
    (
        2,
        r#"
        CREATE TABLE encoding_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
            event TEXT NOT NULL,
            details TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX idx_encoding_log_file_id ON encoding_log(file_id);
        "#,
    ),
    (
        3,
        r#"
        CREATE TABLE stats_hourly (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            hour_utc TEXT NOT NULL UNIQUE,
            total_files_processed INTEGER NOT NULL DEFAULT 0,
            total_space_saved INTEGER NOT NULL DEFAULT 0,
            files_finished INTEGER NOT NULL DEFAULT 0,
            files_skipped INTEGER NOT NULL DEFAULT 0,
            files_rejected INTEGER NOT NULL DEFAULT 0,
            files_errored INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX idx_stats_hourly_hour_utc ON stats_hourly(hour_utc);

        -- Backfill: pre-existing daily totals land in the midnight bucket so
        -- hourly sums stay consistent with daily sums.
        INSERT INTO stats_hourly (
            hour_utc, total_files_processed, total_space_saved,
            files_finished, files_skipped, files_rejected, files_errored
        )
        SELECT
            date || ' 00:00:00', total_files_processed, total_space_saved,
            files_finished, files_skipped, files_rejected, files_errored
        FROM stats_daily;
        "#,
    ),
];

/// Apply every migration newer than the recorded watermark.
pub async fn run(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    let current: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await?;
    let current = current.unwrap_or(0);

    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }

        let mut tx = pool.begin().await?;
        sqlx::raw_sql(sql).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
            .bind(version)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(version, "Applied schema migration");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[test]
    fn test_migration_versions_are_monotonic() {
        let mut last = 0;
        for (version, _) in MIGRATIONS {
            assert!(*version > last, "versions must strictly increase");
            last = *version;
        }
    }

    #[tokio::test]
    async fn test_run_twice_applies_nothing_new() {
        let store = Store::open_in_memory().await.unwrap();

        run(store.pool()).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_version")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i64);
        store.close().await;
    }

    #[tokio::test]
    async fn test_required_indexes_exist() {
        let store = Store::open_in_memory().await.unwrap();

        let names: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'index' AND name LIKE 'idx_%'",
        )
        .fetch_all(store.pool())
        .await
        .unwrap();

        for required in [
            "idx_files_status",
            "idx_files_library_id",
            "idx_exclusions_library_id",
            "idx_encoding_log_file_id",
            "idx_stats_hourly_hour_utc",
        ] {
            assert!(names.iter().any(|n| n == required), "missing {}", required);
        }
        store.close().await;
    }

    #[tokio::test]
    async fn test_hourly_backfill_carries_daily_totals() {
        // Run migrations 1..2 by hand, insert a daily row, then migrate to 3
        // and check the backfill.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(
                sqlx::sqlite::SqliteConnectOptions::new()
                    .filename(":memory:")
                    .foreign_keys(true),
            )
            .await
            .unwrap();

        sqlx::query(
            "CREATE TABLE schema_version (version INTEGER PRIMARY KEY, applied_at TEXT NOT NULL DEFAULT (datetime('now')))",
        )
        .execute(&pool)
        .await
        .unwrap();
        for (version, sql) in &MIGRATIONS[..2] {
            sqlx::raw_sql(sql).execute(&pool).await.unwrap();
            sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
                .bind(version)
                .execute(&pool)
                .await
                .unwrap();
        }

        sqlx::query(
            "INSERT INTO stats_daily (date, total_files_processed, total_space_saved, files_finished)
             VALUES ('2026-01-15', 4, 1000, 3)",
        )
        .execute(&pool)
        .await
        .unwrap();

        run(&pool).await.unwrap();

        let (hour, processed, saved): (String, i64, i64) = sqlx::query_as(
            "SELECT hour_utc, total_files_processed, total_space_saved FROM stats_hourly",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(hour, "2026-01-15 00:00:00");
        assert_eq!(processed, 4);
        assert_eq!(saved, 1000);
    }
}
