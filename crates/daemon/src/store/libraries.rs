//! Library rows.

use super::Store;
use crate::error::{Error, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A configured media library root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Library {
    pub id: i64,
    pub name: String,
    pub path: String,
    pub enabled: bool,
    pub watch_enabled: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Input for library creation.
#[derive(Debug, Clone, Deserialize)]
pub struct NewLibrary {
    pub name: String,
    pub path: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub watch_enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Partial update for a library.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateLibrary {
    pub name: Option<String>,
    pub path: Option<String>,
    pub enabled: Option<bool>,
    pub watch_enabled: Option<bool>,
}

impl Store {
    /// Insert a library. A duplicate path surfaces as `Conflict`.
    pub async fn create_library(&self, new: &NewLibrary) -> Result<Library> {
        if new.name.trim().is_empty() {
            return Err(Error::validation("name", "must not be empty"));
        }
        if !new.path.starts_with('/') {
            return Err(Error::validation("path", "must be an absolute directory path"));
        }

        let library = sqlx::query_as::<_, Library>(
            r#"
            INSERT INTO libraries (name, path, enabled, watch_enabled)
            VALUES (?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&new.name)
        .bind(&new.path)
        .bind(new.enabled)
        .bind(new.watch_enabled)
        .fetch_one(self.pool())
        .await?;

        Ok(library)
    }

    pub async fn get_library(&self, id: i64) -> Result<Library> {
        sqlx::query_as::<_, Library>("SELECT * FROM libraries WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::NotFound(format!("library {}", id)))
    }

    pub async fn list_libraries(&self) -> Result<Vec<Library>> {
        let rows =
            sqlx::query_as::<_, Library>("SELECT * FROM libraries ORDER BY name COLLATE NOCASE")
                .fetch_all(self.pool())
                .await?;
        Ok(rows)
    }

    pub async fn list_enabled_libraries(&self) -> Result<Vec<Library>> {
        let rows = sqlx::query_as::<_, Library>(
            "SELECT * FROM libraries WHERE enabled = 1 ORDER BY name COLLATE NOCASE",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Libraries that should have a filesystem watcher running.
    pub async fn list_watched_libraries(&self) -> Result<Vec<Library>> {
        let rows = sqlx::query_as::<_, Library>(
            "SELECT * FROM libraries WHERE enabled = 1 AND watch_enabled = 1 ORDER BY name COLLATE NOCASE",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Apply a partial update. Returns the updated row.
    pub async fn update_library(&self, id: i64, update: &UpdateLibrary) -> Result<Library> {
        let existing = self.get_library(id).await?;

        let name = update.name.clone().unwrap_or(existing.name);
        let path = update.path.clone().unwrap_or(existing.path);
        let enabled = update.enabled.unwrap_or(existing.enabled);
        let watch_enabled = update.watch_enabled.unwrap_or(existing.watch_enabled);

        if name.trim().is_empty() {
            return Err(Error::validation("name", "must not be empty"));
        }
        if !path.starts_with('/') {
            return Err(Error::validation("path", "must be an absolute directory path"));
        }

        let library = sqlx::query_as::<_, Library>(
            r#"
            UPDATE libraries
            SET name = ?, path = ?, enabled = ?, watch_enabled = ?, updated_at = datetime('now')
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(&name)
        .bind(&path)
        .bind(enabled)
        .bind(watch_enabled)
        .bind(id)
        .fetch_one(self.pool())
        .await?;

        Ok(library)
    }

    /// Delete a library. Files and exclusions cascade.
    pub async fn delete_library(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM libraries WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("library {}", id)));
        }
        Ok(())
    }
}
