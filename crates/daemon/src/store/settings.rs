//! Settings rows.
//!
//! Public writes go through [`Store::update_settings`], which validates every
//! key against the documented bounds before anything is written. The raw
//! putter is crate-private and reserved for internal state such as the
//! round-robin cursor.

use super::Store;
use crate::error::Result;
use crate::settings::{self, Settings};
use std::collections::HashMap;

impl Store {
    pub async fn settings_rows(&self) -> Result<HashMap<String, String>> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM settings")
            .fetch_all(self.pool())
            .await?;
        Ok(rows.into_iter().collect())
    }

    /// The typed settings view, with defaults for anything unset.
    pub async fn load_settings(&self) -> Result<Settings> {
        let rows = self.settings_rows().await?;
        Ok(Settings::from_rows(&rows))
    }

    /// Validate-then-write a batch of settings. Nothing is written when any
    /// key fails validation.
    pub async fn update_settings(&self, changes: &HashMap<String, String>) -> Result<Settings> {
        for (key, value) in changes {
            settings::validate(key, value)?;
        }

        let mut tx = self.pool().begin().await?;
        for (key, value) in changes {
            sqlx::query(
                "INSERT INTO settings (key, value) VALUES (?, ?)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        self.load_settings().await
    }

    pub(crate) async fn put_setting_raw(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub(crate) async fn get_setting_raw(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(self.pool())
            .await?;
        Ok(value)
    }

    /// Round-robin cursor: the library served last.
    pub async fn last_library_id(&self) -> Result<Option<i64>> {
        Ok(self
            .get_setting_raw(settings::LAST_LIBRARY_ID)
            .await?
            .and_then(|v| v.parse().ok()))
    }

    pub async fn set_last_library_id(&self, library_id: i64) -> Result<()> {
        self.put_setting_raw(settings::LAST_LIBRARY_ID, &library_id.to_string())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::settings::{LibraryPriority, SortOrder, BITRATE_FACTOR, SORT_ORDER};

    #[tokio::test]
    async fn test_defaults_when_table_is_empty() {
        let store = Store::open_in_memory().await.unwrap();
        let settings = store.load_settings().await.unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[tokio::test]
    async fn test_update_and_reload() {
        let store = Store::open_in_memory().await.unwrap();

        let mut changes = HashMap::new();
        changes.insert(BITRATE_FACTOR.to_string(), "0.7".to_string());
        changes.insert(SORT_ORDER.to_string(), "alphabetical".to_string());
        changes.insert("library_priority".to_string(), "round_robin".to_string());

        let settings = store.update_settings(&changes).await.unwrap();
        assert_eq!(settings.encode.bitrate_factor, 0.7);
        assert_eq!(settings.sort_order, SortOrder::Alphabetical);
        assert_eq!(settings.library_priority, LibraryPriority::RoundRobin);

        // Survives reload.
        let reloaded = store.load_settings().await.unwrap();
        assert_eq!(reloaded, settings);
    }

    #[tokio::test]
    async fn test_invalid_value_writes_nothing() {
        let store = Store::open_in_memory().await.unwrap();

        let mut changes = HashMap::new();
        changes.insert(BITRATE_FACTOR.to_string(), "0.7".to_string());
        changes.insert("min_file_size_mb".to_string(), "9999999".to_string());

        let err = store.update_settings(&changes).await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));

        // The valid half of the batch must not have been applied.
        let settings = store.load_settings().await.unwrap();
        assert_eq!(settings.encode.bitrate_factor, 0.5);
    }

    #[tokio::test]
    async fn test_last_library_id_round_trip() {
        let store = Store::open_in_memory().await.unwrap();
        assert_eq!(store.last_library_id().await.unwrap(), None);

        store.set_last_library_id(7).await.unwrap();
        assert_eq!(store.last_library_id().await.unwrap(), Some(7));

        store.set_last_library_id(9).await.unwrap();
        assert_eq!(store.last_library_id().await.unwrap(), Some(9));
    }
}
