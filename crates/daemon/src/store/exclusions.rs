//! Exclusion rule rows.
//!
//! The reactive create/delete/update operations live in [`crate::exclusions`];
//! this module is plain CRUD.

use super::Store;
use crate::error::{Error, Result};
use crate::exclusions::{Exclusion, NewExclusion};

impl Store {
    pub(crate) async fn insert_exclusion(&self, new: &NewExclusion) -> Result<Exclusion> {
        validate_pattern(&new.pattern)?;
        if let Some(library_id) = new.library_id {
            // Scope must reference a real library.
            self.get_library(library_id).await?;
        }

        let rule = sqlx::query_as::<_, Exclusion>(
            r#"
            INSERT INTO exclusions (library_id, pattern, kind, reason)
            VALUES (?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(new.library_id)
        .bind(&new.pattern)
        .bind(new.kind)
        .bind(&new.reason)
        .fetch_one(self.pool())
        .await?;

        Ok(rule)
    }

    pub async fn get_exclusion(&self, id: i64) -> Result<Exclusion> {
        sqlx::query_as::<_, Exclusion>("SELECT * FROM exclusions WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::NotFound(format!("exclusion {}", id)))
    }

    /// All rules in evaluation order: global rules first (NULL scope sorts
    /// first), then by pattern.
    pub async fn list_exclusions(&self) -> Result<Vec<Exclusion>> {
        let rows = sqlx::query_as::<_, Exclusion>(
            "SELECT * FROM exclusions ORDER BY library_id, pattern",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    pub(crate) async fn update_exclusion(&self, id: i64, new: &NewExclusion) -> Result<Exclusion> {
        validate_pattern(&new.pattern)?;
        if let Some(library_id) = new.library_id {
            self.get_library(library_id).await?;
        }

        sqlx::query_as::<_, Exclusion>(
            r#"
            UPDATE exclusions
            SET library_id = ?, pattern = ?, kind = ?, reason = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(new.library_id)
        .bind(&new.pattern)
        .bind(new.kind)
        .bind(&new.reason)
        .bind(id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| Error::NotFound(format!("exclusion {}", id)))
    }

    pub(crate) async fn delete_exclusion(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM exclusions WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("exclusion {}", id)));
        }
        Ok(())
    }
}

fn validate_pattern(pattern: &str) -> Result<()> {
    if pattern.trim().is_empty() {
        return Err(Error::validation("pattern", "must not be empty"));
    }
    Ok(())
}
