pub mod content;
pub mod matches;
pub mod tenants;

pub use content::{compute_content_hash, IngestOutcome, NewContent};
pub use matches::NewMatch;
pub use tenants::{NewKeyword, NewSubreddit};

use reddalert_core::{CoreError, StoreError};
use sqlx::migrate::MigrateDatabase;
use sqlx::sqlite::SqlitePool;
use sqlx::Sqlite;
use uuid::Uuid;

pub struct Database {
    pool: SqlitePool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RetentionSummary {
    pub matches_deleted: u64,
    pub content_deleted: u64,
}

impl Database {
    pub async fn connect(database_url: &str) -> Result<Self, CoreError> {
        if !Sqlite::database_exists(database_url)
            .await
            .map_err(|e| StoreError::ConnectionFailed {
                reason: format!("database check failed: {e}"),
            })?
        {
            Sqlite::create_database(database_url).await.map_err(|e| {
                StoreError::ConnectionFailed {
                    reason: format!("database creation failed: {e}"),
                }
            })?;
        }

        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| StoreError::ConnectionFailed {
                reason: format!("database connection failed: {e}"),
            })?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<(), CoreError> {
        let migration_sql = include_str!("../migrations/001_initial_schema.sql");
        sqlx::raw_sql(migration_sql)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::MigrationFailed {
                reason: e.to_string(),
            })?;
        Ok(())
    }

    /// Retention sweep: matches first (they reference content), then
    /// content older than the cutoff.
    pub async fn delete_expired(&self, cutoff: i64) -> Result<RetentionSummary, CoreError> {
        let matches_deleted = sqlx::query("DELETE FROM matches WHERE detected_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?
            .rows_affected();

        let content_deleted = sqlx::query("DELETE FROM reddit_content WHERE fetched_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?
            .rows_affected();

        Ok(RetentionSummary {
            matches_deleted,
            content_deleted,
        })
    }
}

pub(crate) fn parse_uuid(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|e| StoreError::Decode {
        details: format!("bad uuid {raw:?}: {e}"),
    })
}

pub(crate) fn parse_string_array(raw: &str) -> Result<Vec<String>, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Decode {
        details: format!("bad JSON array {raw:?}: {e}"),
    })
}

#[cfg(test)]
mod tests;
