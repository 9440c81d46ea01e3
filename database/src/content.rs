use reddalert_core::{ContentType, CoreError, RedditContent, StoreError};
use sha2::{Digest, Sha256};
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use crate::{parse_uuid, Database};

/// SHA-256 over the normalized text, hex-encoded. The ingestion dedup key
/// together with (subreddit, content type).
pub fn compute_content_hash(normalized_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_text.as_bytes());
    hex::encode(hasher.finalize())
}

/// A fetched item ready for persistence.
#[derive(Debug, Clone)]
pub struct NewContent {
    pub source_id: String,
    pub subreddit: String,
    pub content_type: ContentType,
    pub title: Option<String>,
    pub body: String,
    pub author: String,
    pub normalized_text: String,
    pub content_hash: String,
    pub permalink: String,
    pub is_media_post: bool,
    pub created_at_remote: i64,
    pub is_deleted: bool,
}

#[derive(Debug, Clone)]
pub enum IngestOutcome {
    /// First observation; a content row was created.
    Inserted(RedditContent),
    /// Same source id seen again; `fetched_at` refreshed.
    Refreshed,
    /// Same body under the same (subreddit, content type) with a new
    /// source id: recorded as a crosspost reference, no new row.
    CrosspostRecorded { origin_id: Uuid },
}

impl Database {
    /// Idempotent ingestion upsert with content dedup.
    pub async fn upsert_content(
        &self,
        item: &NewContent,
        now: i64,
    ) -> Result<IngestOutcome, CoreError> {
        // Re-observation of a known source id refreshes the fetch time
        // and picks up source-side deletion.
        let known = sqlx::query("SELECT id FROM reddit_content WHERE source_id = ?")
            .bind(&item.source_id)
            .fetch_optional(self.pool())
            .await
            .map_err(StoreError::from)?;
        if known.is_some() {
            sqlx::query(
                "UPDATE reddit_content SET fetched_at = ?, is_deleted = MAX(is_deleted, ?) \
                 WHERE source_id = ?",
            )
            .bind(now)
            .bind(item.is_deleted)
            .bind(&item.source_id)
            .execute(self.pool())
            .await
            .map_err(StoreError::from)?;
            return Ok(IngestOutcome::Refreshed);
        }

        // Same body already stored for this (subreddit, content type):
        // crosspost or mirror-repost. Record the edge, keep one row.
        let same_shelf = sqlx::query(
            "SELECT id FROM reddit_content \
             WHERE subreddit = ? AND content_type = ? AND content_hash = ?",
        )
        .bind(&item.subreddit)
        .bind(item.content_type.as_str())
        .bind(&item.content_hash)
        .fetch_optional(self.pool())
        .await
        .map_err(StoreError::from)?;

        if let Some(row) = same_shelf {
            let origin_id = parse_uuid(row.get::<String, _>("id").as_str())?;
            sqlx::query(
                "INSERT OR IGNORE INTO crosspost_refs (source_id, content_id, recorded_at) \
                 VALUES (?, ?, ?)",
            )
            .bind(&item.source_id)
            .bind(origin_id.to_string())
            .bind(now)
            .execute(self.pool())
            .await
            .map_err(StoreError::from)?;
            debug!(
                "recorded crosspost ref {} -> {}",
                item.source_id, origin_id
            );
            return Ok(IngestOutcome::CrosspostRecorded { origin_id });
        }

        // Same body elsewhere: store the row, but point it at its origin,
        // the earliest-seen copy. The ordering keeps a 3+-way crosspost
        // from chaining off an already-derived row.
        let crosspost_of = sqlx::query(
            "SELECT id FROM reddit_content WHERE content_type = ? AND content_hash = ? \
             ORDER BY fetched_at ASC, rowid ASC LIMIT 1",
        )
        .bind(item.content_type.as_str())
        .bind(&item.content_hash)
        .fetch_optional(self.pool())
        .await
        .map_err(StoreError::from)?
        .map(|row| parse_uuid(row.get::<String, _>("id").as_str()))
        .transpose()?;

        let id = Uuid::new_v4();
        let insert = sqlx::query(
            "INSERT INTO reddit_content \
             (id, source_id, subreddit, content_type, title, body, author, normalized_text, \
              content_hash, permalink, is_media_post, crosspost_of, created_at_remote, \
              fetched_at, is_deleted) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(&item.source_id)
        .bind(&item.subreddit)
        .bind(item.content_type.as_str())
        .bind(&item.title)
        .bind(&item.body)
        .bind(&item.author)
        .bind(&item.normalized_text)
        .bind(&item.content_hash)
        .bind(&item.permalink)
        .bind(item.is_media_post)
        .bind(crosspost_of.map(|u| u.to_string()))
        .bind(item.created_at_remote)
        .bind(now)
        .bind(item.is_deleted)
        .execute(self.pool())
        .await;

        match insert {
            Ok(_) => Ok(IngestOutcome::Inserted(RedditContent {
                id,
                source_id: item.source_id.clone(),
                subreddit: item.subreddit.clone(),
                content_type: item.content_type,
                title: item.title.clone(),
                body: item.body.clone(),
                author: item.author.clone(),
                normalized_text: item.normalized_text.clone(),
                content_hash: item.content_hash.clone(),
                permalink: item.permalink.clone(),
                is_media_post: item.is_media_post,
                crosspost_of,
                created_at_remote: item.created_at_remote,
                fetched_at: now,
                is_deleted: item.is_deleted,
            })),
            Err(e) => {
                let store_err = StoreError::from(e);
                // Lost a race with a concurrent ingester; the row exists,
                // which is all the caller needs.
                if store_err.is_unique_violation() {
                    Ok(IngestOutcome::Refreshed)
                } else {
                    Err(store_err.into())
                }
            }
        }
    }

    pub async fn mark_content_deleted(&self, source_id: &str) -> Result<bool, CoreError> {
        let result = sqlx::query("UPDATE reddit_content SET is_deleted = 1 WHERE source_id = ?")
            .bind(source_id)
            .execute(self.pool())
            .await
            .map_err(StoreError::from)?;
        Ok(result.rows_affected() > 0)
    }

    /// Content ingested after `fetched_after`, oldest-first by remote
    /// creation time so match emission respects source chronology.
    pub async fn content_fetched_since(
        &self,
        fetched_after: i64,
    ) -> Result<Vec<RedditContent>, CoreError> {
        let rows = sqlx::query(
            "SELECT * FROM reddit_content WHERE fetched_at > ? ORDER BY created_at_remote ASC",
        )
        .bind(fetched_after)
        .fetch_all(self.pool())
        .await
        .map_err(StoreError::from)?;

        rows.iter()
            .map(content_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(CoreError::from)
    }

    pub async fn content_by_source_id(
        &self,
        source_id: &str,
    ) -> Result<Option<RedditContent>, CoreError> {
        let row = sqlx::query("SELECT * FROM reddit_content WHERE source_id = ?")
            .bind(source_id)
            .fetch_optional(self.pool())
            .await
            .map_err(StoreError::from)?;
        row.as_ref()
            .map(content_from_row)
            .transpose()
            .map_err(CoreError::from)
    }
}

fn content_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<RedditContent, StoreError> {
    let content_type_raw: String = row.get("content_type");
    let content_type =
        ContentType::parse(&content_type_raw).ok_or_else(|| StoreError::Decode {
            details: format!("unknown content type {content_type_raw:?}"),
        })?;
    let crosspost_of: Option<String> = row.get("crosspost_of");

    Ok(RedditContent {
        id: parse_uuid(row.get::<String, _>("id").as_str())?,
        source_id: row.get("source_id"),
        subreddit: row.get("subreddit"),
        content_type,
        title: row.get("title"),
        body: row.get("body"),
        author: row.get("author"),
        normalized_text: row.get("normalized_text"),
        content_hash: row.get("content_hash"),
        permalink: row.get("permalink"),
        is_media_post: row.get("is_media_post"),
        crosspost_of: crosspost_of.as_deref().map(parse_uuid).transpose()?,
        created_at_remote: row.get("created_at_remote"),
        fetched_at: row.get("fetched_at"),
        is_deleted: row.get("is_deleted"),
    })
}
