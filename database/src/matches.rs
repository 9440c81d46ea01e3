use reddalert_core::{AlertStatus, ContentType, CoreError, Match, StoreError};
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use crate::{parse_string_array, parse_uuid, Database};

#[derive(Debug, Clone)]
pub struct NewMatch {
    pub tenant_id: Uuid,
    pub keyword_id: Uuid,
    pub content_id: Uuid,
    pub content_type: ContentType,
    pub subreddit: String,
    pub matched_phrase: String,
    pub also_matched: Vec<String>,
    pub snippet: String,
    pub full_text: String,
    pub proximity_score: f64,
    pub reddit_url: String,
    pub reddit_author: String,
    pub is_deleted: bool,
}

impl Database {
    /// Emission dedup: the unique (tenant, keyword, content)
    /// constraint makes re-runs a no-op. Returns the new match id, or
    /// `None` when the triple already has a row.
    pub async fn insert_match(
        &self,
        m: &NewMatch,
        detected_at: i64,
    ) -> Result<Option<Uuid>, CoreError> {
        let id = Uuid::new_v4();
        let result = sqlx::query(
            "INSERT INTO matches \
             (id, tenant_id, keyword_id, content_id, content_type, subreddit, matched_phrase, \
              also_matched, snippet, full_text, proximity_score, reddit_url, reddit_author, \
              is_deleted, detected_at, alert_sent_at, alert_status) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, 'pending')",
        )
        .bind(id.to_string())
        .bind(m.tenant_id.to_string())
        .bind(m.keyword_id.to_string())
        .bind(m.content_id.to_string())
        .bind(m.content_type.as_str())
        .bind(&m.subreddit)
        .bind(&m.matched_phrase)
        .bind(serde_json::to_string(&m.also_matched)?)
        .bind(&m.snippet)
        .bind(&m.full_text)
        .bind(m.proximity_score)
        .bind(&m.reddit_url)
        .bind(&m.reddit_author)
        .bind(m.is_deleted)
        .bind(detected_at)
        .execute(self.pool())
        .await;

        match result {
            Ok(_) => Ok(Some(id)),
            Err(e) => {
                let store_err = StoreError::from(e);
                if store_err.is_unique_violation() {
                    debug!(
                        "match for ({}, {}, {}) already exists",
                        m.tenant_id, m.keyword_id, m.content_id
                    );
                    Ok(None)
                } else {
                    Err(store_err.into())
                }
            }
        }
    }

    pub async fn match_exists(
        &self,
        tenant_id: &Uuid,
        keyword_id: &Uuid,
        content_id: &Uuid,
    ) -> Result<bool, CoreError> {
        let row = sqlx::query(
            "SELECT 1 FROM matches WHERE tenant_id = ? AND keyword_id = ? AND content_id = ?",
        )
        .bind(tenant_id.to_string())
        .bind(keyword_id.to_string())
        .bind(content_id.to_string())
        .fetch_optional(self.pool())
        .await
        .map_err(StoreError::from)?;
        Ok(row.is_some())
    }

    /// All pending matches, oldest first.
    pub async fn pending_matches(&self) -> Result<Vec<Match>, CoreError> {
        let rows = sqlx::query(
            "SELECT * FROM matches WHERE alert_status = 'pending' \
             ORDER BY detected_at ASC, rowid ASC",
        )
        .fetch_all(self.pool())
        .await
        .map_err(StoreError::from)?;

        rows.iter()
            .map(match_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(CoreError::from)
    }

    /// pending -> sent. The status guard in the WHERE clause keeps the
    /// transition machine single-shot under concurrent dispatchers.
    pub async fn mark_matches_sent(&self, ids: &[Uuid], now: i64) -> Result<u64, CoreError> {
        let mut updated = 0;
        for id in ids {
            let result = sqlx::query(
                "UPDATE matches SET alert_status = 'sent', alert_sent_at = ? \
                 WHERE id = ? AND alert_status = 'pending'",
            )
            .bind(now)
            .bind(id.to_string())
            .execute(self.pool())
            .await
            .map_err(StoreError::from)?;
            updated += result.rows_affected();
        }
        Ok(updated)
    }

    /// pending -> failed.
    pub async fn mark_matches_failed(&self, ids: &[Uuid]) -> Result<u64, CoreError> {
        let mut updated = 0;
        for id in ids {
            let result = sqlx::query(
                "UPDATE matches SET alert_status = 'failed' \
                 WHERE id = ? AND alert_status = 'pending'",
            )
            .bind(id.to_string())
            .execute(self.pool())
            .await
            .map_err(StoreError::from)?;
            updated += result.rows_affected();
        }
        Ok(updated)
    }

    pub async fn match_by_id(&self, id: &Uuid) -> Result<Option<Match>, CoreError> {
        let row = sqlx::query("SELECT * FROM matches WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await
            .map_err(StoreError::from)?;
        row.as_ref()
            .map(match_from_row)
            .transpose()
            .map_err(CoreError::from)
    }
}

fn match_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Match, StoreError> {
    let content_type_raw: String = row.get("content_type");
    let content_type =
        ContentType::parse(&content_type_raw).ok_or_else(|| StoreError::Decode {
            details: format!("unknown content type {content_type_raw:?}"),
        })?;
    let status_raw: String = row.get("alert_status");
    let alert_status = AlertStatus::parse(&status_raw).ok_or_else(|| StoreError::Decode {
        details: format!("unknown alert status {status_raw:?}"),
    })?;
    let also_matched_raw: String = row.get("also_matched");

    Ok(Match {
        id: parse_uuid(row.get::<String, _>("id").as_str())?,
        tenant_id: parse_uuid(row.get::<String, _>("tenant_id").as_str())?,
        keyword_id: parse_uuid(row.get::<String, _>("keyword_id").as_str())?,
        content_id: parse_uuid(row.get::<String, _>("content_id").as_str())?,
        content_type,
        subreddit: row.get("subreddit"),
        matched_phrase: row.get("matched_phrase"),
        also_matched: parse_string_array(&also_matched_raw)?,
        snippet: row.get("snippet"),
        full_text: row.get("full_text"),
        proximity_score: row.get("proximity_score"),
        reddit_url: row.get("reddit_url"),
        reddit_author: row.get("reddit_author"),
        is_deleted: row.get("is_deleted"),
        detected_at: row.get("detected_at"),
        alert_sent_at: row.get("alert_sent_at"),
        alert_status,
    })
}
