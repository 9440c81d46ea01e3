use std::collections::HashMap;

use reddalert_core::{
    normalize_subreddit_name, CoreError, Keyword, MonitoredSubreddit, StoreError, SubredditStatus,
    Tenant, TenantConfig, WebhookConfig,
};
use sqlx::Row;
use uuid::Uuid;

use crate::{parse_string_array, parse_uuid, Database};

/// Keyword as written by the API layer.
#[derive(Debug, Clone)]
pub struct NewKeyword {
    pub tenant_id: Uuid,
    pub phrases: Vec<String>,
    pub exclusions: Vec<String>,
    pub proximity_window: i64,
    pub require_order: bool,
    pub use_stemming: bool,
}

#[derive(Debug, Clone)]
pub struct NewSubreddit {
    pub tenant_id: Uuid,
    pub name: String,
    pub include_media_posts: bool,
    pub dedupe_crossposts: bool,
    pub filter_bots: bool,
}

impl Database {
    pub async fn insert_tenant(
        &self,
        email: &str,
        poll_interval_minutes: i64,
        now: i64,
    ) -> Result<Tenant, CoreError> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO tenants (id, email, poll_interval_minutes, config_version, created_at) \
             VALUES (?, ?, ?, 0, ?)",
        )
        .bind(id.to_string())
        .bind(email)
        .bind(poll_interval_minutes)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(StoreError::from)?;

        Ok(Tenant {
            id,
            email: email.to_string(),
            poll_interval_minutes,
            config_version: 0,
            created_at: now,
        })
    }

    pub async fn insert_keyword(&self, keyword: &NewKeyword, now: i64) -> Result<Uuid, CoreError> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO keywords \
             (id, tenant_id, phrases, exclusions, proximity_window, require_order, use_stemming, \
              is_active, is_quarantined, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 1, 0, ?)",
        )
        .bind(id.to_string())
        .bind(keyword.tenant_id.to_string())
        .bind(serde_json::to_string(&keyword.phrases)?)
        .bind(serde_json::to_string(&keyword.exclusions)?)
        .bind(keyword.proximity_window)
        .bind(keyword.require_order)
        .bind(keyword.use_stemming)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(StoreError::from)?;
        self.bump_config_version(&keyword.tenant_id).await?;
        Ok(id)
    }

    pub async fn insert_subreddit(
        &self,
        subreddit: &NewSubreddit,
    ) -> Result<Uuid, CoreError> {
        let name = normalize_subreddit_name(&subreddit.name)?;
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO monitored_subreddits \
             (id, tenant_id, name, status, include_media_posts, dedupe_crossposts, filter_bots, \
              last_polled_at) \
             VALUES (?, ?, ?, 'active', ?, ?, ?, NULL)",
        )
        .bind(id.to_string())
        .bind(subreddit.tenant_id.to_string())
        .bind(&name)
        .bind(subreddit.include_media_posts)
        .bind(subreddit.dedupe_crossposts)
        .bind(subreddit.filter_bots)
        .execute(self.pool())
        .await
        .map_err(StoreError::from)?;
        self.bump_config_version(&subreddit.tenant_id).await?;
        Ok(id)
    }

    /// At most one primary per tenant: inserting a new primary demotes
    /// the current one. The partial unique index on
    /// (tenant_id) WHERE is_primary backstops this under races.
    pub async fn insert_webhook(
        &self,
        tenant_id: &Uuid,
        url: &str,
        is_primary: bool,
    ) -> Result<Uuid, CoreError> {
        if is_primary {
            sqlx::query(
                "UPDATE webhook_configs SET is_primary = 0 WHERE tenant_id = ? AND is_primary = 1",
            )
            .bind(tenant_id.to_string())
            .execute(self.pool())
            .await
            .map_err(StoreError::from)?;
        }

        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO webhook_configs (id, tenant_id, url, is_primary, is_active, last_tested_at) \
             VALUES (?, ?, ?, ?, 1, NULL)",
        )
        .bind(id.to_string())
        .bind(tenant_id.to_string())
        .bind(url)
        .bind(is_primary)
        .execute(self.pool())
        .await
        .map_err(StoreError::from)?;
        self.bump_config_version(tenant_id).await?;
        Ok(id)
    }

    /// Every config write bumps the tenant's monotonic version; the
    /// config reader invalidates on version change.
    pub async fn bump_config_version(&self, tenant_id: &Uuid) -> Result<(), CoreError> {
        sqlx::query("UPDATE tenants SET config_version = config_version + 1 WHERE id = ?")
            .bind(tenant_id.to_string())
            .execute(self.pool())
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    /// Quarantine a keyword whose stored config violates the matcher's
    /// invariants; surfaced back through the config API.
    pub async fn quarantine_keyword(&self, keyword_id: &Uuid) -> Result<(), CoreError> {
        sqlx::query("UPDATE keywords SET is_quarantined = 1 WHERE id = ?")
            .bind(keyword_id.to_string())
            .execute(self.pool())
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    /// Flip status for every tenant row monitoring `name` (404/403 apply
    /// to the subreddit, not to one tenant).
    pub async fn set_subreddit_status(
        &self,
        name: &str,
        status: SubredditStatus,
    ) -> Result<(), CoreError> {
        sqlx::query("UPDATE monitored_subreddits SET status = ? WHERE name = ?")
            .bind(status.as_str())
            .bind(name)
            .execute(self.pool())
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    /// Successful poll: stamp `last_polled_at` and restore active status
    /// for every tenant row on the subreddit.
    pub async fn touch_subreddits_polled(&self, name: &str, now: i64) -> Result<(), CoreError> {
        sqlx::query(
            "UPDATE monitored_subreddits SET last_polled_at = ?, status = 'active' WHERE name = ?",
        )
        .bind(now)
        .bind(name)
        .execute(self.pool())
        .await
        .map_err(StoreError::from)?;
        Ok(())
    }

    pub async fn config_versions(&self) -> Result<HashMap<Uuid, i64>, CoreError> {
        let rows = sqlx::query("SELECT id, config_version FROM tenants")
            .fetch_all(self.pool())
            .await
            .map_err(StoreError::from)?;
        let mut versions = HashMap::new();
        for row in rows {
            versions.insert(
                parse_uuid(row.get::<String, _>("id").as_str())?,
                row.get::<i64, _>("config_version"),
            );
        }
        Ok(versions)
    }

    /// Full tenant config load for the snapshot cache.
    pub async fn load_tenant_configs(&self) -> Result<Vec<TenantConfig>, CoreError> {
        let tenant_rows = sqlx::query("SELECT * FROM tenants")
            .fetch_all(self.pool())
            .await
            .map_err(StoreError::from)?;

        let mut configs = Vec::with_capacity(tenant_rows.len());
        for row in &tenant_rows {
            let tenant = Tenant {
                id: parse_uuid(row.get::<String, _>("id").as_str())?,
                email: row.get("email"),
                poll_interval_minutes: row.get("poll_interval_minutes"),
                config_version: row.get("config_version"),
                created_at: row.get("created_at"),
            };
            let keywords = self.keywords_for(&tenant.id).await?;
            let subreddits = self.subreddits_for(&tenant.id).await?;
            let webhooks = self.webhooks_for(&tenant.id).await?;
            configs.push(TenantConfig {
                tenant,
                keywords,
                subreddits,
                webhooks,
            });
        }
        Ok(configs)
    }

    async fn keywords_for(&self, tenant_id: &Uuid) -> Result<Vec<Keyword>, CoreError> {
        let rows = sqlx::query("SELECT * FROM keywords WHERE tenant_id = ? ORDER BY created_at")
            .bind(tenant_id.to_string())
            .fetch_all(self.pool())
            .await
            .map_err(StoreError::from)?;

        let mut keywords = Vec::with_capacity(rows.len());
        for row in &rows {
            let phrases_raw: String = row.get("phrases");
            let exclusions_raw: String = row.get("exclusions");
            keywords.push(Keyword {
                id: parse_uuid(row.get::<String, _>("id").as_str())?,
                tenant_id: *tenant_id,
                phrases: parse_string_array(&phrases_raw)?,
                exclusions: parse_string_array(&exclusions_raw)?,
                proximity_window: row.get("proximity_window"),
                require_order: row.get("require_order"),
                use_stemming: row.get("use_stemming"),
                is_active: row.get("is_active"),
                is_quarantined: row.get("is_quarantined"),
                created_at: row.get("created_at"),
            });
        }
        Ok(keywords)
    }

    async fn subreddits_for(&self, tenant_id: &Uuid) -> Result<Vec<MonitoredSubreddit>, CoreError> {
        let rows = sqlx::query("SELECT * FROM monitored_subreddits WHERE tenant_id = ?")
            .bind(tenant_id.to_string())
            .fetch_all(self.pool())
            .await
            .map_err(StoreError::from)?;

        let mut subreddits = Vec::with_capacity(rows.len());
        for row in &rows {
            let status_raw: String = row.get("status");
            let status = SubredditStatus::parse(&status_raw).ok_or_else(|| StoreError::Decode {
                details: format!("unknown subreddit status {status_raw:?}"),
            })?;
            subreddits.push(MonitoredSubreddit {
                id: parse_uuid(row.get::<String, _>("id").as_str())?,
                tenant_id: *tenant_id,
                name: row.get("name"),
                status,
                include_media_posts: row.get("include_media_posts"),
                dedupe_crossposts: row.get("dedupe_crossposts"),
                filter_bots: row.get("filter_bots"),
                last_polled_at: row.get("last_polled_at"),
            });
        }
        Ok(subreddits)
    }

    async fn webhooks_for(&self, tenant_id: &Uuid) -> Result<Vec<WebhookConfig>, CoreError> {
        let rows = sqlx::query("SELECT * FROM webhook_configs WHERE tenant_id = ?")
            .bind(tenant_id.to_string())
            .fetch_all(self.pool())
            .await
            .map_err(StoreError::from)?;

        let mut webhooks = Vec::with_capacity(rows.len());
        for row in &rows {
            webhooks.push(WebhookConfig {
                id: parse_uuid(row.get::<String, _>("id").as_str())?,
                tenant_id: *tenant_id,
                url: row.get("url"),
                is_primary: row.get("is_primary"),
                is_active: row.get("is_active"),
                last_tested_at: row.get("last_tested_at"),
            });
        }
        Ok(webhooks)
    }
}
