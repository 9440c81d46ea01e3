use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConfigError, KeywordInvariantError};

static SUBREDDIT_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9_]{3,21}$").unwrap());

#[derive(Debug, Clone)]
pub struct Tenant {
    pub id: Uuid,
    pub email: String,
    pub poll_interval_minutes: i64,
    pub config_version: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct Keyword {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// OR-group: matching any phrase counts as a keyword hit.
    pub phrases: Vec<String>,
    pub exclusions: Vec<String>,
    pub proximity_window: i64,
    pub require_order: bool,
    pub use_stemming: bool,
    pub is_active: bool,
    pub is_quarantined: bool,
    pub created_at: i64,
}

impl Keyword {
    pub fn validate(&self) -> Result<(), KeywordInvariantError> {
        if self.phrases.is_empty() {
            return Err(KeywordInvariantError::EmptyPhrases);
        }
        for phrase in &self.phrases {
            if phrase.trim().is_empty() {
                return Err(KeywordInvariantError::EmptyPhrase);
            }
            if phrase.chars().count() > 200 {
                return Err(KeywordInvariantError::PhraseTooLong {
                    chars: phrase.chars().count(),
                });
            }
        }
        if !(1..=50).contains(&self.proximity_window) {
            return Err(KeywordInvariantError::WindowOutOfRange {
                window: self.proximity_window,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubredditStatus {
    Active,
    Inaccessible,
    Private,
}

impl SubredditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubredditStatus::Active => "active",
            SubredditStatus::Inaccessible => "inaccessible",
            SubredditStatus::Private => "private",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SubredditStatus::Active),
            "inaccessible" => Some(SubredditStatus::Inaccessible),
            "private" => Some(SubredditStatus::Private),
            _ => None,
        }
    }
}

/// Canonicalize a user-supplied subreddit name: strip an `r/` prefix,
/// lowercase, and enforce the provider's naming rules.
pub fn normalize_subreddit_name(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    let stripped = trimmed
        .strip_prefix("r/")
        .or_else(|| trimmed.strip_prefix("/r/"))
        .unwrap_or(trimmed);
    let name = stripped.to_lowercase();
    if !SUBREDDIT_NAME_RE.is_match(&name) {
        return Err(ConfigError::InvalidValue {
            field: "subreddit".to_string(),
            value: raw.to_string(),
        });
    }
    Ok(name)
}

#[derive(Debug, Clone)]
pub struct MonitoredSubreddit {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub status: SubredditStatus,
    pub include_media_posts: bool,
    pub dedupe_crossposts: bool,
    pub filter_bots: bool,
    pub last_polled_at: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub url: String,
    pub is_primary: bool,
    pub is_active: bool,
    pub last_tested_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Post,
    Comment,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Post => "post",
            ContentType::Comment => "comment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "post" => Some(ContentType::Post),
            "comment" => Some(ContentType::Comment),
            _ => None,
        }
    }
}

/// A fetched post or comment, shared across tenants. One row per body
/// text per (subreddit, content type); crossposts link back via
/// `crosspost_of` instead of duplicating content.
#[derive(Debug, Clone)]
pub struct RedditContent {
    pub id: Uuid,
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
    pub crosspost_of: Option<Uuid>,
    pub created_at_remote: i64,
    pub fetched_at: i64,
    pub is_deleted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Pending,
    Sent,
    Failed,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Pending => "pending",
            AlertStatus::Sent => "sent",
            AlertStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AlertStatus::Pending),
            "sent" => Some(AlertStatus::Sent),
            "failed" => Some(AlertStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Match {
    pub id: Uuid,
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
    pub detected_at: i64,
    pub alert_sent_at: Option<i64>,
    pub alert_status: AlertStatus,
}

/// One tenant's active configuration, as read by the pipeline. Produced
/// only by the Tenant Config Reader; the API layer is the only writer.
#[derive(Debug, Clone)]
pub struct TenantConfig {
    pub tenant: Tenant,
    pub keywords: Vec<Keyword>,
    pub subreddits: Vec<MonitoredSubreddit>,
    pub webhooks: Vec<WebhookConfig>,
}

impl TenantConfig {
    /// The dispatch target: the active primary webhook. Non-primary
    /// webhooks are explicit failovers only; with no primary flagged,
    /// dispatch skips the tenant rather than picking one automatically.
    pub fn primary_webhook(&self) -> Option<&WebhookConfig> {
        self.webhooks.iter().find(|w| w.is_active && w.is_primary)
    }

    pub fn subreddit_settings(&self, name: &str) -> Option<&MonitoredSubreddit> {
        self.subreddits.iter().find(|s| s.name == name)
    }

    pub fn active_keywords(&self) -> impl Iterator<Item = &Keyword> {
        self.keywords
            .iter()
            .filter(|k| k.is_active && !k.is_quarantined)
    }
}

/// Copy-on-write snapshot of every tenant's config. Readers clone the
/// `Arc`s and never lock.
#[derive(Debug, Clone, Default)]
pub struct ConfigSnapshot {
    pub tenants: HashMap<Uuid, Arc<TenantConfig>>,
}

impl ConfigSnapshot {
    pub fn tenant(&self, id: &Uuid) -> Option<&Arc<TenantConfig>> {
        self.tenants.get(id)
    }

    /// Distinct subreddit names monitored by at least one tenant.
    pub fn monitored_subreddits(&self) -> BTreeSet<String> {
        self.tenants
            .values()
            .flat_map(|t| t.subreddits.iter().map(|s| s.name.clone()))
            .collect()
    }

    /// Tenants monitoring `name`, with their per-subreddit settings.
    pub fn subscribers_of<'a>(
        &'a self,
        name: &str,
    ) -> Vec<(&'a Arc<TenantConfig>, &'a MonitoredSubreddit)> {
        self.tenants
            .values()
            .filter_map(|t| t.subreddit_settings(name).map(|s| (t, s)))
            .collect()
    }

    /// Effective poll cadence for a subreddit: the minimum interval among
    /// subscribing tenants.
    pub fn effective_cadence_minutes(&self, name: &str) -> Option<i64> {
        self.subscribers_of(name)
            .iter()
            .map(|(t, _)| t.tenant.poll_interval_minutes)
            .min()
    }
}
