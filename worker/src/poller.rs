use std::collections::HashMap;
use std::sync::Arc;

use database::{compute_content_hash, Database, IngestOutcome, NewContent};
use matching::normalize;
use reddalert_core::{
    ConfigSnapshot, ContentSource, ContentType, CoreError, RedditContent, SourceComment,
    SourceError, SourcePost, SubredditStatus,
};
use tracing::{debug, info, warn};

/// How long a 404/403 subreddit sits out before we look again.
const QUARANTINE_SECONDS: i64 = 3600;

#[derive(Debug, Default)]
pub struct PollSummary {
    pub subreddits_polled: usize,
    pub subreddits_skipped: usize,
    pub subreddits_errored: usize,
    pub new_content: usize,
}

/// Incremental poller. One fetch per subreddit regardless of how
/// many tenants monitor it; cursors, shared-poll clocks, and quarantine
/// deadlines are process-scoped and rebuilt on restart (ingestion dedup
/// absorbs the overlap).
pub struct Poller {
    source: Arc<dyn ContentSource>,
    db: Arc<Database>,
    default_cadence_minutes: i64,
    last_seen_post: HashMap<String, String>,
    last_shared_poll: HashMap<String, i64>,
    quarantine_until: HashMap<String, i64>,
}

impl Poller {
    pub fn new(
        source: Arc<dyn ContentSource>,
        db: Arc<Database>,
        default_cadence_minutes: i64,
    ) -> Self {
        Self {
            source,
            db,
            default_cadence_minutes,
            last_seen_post: HashMap::new(),
            last_shared_poll: HashMap::new(),
            quarantine_until: HashMap::new(),
        }
    }

    pub async fn run_once(
        &mut self,
        snapshot: &ConfigSnapshot,
        now: i64,
    ) -> Result<PollSummary, CoreError> {
        let mut summary = PollSummary::default();

        for name in snapshot.monitored_subreddits() {
            if self.quarantine_until.get(&name).is_some_and(|&t| t > now) {
                summary.subreddits_skipped += 1;
                continue;
            }

            let cadence_minutes = snapshot
                .effective_cadence_minutes(&name)
                .unwrap_or(self.default_cadence_minutes);
            let last = self.last_shared_poll.get(&name).copied().unwrap_or(0);
            if now - last < cadence_minutes * 60 {
                summary.subreddits_skipped += 1;
                continue;
            }

            match self.poll_subreddit(&name, now).await {
                Ok(new_rows) => {
                    self.quarantine_until.remove(&name);
                    self.last_shared_poll.insert(name.clone(), now);
                    self.db.touch_subreddits_polled(&name, now).await?;
                    summary.subreddits_polled += 1;
                    summary.new_content += new_rows.len();
                }
                Err(CoreError::Source(e)) if e.is_subreddit_gone() => {
                    let status = match e {
                        SourceError::SubredditForbidden { .. } => SubredditStatus::Private,
                        _ => SubredditStatus::Inaccessible,
                    };
                    warn!("r/{name} is {}, quarantining for 1h", status.as_str());
                    self.db.set_subreddit_status(&name, status).await?;
                    self.quarantine_until
                        .insert(name.clone(), now + QUARANTINE_SECONDS);
                    summary.subreddits_errored += 1;
                }
                Err(CoreError::Source(e)) => {
                    // Transient; cursor untouched so the next tick retries
                    // from the same point.
                    warn!("poll of r/{name} failed transiently: {e}");
                    summary.subreddits_errored += 1;
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            "poll tick: {} polled, {} skipped, {} errored, {} new items",
            summary.subreddits_polled,
            summary.subreddits_skipped,
            summary.subreddits_errored,
            summary.new_content
        );
        Ok(summary)
    }

    /// Fetch and persist one subreddit. The cursor only advances after
    /// the whole fetch (posts and their comments) succeeds.
    async fn poll_subreddit(
        &mut self,
        name: &str,
        now: i64,
    ) -> Result<Vec<RedditContent>, CoreError> {
        let since = self.last_seen_post.get(name).cloned();
        let posts = self
            .source
            .list_new_posts(name, since.as_deref())
            .await
            .map_err(CoreError::Source)?;

        // Listings come newest first; persist oldest first so stored
        // order follows source chronology.
        let newest_id = posts.first().map(|p| p.source_id.clone());
        let mut new_rows = Vec::new();

        for post in posts.iter().rev() {
            if let Some(row) = self.ingest_post(post, now).await? {
                new_rows.push(row);
            }

            let comments = self
                .source
                .list_top_level_comments(name, &post.source_id, None)
                .await
                .map_err(CoreError::Source)?;
            for comment in comments.iter().rev() {
                if let Some(row) = self.ingest_comment(comment, now).await? {
                    new_rows.push(row);
                }
            }
        }

        if let Some(id) = newest_id {
            self.last_seen_post.insert(name.to_string(), id);
        }
        debug!("r/{name}: {} new content rows", new_rows.len());
        Ok(new_rows)
    }

    async fn ingest_post(
        &self,
        post: &SourcePost,
        now: i64,
    ) -> Result<Option<RedditContent>, CoreError> {
        // Posts match on title + body; comments on body alone.
        let raw_text = if post.title.is_empty() {
            post.body.clone()
        } else {
            format!("{} {}", post.title, post.body)
        };
        let normalized = normalize(&raw_text);

        let item = NewContent {
            source_id: post.source_id.clone(),
            subreddit: post.subreddit.clone(),
            content_type: ContentType::Post,
            title: Some(post.title.clone()).filter(|t| !t.is_empty()),
            body: post.body.clone(),
            author: post.author.clone(),
            content_hash: compute_content_hash(&normalized.text),
            normalized_text: normalized.text,
            permalink: post.permalink.clone(),
            is_media_post: post.is_media_post,
            created_at_remote: post.created_at_remote,
            is_deleted: post.is_deleted,
        };
        self.ingest(item, now).await
    }

    async fn ingest_comment(
        &self,
        comment: &SourceComment,
        now: i64,
    ) -> Result<Option<RedditContent>, CoreError> {
        let normalized = normalize(&comment.body);
        let item = NewContent {
            source_id: comment.source_id.clone(),
            subreddit: comment.subreddit.clone(),
            content_type: ContentType::Comment,
            title: None,
            body: comment.body.clone(),
            author: comment.author.clone(),
            content_hash: compute_content_hash(&normalized.text),
            normalized_text: normalized.text,
            permalink: comment.permalink.clone(),
            is_media_post: false,
            created_at_remote: comment.created_at_remote,
            is_deleted: comment.is_deleted,
        };
        self.ingest(item, now).await
    }

    async fn ingest(&self, item: NewContent, now: i64) -> Result<Option<RedditContent>, CoreError> {
        match self.db.upsert_content(&item, now).await? {
            IngestOutcome::Inserted(row) => Ok(Some(row)),
            IngestOutcome::Refreshed | IngestOutcome::CrosspostRecorded { .. } => Ok(None),
        }
    }
}
