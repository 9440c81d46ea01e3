use async_trait::async_trait;

use crate::error::SourceError;

/// A post as delivered by the forum source, before normalization.
#[derive(Debug, Clone)]
pub struct SourcePost {
    pub source_id: String,
    pub subreddit: String,
    pub author: String,
    pub title: String,
    pub body: String,
    pub created_at_remote: i64,
    pub permalink: String,
    pub is_media_post: bool,
    pub is_deleted: bool,
}

#[derive(Debug, Clone)]
pub struct SourceComment {
    pub source_id: String,
    pub subreddit: String,
    pub post_source_id: String,
    pub author: String,
    pub body: String,
    pub created_at_remote: i64,
    pub permalink: String,
    pub is_deleted: bool,
}

/// Abstract forum source. The poller only sees this trait; the
/// concrete Reddit client lives in its own crate and tests substitute
/// an in-memory implementation.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// New posts in a subreddit, newest first, stopping at `since_id`
    /// when the source supports incremental cursors.
    async fn list_new_posts(
        &self,
        subreddit: &str,
        since_id: Option<&str>,
    ) -> Result<Vec<SourcePost>, SourceError>;

    /// Top-level comments of a post. Thread-deep traversal is a
    /// non-goal; replies to comments are never fetched.
    async fn list_top_level_comments(
        &self,
        subreddit: &str,
        post_source_id: &str,
        since_id: Option<&str>,
    ) -> Result<Vec<SourceComment>, SourceError>;
}
