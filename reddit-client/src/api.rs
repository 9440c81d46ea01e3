use reddalert_core::{SourceComment, SourceError, SourcePost};
use serde::Deserialize;
use tracing::warn;

/// Listing envelope shared by every Reddit listing endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct RedditListing {
    pub data: RedditListingData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditListingData {
    pub children: Vec<RedditListingChild>,
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub before: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditListingChild {
    pub kind: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditPostData {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    #[serde(default)]
    pub author: String,
    pub subreddit: String,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub is_self: bool,
    #[serde(default)]
    pub is_video: bool,
    #[serde(default)]
    pub post_hint: Option<String>,
    #[serde(default)]
    pub removed_by_category: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditCommentData {
    pub id: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub author: String,
    pub subreddit: String,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub link_id: String,
}

impl RedditPostData {
    pub fn into_source_post(self) -> SourcePost {
        let is_media_post = self.is_video
            || !self.is_self
            || matches!(
                self.post_hint.as_deref(),
                Some("image") | Some("hosted:video") | Some("rich:video")
            );
        let is_deleted = self.removed_by_category.is_some()
            || self.author == "[deleted]"
            || matches!(self.selftext.as_str(), "[removed]" | "[deleted]");
        SourcePost {
            source_id: self.id,
            subreddit: self.subreddit.to_lowercase(),
            author: self.author,
            title: self.title,
            body: self.selftext,
            created_at_remote: self.created_utc as i64,
            permalink: absolute_permalink(&self.permalink),
            is_media_post,
            is_deleted,
        }
    }
}

impl RedditCommentData {
    pub fn into_source_comment(self) -> SourceComment {
        let is_deleted =
            self.author == "[deleted]" || matches!(self.body.as_str(), "[removed]" | "[deleted]");
        SourceComment {
            source_id: self.id,
            subreddit: self.subreddit.to_lowercase(),
            post_source_id: strip_fullname_prefix(&self.link_id).to_string(),
            author: self.author,
            body: self.body,
            created_at_remote: self.created_utc as i64,
            permalink: absolute_permalink(&self.permalink),
            is_deleted,
        }
    }
}

/// Posts from a `/r/<sub>/new` listing. Malformed children are skipped
/// with a warning; the rest of the batch proceeds.
pub fn posts_from_listing(listing: RedditListing) -> Vec<SourcePost> {
    listing
        .data
        .children
        .into_iter()
        .filter(|child| child.kind == "t3")
        .filter_map(|child| match serde_json::from_value::<RedditPostData>(child.data) {
            Ok(post) => Some(post.into_source_post()),
            Err(e) => {
                warn!("skipping malformed post in listing: {}", e);
                None
            }
        })
        .collect()
}

/// Top-level comments from a `/comments/<id>` response. `more` stubs are
/// dropped: thread-deep traversal is a non-goal.
pub fn comments_from_listing(listing: RedditListing) -> Vec<SourceComment> {
    listing
        .data
        .children
        .into_iter()
        .filter(|child| child.kind == "t1")
        .filter_map(
            |child| match serde_json::from_value::<RedditCommentData>(child.data) {
                Ok(comment) => Some(comment.into_source_comment()),
                Err(e) => {
                    warn!("skipping malformed comment in listing: {}", e);
                    None
                }
            },
        )
        .collect()
}

fn absolute_permalink(permalink: &str) -> String {
    if permalink.starts_with("http") {
        permalink.to_string()
    } else {
        format!("https://reddit.com{permalink}")
    }
}

fn strip_fullname_prefix(fullname: &str) -> &str {
    fullname
        .split_once('_')
        .map(|(_, id)| id)
        .unwrap_or(fullname)
}

/// Reddit fullname for a post id, as used in `before` cursors.
pub fn post_fullname(post_id: &str) -> String {
    format!("t3_{post_id}")
}
