use std::collections::HashSet;
use std::sync::Arc;
use std::sync::LazyLock;

use database::{Database, NewMatch};
use matching::{match_keyword, token_spans, KeywordHit, KeywordSpec};
use regex::Regex;
use reddalert_core::{ConfigSnapshot, CoreError, Keyword, RedditContent};
use tracing::{debug, info, warn};
use uuid::Uuid;

static BOT_AUTHOR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bbot\b$").unwrap());

const KNOWN_BOTS: [&str; 5] = [
    "automoderator",
    "totesmessenger",
    "remindmebot",
    "sneakpeekbot",
    "repostsleuthbot",
];

const SNIPPET_BUDGET: usize = 200;

pub fn is_bot_author(author: &str) -> bool {
    BOT_AUTHOR_RE.is_match(author) || KNOWN_BOTS.contains(&author.to_lowercase().as_str())
}

/// Fan-out from shared content to every active (tenant × subreddit ×
/// keyword) triple. Emission dedup is the unique match constraint
/// plus a short-term in-memory set.
pub struct MatchEngine {
    db: Arc<Database>,
    seen: HashSet<(Uuid, Uuid, Uuid)>,
}

impl MatchEngine {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            seen: HashSet::new(),
        }
    }

    /// Process a batch of content rows (already oldest-first). Returns
    /// the number of match rows created.
    pub async fn process_batch(
        &mut self,
        batch: &[RedditContent],
        snapshot: &ConfigSnapshot,
        now: i64,
    ) -> Result<usize, CoreError> {
        let mut created = 0;
        let mut quarantined_this_cycle: HashSet<Uuid> = HashSet::new();

        for content in batch {
            let subscribers = snapshot.subscribers_of(&content.subreddit);
            if subscribers.is_empty() {
                continue;
            }

            let tokens = matching::tokenize(&content.normalized_text);
            if tokens.is_empty() {
                continue;
            }

            for (tenant_config, settings) in &subscribers {
                if content.is_media_post && !settings.include_media_posts {
                    continue;
                }
                if settings.filter_bots && is_bot_author(&content.author) {
                    continue;
                }

                for keyword in tenant_config.active_keywords() {
                    if quarantined_this_cycle.contains(&keyword.id) {
                        continue;
                    }
                    if let Err(e) = keyword.validate() {
                        warn!("quarantining keyword {}: {e}", keyword.id);
                        self.db.quarantine_keyword(&keyword.id).await?;
                        quarantined_this_cycle.insert(keyword.id);
                        continue;
                    }

                    // Crosspost dedup: skip when this keyword already
                    // matched the origin content for this tenant.
                    if settings.dedupe_crossposts {
                        if let Some(origin_id) = content.crosspost_of {
                            if self
                                .db
                                .match_exists(&tenant_config.tenant.id, &keyword.id, &origin_id)
                                .await?
                            {
                                debug!(
                                    "skipping crosspost {} already matched at origin",
                                    content.source_id
                                );
                                continue;
                            }
                        }
                    }

                    let triple = (tenant_config.tenant.id, keyword.id, content.id);
                    if self.seen.contains(&triple) {
                        continue;
                    }

                    let Some(hit) = match_keyword(&tokens, &keyword_spec(keyword)) else {
                        continue;
                    };

                    let new_match = build_match(tenant_config.tenant.id, keyword, content, &hit);
                    if self.db.insert_match(&new_match, now).await?.is_some() {
                        created += 1;
                    }
                    self.seen.insert(triple);
                }
            }
        }

        if created > 0 {
            info!("match tick: created {created} match rows");
        }
        Ok(created)
    }
}

fn keyword_spec(keyword: &Keyword) -> KeywordSpec {
    KeywordSpec {
        phrases: keyword.phrases.clone(),
        exclusions: keyword.exclusions.clone(),
        proximity_window: keyword.proximity_window.max(1) as usize,
        require_order: keyword.require_order,
        use_stemming: keyword.use_stemming,
    }
}

fn build_match(
    tenant_id: Uuid,
    keyword: &Keyword,
    content: &RedditContent,
    hit: &KeywordHit,
) -> NewMatch {
    NewMatch {
        tenant_id,
        keyword_id: keyword.id,
        content_id: content.id,
        content_type: content.content_type,
        subreddit: content.subreddit.clone(),
        matched_phrase: hit.phrase.clone(),
        also_matched: hit.also_matched.clone(),
        snippet: build_snippet(content, hit),
        full_text: content.body.clone(),
        proximity_score: hit.score,
        reddit_url: content.permalink.clone(),
        reddit_author: content.author.clone(),
        is_deleted: content.is_deleted,
    }
}

/// Snippet around the matched span, cut from the original (pre-normalized)
/// text when the span can be located there, at most 200 chars with `…`
/// markers replacing the first/last char when truncated.
fn build_snippet(content: &RedditContent, hit: &KeywordHit) -> String {
    let spans = token_spans(&content.normalized_text);
    let (Some(first), Some(last)) = (spans.get(hit.span_start), spans.get(hit.span_end)) else {
        return clip_chars(&content.normalized_text, SNIPPET_BUDGET);
    };
    let matched = &content.normalized_text[first.0..last.1];

    let raw = match &content.title {
        Some(title) if !title.is_empty() => format!("{title} {}", content.body),
        _ => content.body.clone(),
    };

    let raw_chars: Vec<char> = raw.chars().collect();
    let matched_chars: Vec<char> = matched.chars().collect();

    let (chars, match_start, match_len) = match find_ci(&raw_chars, &matched_chars) {
        Some(i) => (raw_chars, i, matched_chars.len()),
        None => {
            // Markup stripping moved the span; fall back to the
            // normalized text window.
            let start = content.normalized_text[..first.0].chars().count();
            let chars: Vec<char> = content.normalized_text.chars().collect();
            (chars, start, matched_chars.len())
        }
    };

    if chars.len() <= SNIPPET_BUDGET {
        return chars.into_iter().collect();
    }

    let center = match_start + match_len / 2;
    let start = center.saturating_sub(SNIPPET_BUDGET / 2);
    let end = (start + SNIPPET_BUDGET).min(chars.len());
    let start = end.saturating_sub(SNIPPET_BUDGET);

    let mut window: Vec<char> = chars[start..end].to_vec();
    if start > 0 {
        window[0] = '…';
    }
    if end < chars.len() {
        let last = window.len() - 1;
        window[last] = '…';
    }
    window.into_iter().collect()
}

fn clip_chars(text: &str, budget: usize) -> String {
    text.chars().take(budget).collect()
}

/// First ASCII-case-insensitive occurrence of `needle` in `haystack`,
/// as a char index.
fn find_ci(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len()).find(|&i| {
        haystack[i..i + needle.len()]
            .iter()
            .zip(needle)
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bot_authors_are_detected() {
        assert!(is_bot_author("stats-bot"));
        assert!(is_bot_author("Odds-Bot"));
        assert!(is_bot_author("AutoModerator"));
        assert!(is_bot_author("remindmebot"));
        // Underscore is a word character, so `_bot` is not a word-final
        // "bot" and falls through to the builtin list only.
        assert!(!is_bot_author("sports_bot"));
        assert!(!is_bot_author("botanist"));
        assert!(!is_bot_author("regular_user"));
    }

    #[test]
    fn snippet_preserves_original_casing() {
        let content = sample_content(
            Some("Arbitrage Betting Tips"),
            "I Recommend Arbitrage Betting strategies.",
        );
        let hit = KeywordHit {
            phrase: "arbitrage betting".to_string(),
            span_start: 0,
            span_end: 1,
            score: 1.0,
            also_matched: vec![],
        };
        let snippet = build_snippet(&content, &hit);
        assert!(snippet.contains("Arbitrage Betting"));
        assert!(snippet.chars().count() <= 200);
    }

    #[test]
    fn long_snippet_is_truncated_with_markers() {
        let body = format!("{} arbitrage betting {}", "word ".repeat(80), "more ".repeat(80));
        let content = sample_content(None, &body);
        let tokens = matching::tokenize(&content.normalized_text);
        let target = tokens.iter().position(|t| t == "arbitrage").unwrap();
        let hit = KeywordHit {
            phrase: "arbitrage betting".to_string(),
            span_start: target,
            span_end: target + 1,
            score: 1.0,
            also_matched: vec![],
        };
        let snippet = build_snippet(&content, &hit);
        assert_eq!(snippet.chars().count(), 200);
        assert!(snippet.starts_with('…'));
        assert!(snippet.ends_with('…'));
        assert!(snippet.contains("arbitrage betting"));
    }

    fn sample_content(title: Option<&str>, body: &str) -> RedditContent {
        let raw = match title {
            Some(t) => format!("{t} {body}"),
            None => body.to_string(),
        };
        let normalized = matching::normalize(&raw);
        RedditContent {
            id: Uuid::new_v4(),
            source_id: "abc".to_string(),
            subreddit: "sportsbook".to_string(),
            content_type: reddalert_core::ContentType::Post,
            title: title.map(str::to_string),
            body: body.to_string(),
            author: "poster".to_string(),
            normalized_text: normalized.text,
            content_hash: "hash".to_string(),
            permalink: "https://reddit.com/r/sportsbook/comments/abc/".to_string(),
            is_media_post: false,
            crosspost_of: None,
            created_at_remote: 0,
            fetched_at: 0,
            is_deleted: false,
        }
    }
}
