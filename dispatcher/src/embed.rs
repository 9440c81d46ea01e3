use chrono::{TimeZone, Utc};
use reddalert_core::Match;
use serde_json::{json, Value};

/// Reddit orange.
const EMBED_COLOR: u32 = 0xFF4500;

/// One rich embed per match: subreddit, matched phrase, snippet, author,
/// timestamp, link.
pub fn format_embed(m: &Match) -> Value {
    let mut description = m.snippet.clone();
    if description.chars().count() > 200 {
        description = description.chars().take(197).collect::<String>() + "...";
    }

    let timestamp = Utc
        .timestamp_opt(m.detected_at, 0)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_default();

    let mut fields = vec![
        json!({"name": "Keyword", "value": m.matched_phrase, "inline": true}),
        json!({"name": "Subreddit", "value": format!("r/{}", m.subreddit), "inline": true}),
        json!({"name": "Author", "value": format!("u/{}", m.reddit_author), "inline": true}),
    ];
    if !m.also_matched.is_empty() {
        fields.push(json!({
            "name": "Also Matched",
            "value": m.also_matched.join(", "),
            "inline": false,
        }));
    }

    json!({
        "title": format!("Keyword Match in r/{}", m.subreddit),
        "description": description,
        "url": m.reddit_url,
        "color": EMBED_COLOR,
        "fields": fields,
        "timestamp": timestamp,
        "footer": {"text": "Reddalert"},
    })
}

pub fn single_payload(m: &Match) -> Value {
    json!({ "embeds": [format_embed(m)] })
}

/// Batched messages: one embed per match, at most `max_embeds` per
/// webhook call, overflow split across calls. Order is preserved.
pub fn batch_payloads(matches: &[Match], max_embeds: usize) -> Vec<Value> {
    matches
        .chunks(max_embeds.max(1))
        .map(|chunk| {
            json!({
                "content": format!("{} new keyword matches", matches.len()),
                "embeds": chunk.iter().map(format_embed).collect::<Vec<_>>(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reddalert_core::{AlertStatus, ContentType};
    use uuid::Uuid;

    fn sample_match(snippet: &str) -> Match {
        Match {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            keyword_id: Uuid::new_v4(),
            content_id: Uuid::new_v4(),
            content_type: ContentType::Post,
            subreddit: "sportsbook".to_string(),
            matched_phrase: "arbitrage betting".to_string(),
            also_matched: vec!["arb tool".to_string()],
            snippet: snippet.to_string(),
            full_text: "full text".to_string(),
            proximity_score: 1.0,
            reddit_url: "https://reddit.com/r/sportsbook/comments/abc/".to_string(),
            reddit_author: "poster".to_string(),
            is_deleted: false,
            detected_at: 1_700_000_000,
            alert_sent_at: None,
            alert_status: AlertStatus::Pending,
        }
    }

    #[test]
    fn embed_carries_match_details() {
        let embed = format_embed(&sample_match("a snippet"));
        assert_eq!(embed["title"], "Keyword Match in r/sportsbook");
        assert_eq!(embed["description"], "a snippet");
        assert_eq!(embed["url"], "https://reddit.com/r/sportsbook/comments/abc/");
        assert_eq!(embed["fields"][0]["value"], "arbitrage betting");
        assert_eq!(embed["fields"][2]["value"], "u/poster");
        assert_eq!(embed["fields"][3]["value"], "arb tool");
        assert!(embed["timestamp"].as_str().unwrap().starts_with("2023-11-14"));
    }

    #[test]
    fn long_description_is_clipped() {
        let embed = format_embed(&sample_match(&"x".repeat(300)));
        assert_eq!(embed["description"].as_str().unwrap().chars().count(), 200);
    }

    #[test]
    fn batches_split_at_embed_cap() {
        let matches: Vec<Match> = (0..12).map(|_| sample_match("s")).collect();
        let payloads = batch_payloads(&matches, 10);
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0]["embeds"].as_array().unwrap().len(), 10);
        assert_eq!(payloads[1]["embeds"].as_array().unwrap().len(), 2);
        assert_eq!(payloads[0]["content"], "12 new keyword matches");
    }
}
