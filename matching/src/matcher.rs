//! Proximity matcher: decides whether an OR-group of phrases hits a
//! normalized token stream, honoring exclusions, optional stemming,
//! optional ordering, and a configurable word window.

use std::collections::HashMap;

use crate::normalizer::tokenize;

/// Matching rules for one keyword. Phrases form an OR-group; exclusions
/// veto a match anywhere in the text.
#[derive(Debug, Clone)]
pub struct KeywordSpec {
    pub phrases: Vec<String>,
    pub exclusions: Vec<String>,
    pub proximity_window: usize,
    pub require_order: bool,
    pub use_stemming: bool,
}

impl Default for KeywordSpec {
    fn default() -> Self {
        Self {
            phrases: Vec::new(),
            exclusions: Vec::new(),
            proximity_window: 15,
            require_order: false,
            use_stemming: false,
        }
    }
}

/// The best hit for a keyword. `span_start..=span_end` are token indices
/// of the primary phrase's tightest occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordHit {
    pub phrase: String,
    pub span_start: usize,
    pub span_end: usize,
    pub score: f64,
    pub also_matched: Vec<String>,
}

const VOWELS: [char; 5] = ['a', 'e', 'i', 'o', 'u'];

// Longest-first so the longest listed suffix wins.
const STEM_SUFFIXES: [&str; 9] = [
    "ment", "tion", "ing", "est", "ed", "es", "ly", "er", "s",
];

/// Deterministic suffix stemmer. Strips the longest matching suffix when
/// the remaining stem keeps at least 3 chars, then reduces a doubled
/// final consonant (betting -> bett -> bet) and drops a trailing `e`
/// (arbitrage / arbitraging -> arbitrag) under the same length floor.
pub fn stem(word: &str) -> String {
    let mut stem = word;
    for suffix in STEM_SUFFIXES {
        if let Some(rest) = stem.strip_suffix(suffix) {
            if rest.chars().count() >= 3 {
                stem = rest;
                break;
            }
        }
    }
    let mut out: Vec<char> = stem.chars().collect();
    if out.len() > 3 {
        if let [.., a, b] = out[..] {
            if a == b && !VOWELS.contains(&b) {
                out.pop();
            }
        }
    }
    if out.len() > 3 && out.last() == Some(&'e') {
        out.pop();
    }
    out.into_iter().collect()
}

/// Run one keyword against a normalized token stream. Returns the
/// primary phrase's best hit, or `None` when no phrase hits or any
/// exclusion hits. Pure and deterministic.
pub fn match_keyword(tokens: &[String], spec: &KeywordSpec) -> Option<KeywordHit> {
    if tokens.is_empty() || spec.phrases.is_empty() || spec.proximity_window == 0 {
        return None;
    }

    let eq_tokens: Vec<String> = if spec.use_stemming {
        tokens.iter().map(|t| stem(t)).collect()
    } else {
        tokens.to_vec()
    };

    // Exclusion scope is the whole text: same phrase-match rule with the
    // keyword's window and no ordering constraint.
    for exclusion in &spec.exclusions {
        let excl_tokens = prepare_phrase(exclusion, spec.use_stemming);
        if !excl_tokens.is_empty()
            && best_hit(&eq_tokens, &excl_tokens, spec.proximity_window, false).is_some()
        {
            return None;
        }
    }

    let mut primary: Option<(String, usize, usize, usize)> = None;
    let mut also_matched = Vec::new();

    for phrase in &spec.phrases {
        let phrase_tokens = prepare_phrase(phrase, spec.use_stemming);
        if phrase_tokens.is_empty() {
            continue;
        }
        if let Some((lo, hi)) = best_hit(
            &eq_tokens,
            &phrase_tokens,
            spec.proximity_window,
            spec.require_order,
        ) {
            if primary.is_none() {
                primary = Some((phrase.clone(), lo, hi, phrase_tokens.len()));
            } else {
                also_matched.push(phrase.clone());
            }
        }
    }

    let (phrase, span_start, span_end, phrase_len) = primary?;
    let score = proximity_score(span_end - span_start + 1, phrase_len, spec.proximity_window);
    Some(KeywordHit {
        phrase,
        span_start,
        span_end,
        score,
        also_matched,
    })
}

fn prepare_phrase(phrase: &str, use_stemming: bool) -> Vec<String> {
    let mut tokens = tokenize(&phrase.to_lowercase());
    if use_stemming {
        for token in &mut tokens {
            *token = stem(token);
        }
    }
    tokens
}

/// Tight hit ~ 1.0, hit spanning the full window ~ 0.0.
fn proximity_score(span: usize, phrase_len: usize, window: usize) -> f64 {
    let denom = (window as i64 - phrase_len as i64 + 1).max(1) as f64;
    let score = 1.0 - ((span - phrase_len) as f64 / denom);
    score.clamp(0.0, 1.0)
}

/// Best occurrence of a phrase in the token stream: minimal
/// `max(P) - min(P)`, ties broken by the smallest `min(P)`. Returns the
/// `(min, max)` token indices, or `None` when the phrase cannot hit
/// inside the window.
fn best_hit(
    tokens: &[String],
    phrase: &[String],
    window: usize,
    require_order: bool,
) -> Option<(usize, usize)> {
    if phrase.is_empty() || phrase.len() > window || phrase.len() > tokens.len() {
        return None;
    }
    if require_order {
        best_ordered_hit(tokens, phrase, window)
    } else {
        best_unordered_hit(tokens, phrase, window)
    }
}

/// Minimum-window sweep over the occurrence stream. Repeated phrase
/// tokens are a multiset: a window must hold at least as many
/// occurrences of each token as the phrase does.
fn best_unordered_hit(
    tokens: &[String],
    phrase: &[String],
    window: usize,
) -> Option<(usize, usize)> {
    let mut need: HashMap<&str, usize> = HashMap::new();
    for token in phrase {
        *need.entry(token.as_str()).or_insert(0) += 1;
    }
    let distinct = need.len();

    let events: Vec<(usize, &str)> = tokens
        .iter()
        .enumerate()
        .filter(|(_, t)| need.contains_key(t.as_str()))
        .map(|(i, t)| (i, t.as_str()))
        .collect();

    let mut have: HashMap<&str, usize> = HashMap::new();
    let mut satisfied = 0;
    let mut best: Option<(usize, usize)> = None;
    let mut left = 0;

    for right in 0..events.len() {
        let (_, class) = events[right];
        let count = have.entry(class).or_insert(0);
        *count += 1;
        if *count == need[class] {
            satisfied += 1;
        }

        while satisfied == distinct {
            let (pos_left, class_left) = events[left];
            let (pos_right, _) = events[right];
            let span = pos_right - pos_left + 1;
            if span <= window {
                let improves = match best {
                    Some((lo, hi)) => span < hi - lo + 1,
                    None => true,
                };
                if improves {
                    best = Some((pos_left, pos_right));
                }
            }
            let count = have.get_mut(class_left).unwrap();
            if *count == need[class_left] {
                satisfied -= 1;
            }
            *count -= 1;
            left += 1;
        }
    }

    best
}

/// Strictly-increasing positions in phrase order. For each anchor
/// occurrence of the first token, greedily chain the earliest later
/// occurrence of each following token; that minimizes the span for the
/// anchor, and scanning anchors left-to-right keeps ties on the
/// smallest start.
fn best_ordered_hit(tokens: &[String], phrase: &[String], window: usize) -> Option<(usize, usize)> {
    let positions: Vec<Vec<usize>> = phrase
        .iter()
        .map(|pt| {
            tokens
                .iter()
                .enumerate()
                .filter(|(_, t)| *t == pt)
                .map(|(i, _)| i)
                .collect::<Vec<_>>()
        })
        .collect();
    if positions.iter().any(|p| p.is_empty()) {
        return None;
    }

    let mut best: Option<(usize, usize)> = None;
    'anchors: for &start in &positions[0] {
        let mut cursor = start;
        for occurrences in &positions[1..] {
            let next_idx = occurrences.partition_point(|&p| p <= cursor);
            match occurrences.get(next_idx) {
                Some(&next) => cursor = next,
                // Nothing after `cursor`; later anchors only move it
                // further right, so no chain can complete.
                None => break 'anchors,
            }
        }
        let span = cursor - start + 1;
        if span <= window {
            let improves = match best {
                Some((lo, hi)) => span < hi - lo + 1,
                None => true,
            };
            if improves {
                best = Some((start, cursor));
            }
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::normalize;

    fn spec(phrases: &[&str]) -> KeywordSpec {
        KeywordSpec {
            phrases: phrases.iter().map(|p| p.to_string()).collect(),
            ..KeywordSpec::default()
        }
    }

    fn tokens(text: &str) -> Vec<String> {
        normalize(text).tokens
    }

    #[test]
    fn exact_phrase_hit_scores_full() {
        let text = tokens("I recommend arbitrage betting strategies for new sportsbooks.");
        let hit = match_keyword(&text, &spec(&["arbitrage betting"])).unwrap();
        assert_eq!(hit.phrase, "arbitrage betting");
        assert_eq!((hit.span_start, hit.span_end), (2, 3));
        assert_eq!(hit.score, 1.0);
    }

    #[test]
    fn proximity_within_window() {
        let text = tokens("betting on arbitrage opportunities today");
        let mut keyword = spec(&["arbitrage betting"]);
        keyword.proximity_window = 5;
        let hit = match_keyword(&text, &keyword).unwrap();
        assert_eq!((hit.span_start, hit.span_end), (0, 2));

        keyword.require_order = true;
        assert!(match_keyword(&text, &keyword).is_none());
    }

    #[test]
    fn outside_window_does_not_hit() {
        let text = tokens("arbitrage one two three four betting");
        let mut keyword = spec(&["arbitrage betting"]);
        keyword.proximity_window = 5;
        assert!(match_keyword(&text, &keyword).is_none());
        keyword.proximity_window = 6;
        assert!(match_keyword(&text, &keyword).is_some());
    }

    #[test]
    fn proximity_monotonic_in_window() {
        let text = tokens("alpha beta gamma delta target one two source");
        for window in 1..=50 {
            let mut keyword = spec(&["target source"]);
            keyword.proximity_window = window;
            let hit = match_keyword(&text, &keyword);
            if window >= 4 {
                assert!(hit.is_some(), "window {window} should hit");
            } else {
                assert!(hit.is_none(), "window {window} should not hit");
            }
        }
    }

    #[test]
    fn exclusion_rejects_match() {
        let text = tokens("arbitrage betting is not legal here");
        let mut keyword = spec(&["arbitrage betting"]);
        keyword.exclusions = vec!["not legal".to_string()];
        assert!(match_keyword(&text, &keyword).is_none());

        keyword.exclusions = vec!["unrelated".to_string()];
        assert!(match_keyword(&text, &keyword).is_some());
    }

    #[test]
    fn exclusion_applies_anywhere_in_text() {
        // Exclusion far from the phrase span still vetoes the keyword.
        let text = tokens(
            "scam warning first. later on people discuss arbitrage betting in detail here",
        );
        let mut keyword = spec(&["arbitrage betting"]);
        keyword.exclusions = vec!["scam".to_string()];
        assert!(match_keyword(&text, &keyword).is_none());
    }

    #[test]
    fn stemming_toggle() {
        let text = tokens("arbitraging bets");
        let mut keyword = spec(&["arbitrage bet"]);
        keyword.use_stemming = true;
        assert!(match_keyword(&text, &keyword).is_some());
        keyword.use_stemming = false;
        assert!(match_keyword(&text, &keyword).is_none());
    }

    #[test]
    fn stemmer_maps_common_variants() {
        assert_eq!(stem("betting"), stem("bet"));
        assert_eq!(stem("bets"), stem("bet"));
        assert_eq!(stem("arbitraging"), stem("arbitrage"));
        assert_eq!(stem("games"), stem("game"));
        assert_eq!(stem("quickly"), "quick");
        // Below the stem floor nothing is stripped.
        assert_eq!(stem("is"), "is");
        assert_eq!(stem("bes"), "bes");
    }

    #[test]
    fn or_group_first_hit_is_primary_rest_also_matched() {
        let text = tokens("the arb tool also does arbitrage betting");
        let keyword = spec(&["arbitrage betting", "arb tool", "missing phrase"]);
        let hit = match_keyword(&text, &keyword).unwrap();
        assert_eq!(hit.phrase, "arbitrage betting");
        assert_eq!(hit.also_matched, vec!["arb tool"]);
    }

    #[test]
    fn best_hit_prefers_tightest_span() {
        // "alpha ... beta" appears wide first, then adjacent.
        let text = tokens("alpha one two three beta then alpha beta");
        let hit = match_keyword(&text, &spec(&["alpha beta"])).unwrap();
        assert_eq!((hit.span_start, hit.span_end), (6, 7));
        assert_eq!(hit.score, 1.0);
    }

    #[test]
    fn tie_breaks_on_smallest_start() {
        let text = tokens("alpha beta filler alpha beta");
        let hit = match_keyword(&text, &spec(&["alpha beta"])).unwrap();
        assert_eq!((hit.span_start, hit.span_end), (0, 1));
    }

    #[test]
    fn repeated_phrase_tokens_need_distinct_positions() {
        let keyword = spec(&["buy buy"]);
        assert!(match_keyword(&tokens("please buy now"), &keyword).is_none());
        let hit = match_keyword(&tokens("buy it buy it"), &keyword).unwrap();
        assert_eq!((hit.span_start, hit.span_end), (0, 2));
    }

    #[test]
    fn require_order_accepts_in_order_tokens() {
        let text = tokens("first arbitrage and then betting happened");
        let mut keyword = spec(&["arbitrage betting"]);
        keyword.require_order = true;
        let hit = match_keyword(&text, &keyword).unwrap();
        assert_eq!((hit.span_start, hit.span_end), (1, 4));
    }

    #[test]
    fn single_token_phrase_trivially_satisfies_window() {
        let mut keyword = spec(&["arbitrage"]);
        keyword.proximity_window = 1;
        let hit = match_keyword(&tokens("lots of arbitrage talk"), &keyword).unwrap();
        assert_eq!(hit.score, 1.0);
        assert_eq!((hit.span_start, hit.span_end), (2, 2));
    }

    #[test]
    fn phrase_longer_than_window_never_matches() {
        let mut keyword = spec(&["one two three"]);
        keyword.proximity_window = 2;
        assert!(match_keyword(&tokens("one two three"), &keyword).is_none());
    }

    #[test]
    fn empty_inputs_never_match() {
        assert!(match_keyword(&[], &spec(&["arbitrage"])).is_none());
        assert!(match_keyword(&tokens("some text"), &spec(&[])).is_none());
    }

    #[test]
    fn score_degrades_with_span() {
        let mut keyword = spec(&["alpha omega"]);
        keyword.proximity_window = 10;
        let tight = match_keyword(&tokens("alpha omega"), &keyword).unwrap();
        let loose = match_keyword(&tokens("alpha one two three four omega"), &keyword).unwrap();
        assert_eq!(tight.score, 1.0);
        assert!(loose.score < tight.score);
        assert!(loose.score > 0.0);
    }

    #[test]
    fn deterministic() {
        let text = tokens("arbitrage betting tools for arbitrage betting fans");
        let keyword = spec(&["arbitrage betting", "tools"]);
        let first = match_keyword(&text, &keyword);
        for _ in 0..5 {
            assert_eq!(match_keyword(&text, &keyword), first);
        }
    }
}
