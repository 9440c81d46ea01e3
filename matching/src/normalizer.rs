//! Text normalizer: canonicalizes raw forum text into a matchable token
//! stream. Pure, total, and idempotent over its own output.

use std::sync::LazyLock;

use regex::Regex;

static URL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?:https?://|www\.)\S+").unwrap());
static IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"!\[([^\]]*)\]\([^)]*\)").unwrap());
static LINK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").unwrap());
static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^#+").unwrap());
static BLOCKQUOTE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^>\s?").unwrap());
static EMPHASIS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[*_~`]+").unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static SENTENCE_SPLIT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.!?]+\s+").unwrap());
static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NormalizedText {
    /// The cleaned text: lowercased, URLs and markdown stripped,
    /// whitespace collapsed. This is what gets hashed and stored.
    pub text: String,
    pub sentences: Vec<String>,
    pub tokens: Vec<String>,
}

impl NormalizedText {
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// The canonical pipeline, applied in this order:
/// 1. Unicode-lowercase.
/// 2. Remove URL runs (`http://`, `https://`, `www.` up to whitespace).
/// 3. Strip markdown: image/link syntax keeps the inner text; `*_~``
///    erased; `#` heading markers and `>` blockquote markers erased at
///    line start. Character-class erasure, not HTML parsing.
/// 4. Collapse whitespace to single spaces, trim.
/// 5. Sentence-segment on `[.!?]+\s+`, discarding empty segments.
/// 6. Tokenize on `\W+`, discarding empty tokens.
pub fn normalize(raw: &str) -> NormalizedText {
    if raw.trim().is_empty() {
        return NormalizedText::default();
    }

    let text = raw.to_lowercase();
    let text = URL_RE.replace_all(&text, " ");
    let text = IMAGE_RE.replace_all(&text, "$1");
    let text = LINK_RE.replace_all(&text, "$1");
    let text = HEADING_RE.replace_all(&text, "");
    let text = BLOCKQUOTE_RE.replace_all(&text, "");
    let text = EMPHASIS_RE.replace_all(&text, "");
    let text = WHITESPACE_RE.replace_all(&text, " ");
    let text = text.trim().to_string();

    let sentences: Vec<String> = SENTENCE_SPLIT_RE
        .split(&text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let tokens = tokenize(&text);

    NormalizedText {
        text,
        sentences,
        tokens,
    }
}

/// Word tokens of already-normalized text. The match engine uses this to
/// re-tokenize stored `normalized_text` without persisting token lists.
pub fn tokenize(text: &str) -> Vec<String> {
    TOKEN_RE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Byte offsets of each token in `text`, parallel to `tokenize(text)`.
pub fn token_spans(text: &str) -> Vec<(usize, usize)> {
    TOKEN_RE
        .find_iter(text)
        .map(|m| (m.start(), m.end()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_tokenizes() {
        let result = normalize("Arbitrage BETTING Strategies");
        assert_eq!(result.text, "arbitrage betting strategies");
        assert_eq!(result.tokens, vec!["arbitrage", "betting", "strategies"]);
    }

    #[test]
    fn strips_urls() {
        let result = normalize("check https://example.com/r/foo?x=1 and www.test.org now");
        assert_eq!(result.tokens, vec!["check", "and", "now"]);
        assert!(!result.text.contains("http"));
    }

    #[test]
    fn strips_markdown() {
        let raw = "# Heading\n> quoted text\n**bold** and *italic* and ~~gone~~ and `code`\n[link text](https://example.com)";
        let result = normalize(raw);
        assert!(result.text.contains("bold and italic and gone and code"));
        assert!(result.text.contains("link text"));
        assert!(!result.text.contains('*'));
        assert!(!result.text.contains('#'));
        assert!(!result.text.contains('`'));
    }

    #[test]
    fn image_syntax_keeps_alt_text() {
        let result = normalize("look ![a chart](/img/chart.png) here");
        assert_eq!(result.tokens, vec!["look", "a", "chart", "here"]);
    }

    #[test]
    fn collapses_whitespace() {
        let result = normalize("too\t\tmany\n\n  spaces ");
        assert_eq!(result.text, "too many spaces");
    }

    #[test]
    fn segments_sentences() {
        let result = normalize("First one. Second one! Third?! Done");
        assert_eq!(
            result.sentences,
            vec!["first one", "second one", "third", "done"]
        );
        // Token order is preserved across sentence boundaries.
        assert_eq!(
            result.tokens,
            vec!["first", "one", "second", "one", "third", "done"]
        );
    }

    #[test]
    fn empty_input_gives_empty_output() {
        assert!(normalize("").is_empty());
        assert!(normalize("   \n\t ").is_empty());
        assert!(normalize("*** ~~ ``").is_empty());
    }

    #[test]
    fn idempotent() {
        let inputs = [
            "Plain text here.",
            "# Head\n**bold** [t](http://u) visit https://a.b/c?d=e end",
            "multi.  space!\ttext\nwith lines",
            "unicode Ärger ÉLAN faß",
        ];
        for raw in inputs {
            let once = normalize(raw);
            let twice = normalize(&once.text);
            assert_eq!(once, twice, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn token_spans_are_consistent_with_tokens() {
        let result = normalize("Alpha beta, gamma. Delta!");
        let spans = token_spans(&result.text);
        assert_eq!(spans.len(), result.tokens.len());
        for (token, (start, end)) in result.tokens.iter().zip(&spans) {
            assert_eq!(&result.text[*start..*end], token);
        }
    }
}
