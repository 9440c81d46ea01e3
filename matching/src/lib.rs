pub mod matcher;
pub mod normalizer;

pub use matcher::{match_keyword, stem, KeywordHit, KeywordSpec};
pub use normalizer::{normalize, token_spans, tokenize, NormalizedText};
