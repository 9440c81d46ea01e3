use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("webhook error: {0}")]
    Webhook(#[from] WebhookError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("keyword invariant violation: {0}")]
    KeywordInvariant(#[from] KeywordInvariantError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("internal error: {message}")]
    Internal { message: String },
}

/// Errors raised while talking to the forum source (transient vs
/// permanent classification drives retry and subreddit status handling).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("rate limited by source (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("source server error: {status_code}")]
    ServerError { status_code: u16 },

    #[error("source request timeout")]
    RequestTimeout,

    #[error("subreddit not found: {subreddit}")]
    SubredditNotFound { subreddit: String },

    #[error("subreddit forbidden: {subreddit}")]
    SubredditForbidden { subreddit: String },

    #[error("source authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    #[error("invalid source response: {details}")]
    InvalidResponse { details: String },

    #[error("malformed content item: {details}")]
    MalformedItem { details: String },

    #[error("source network error: {details}")]
    Network { details: String },
}

impl SourceError {
    /// Transient errors are retried and never advance the poll cursor.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SourceError::RateLimited { .. }
                | SourceError::ServerError { .. }
                | SourceError::RequestTimeout
                | SourceError::InvalidResponse { .. }
                | SourceError::Network { .. }
        )
    }

    /// True for 404/403 on a subreddit: the subreddit gets a status flip
    /// and a quarantine window instead of a retry.
    pub fn is_subreddit_gone(&self) -> bool {
        matches!(
            self,
            SourceError::SubredditNotFound { .. } | SourceError::SubredditForbidden { .. }
        )
    }

    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            SourceError::RateLimited {
                retry_after: Some(secs),
            } => Some(std::time::Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("migration failed: {reason}")]
    MigrationFailed { reason: String },

    #[error("row decode failed: {details}")]
    Decode { details: String },

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),
}

impl StoreError {
    /// Duplicate-key conflicts are how the store enforces both dedup
    /// layers; callers treat them as success.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            StoreError::Sql(sqlx::Error::Database(db_err)) => db_err.is_unique_violation(),
            _ => false,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WebhookError {
    #[error("webhook URL rejected by pattern guard: {url}")]
    InvalidUrl { url: String },

    #[error("webhook rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("webhook delivery failed with status {status_code}")]
    DeliveryFailed { status_code: u16 },

    #[error("webhook network error: {details}")]
    Network { details: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("environment variable not set: {var_name}")]
    MissingEnvironmentVariable { var_name: String },

    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("configuration validation failed: {reason}")]
    ValidationFailed { reason: String },
}

/// A keyword whose stored configuration cannot be matched against. The
/// engine quarantines the keyword and skips the (tenant, keyword) pair
/// for the cycle instead of crashing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KeywordInvariantError {
    #[error("keyword has no phrases")]
    EmptyPhrases,

    #[error("keyword phrase is empty")]
    EmptyPhrase,

    #[error("keyword phrase exceeds 200 characters ({chars})")]
    PhraseTooLong { chars: usize },

    #[error("proximity window {window} outside 1..=50")]
    WindowOutOfRange { window: i64 },
}
