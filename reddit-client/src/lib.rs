pub mod api;
pub mod rate_limiter;
pub mod retry;

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use oauth2::{
    basic::BasicClient, reqwest::async_http_client, AuthUrl, ClientId, ClientSecret, TokenResponse,
    TokenUrl,
};
use reddalert_core::{
    ConfigError, ContentSource, CoreError, SourceComment, SourceError, SourcePost,
};
use reqwest::{Client, StatusCode};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::api::{comments_from_listing, post_fullname, posts_from_listing, RedditListing};
use crate::rate_limiter::{RateLimitConfig, RateLimiter};
use crate::retry::{RetryConfig, RetryExecutor};

const REDDIT_AUTH_URL: &str = "https://www.reddit.com/api/v1/authorize";
const REDDIT_TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const REDDIT_API_BASE: &str = "https://oauth.reddit.com";
const LISTING_LIMIT: u32 = 100;

// Refresh the app token this long before it actually expires.
const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct RedditAppConfig {
    pub app_id: String,
    pub app_secret: String,
    pub user_agent: String,
    pub http_timeout: Duration,
}

#[derive(Debug, Clone)]
struct AppToken {
    access_token: String,
    expires_at: SystemTime,
}

impl AppToken {
    fn is_fresh(&self) -> bool {
        SystemTime::now() + TOKEN_EXPIRY_BUFFER < self.expires_at
    }
}

/// Reddit as a `ContentSource`: app-credential OAuth2, incremental
/// listings, rate-limit pacing, and retry with backoff.
pub struct RedditClient {
    oauth_client: BasicClient,
    http_client: Client,
    rate_limiter: RateLimiter,
    retry_executor: RetryExecutor,
    token: RwLock<Option<AppToken>>,
    user_agent: String,
}

impl RedditClient {
    pub fn new(config: RedditAppConfig) -> Result<Self, CoreError> {
        let oauth_client = BasicClient::new(
            ClientId::new(config.app_id.clone()),
            Some(ClientSecret::new(config.app_secret.clone())),
            AuthUrl::new(REDDIT_AUTH_URL.to_string()).map_err(|e| {
                CoreError::Config(ConfigError::InvalidValue {
                    field: "auth_url".to_string(),
                    value: e.to_string(),
                })
            })?,
            Some(TokenUrl::new(REDDIT_TOKEN_URL.to_string()).map_err(|e| {
                CoreError::Config(ConfigError::InvalidValue {
                    field: "token_url".to_string(),
                    value: e.to_string(),
                })
            })?),
        );

        let http_client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.http_timeout)
            .build()
            .map_err(CoreError::Network)?;

        Ok(Self {
            oauth_client,
            http_client,
            rate_limiter: RateLimiter::new(RateLimitConfig::reddit_app()),
            retry_executor: RetryExecutor::new(RetryConfig::reddit()),
            token: RwLock::new(None),
            user_agent: config.user_agent,
        })
    }

    /// Cached app token, refreshed via the client-credentials grant when
    /// it is within the expiry buffer.
    async fn ensure_token(&self) -> Result<String, SourceError> {
        if let Some(token) = self.token.read().await.as_ref() {
            if token.is_fresh() {
                return Ok(token.access_token.clone());
            }
        }

        let mut slot = self.token.write().await;
        if let Some(token) = slot.as_ref() {
            if token.is_fresh() {
                return Ok(token.access_token.clone());
            }
        }

        debug!("exchanging app credentials for a new access token");
        let token_result = self
            .oauth_client
            .exchange_client_credentials()
            .request_async(async_http_client)
            .await
            .map_err(|e| SourceError::AuthenticationFailed {
                reason: format!("token exchange failed: {e}"),
            })?;

        let expires_at = SystemTime::now()
            + token_result
                .expires_in()
                .unwrap_or(Duration::from_secs(3600));
        let token = AppToken {
            access_token: token_result.access_token().secret().clone(),
            expires_at,
        };
        let access_token = token.access_token.clone();
        *slot = Some(token);
        info!("obtained app access token");
        Ok(access_token)
    }

    /// One rate-limited GET with status classification. Retries are the
    /// caller's concern; this never loops.
    async fn get_json(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
        subreddit: &str,
    ) -> Result<serde_json::Value, SourceError> {
        let access_token = self.ensure_token().await?;
        let _permit = self.rate_limiter.acquire_permit().await;

        let url = format!("{REDDIT_API_BASE}{endpoint}");
        debug!("GET {}", endpoint);
        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&access_token)
            .header("User-Agent", &self.user_agent)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SourceError::RequestTimeout
                } else {
                    SourceError::Network {
                        details: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.classify_status(status, &response, subreddit).await);
        }

        response
            .json()
            .await
            .map_err(|e| SourceError::InvalidResponse {
                details: format!("failed to decode {endpoint}: {e}"),
            })
    }

    async fn classify_status(
        &self,
        status: StatusCode,
        response: &reqwest::Response,
        subreddit: &str,
    ) -> SourceError {
        match status.as_u16() {
            429 => {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok());
                SourceError::RateLimited { retry_after }
            }
            401 => {
                // Force a fresh grant on the next call.
                *self.token.write().await = None;
                SourceError::AuthenticationFailed {
                    reason: "access token rejected".to_string(),
                }
            }
            403 => SourceError::SubredditForbidden {
                subreddit: subreddit.to_string(),
            },
            404 => SourceError::SubredditNotFound {
                subreddit: subreddit.to_string(),
            },
            code if status.is_server_error() => SourceError::ServerError { status_code: code },
            code => SourceError::InvalidResponse {
                details: format!("unexpected status {code}"),
            },
        }
    }

    async fn fetch_new_posts(
        &self,
        subreddit: &str,
        since_id: Option<&str>,
    ) -> Result<Vec<SourcePost>, SourceError> {
        let endpoint = format!("/r/{subreddit}/new");
        let mut query = vec![("limit", LISTING_LIMIT.to_string())];
        if let Some(since) = since_id {
            query.push(("before", post_fullname(since)));
        }

        let value = self.get_json(&endpoint, &query, subreddit).await?;
        let listing: RedditListing =
            serde_json::from_value(value).map_err(|e| SourceError::InvalidResponse {
                details: format!("bad listing for r/{subreddit}: {e}"),
            })?;
        Ok(posts_from_listing(listing))
    }

    async fn fetch_top_level_comments(
        &self,
        subreddit: &str,
        post_source_id: &str,
    ) -> Result<Vec<SourceComment>, SourceError> {
        let endpoint = format!("/comments/{post_source_id}");
        let query = vec![
            ("depth", "1".to_string()),
            ("limit", LISTING_LIMIT.to_string()),
        ];

        let value = self.get_json(&endpoint, &query, subreddit).await?;
        // The comments endpoint returns [post listing, comment listing].
        let mut listings: Vec<RedditListing> =
            serde_json::from_value(value).map_err(|e| SourceError::InvalidResponse {
                details: format!("bad comment response for {post_source_id}: {e}"),
            })?;
        if listings.len() < 2 {
            return Err(SourceError::InvalidResponse {
                details: format!("comment response for {post_source_id} missing comment listing"),
            });
        }
        Ok(comments_from_listing(listings.remove(1)))
    }
}

#[async_trait]
impl ContentSource for RedditClient {
    async fn list_new_posts(
        &self,
        subreddit: &str,
        since_id: Option<&str>,
    ) -> Result<Vec<SourcePost>, SourceError> {
        let subreddit = subreddit.to_string();
        let since = since_id.map(str::to_string);
        self.retry_executor
            .execute(&format!("list_new_posts r/{subreddit}"), || {
                let subreddit = subreddit.clone();
                let since = since.clone();
                async move { self.fetch_new_posts(&subreddit, since.as_deref()).await }
            })
            .await
    }

    async fn list_top_level_comments(
        &self,
        subreddit: &str,
        post_source_id: &str,
        _since_id: Option<&str>,
    ) -> Result<Vec<SourceComment>, SourceError> {
        let subreddit = subreddit.to_string();
        let post = post_source_id.to_string();
        self.retry_executor
            .execute(&format!("list_top_level_comments {post}"), || {
                let subreddit = subreddit.clone();
                let post = post.clone();
                async move { self.fetch_top_level_comments(&subreddit, &post).await }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> RedditAppConfig {
        RedditAppConfig {
            app_id: "app-id".to_string(),
            app_secret: "app-secret".to_string(),
            user_agent: "reddalert-test/0.1".to_string(),
            http_timeout: Duration::from_secs(15),
        }
    }

    #[tokio::test]
    async fn client_construction_succeeds() {
        let client = RedditClient::new(test_config()).unwrap();
        let status = client.rate_limiter.status().await;
        assert!(status.available_tokens > 0);
    }

    #[test]
    fn stale_token_wants_refresh() {
        let fresh = AppToken {
            access_token: "tok".to_string(),
            expires_at: SystemTime::now() + Duration::from_secs(3600),
        };
        assert!(fresh.is_fresh());

        let nearly_expired = AppToken {
            access_token: "tok".to_string(),
            expires_at: SystemTime::now() + Duration::from_secs(60),
        };
        assert!(!nearly_expired.is_fresh());
    }
}
