use regex::Regex;

use crate::error::ConfigError;

/// Default SSRF guard: only Discord webhook endpoints are accepted.
pub const DEFAULT_WEBHOOK_URL_PATTERN: &str =
    r"^https://(discord\.com|discordapp\.com)/api/webhooks/\d+/[\w-]+$";

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub forum_app_id: String,
    pub forum_app_secret: String,
    pub forum_user_agent: String,
    /// Global default tenant cadence, clamped to 5..=1440 minutes.
    pub poll_interval_minutes: i64,
    pub retention_days: i64,
    pub webhook_url_pattern: String,
    pub poll_tick_seconds: u64,
    pub match_tick_seconds: u64,
    pub dispatch_tick_seconds: u64,
    pub http_timeout_seconds: u64,
    pub sendgrid_api_key: Option<String>,
    pub email_from_name: String,
    pub email_from_address: String,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: env_or("DATABASE_URL", "sqlite://reddalert.db"),
            forum_app_id: env_required("FORUM_APP_ID")?,
            forum_app_secret: env_required("FORUM_APP_SECRET")?,
            forum_user_agent: env_or("FORUM_USER_AGENT", "reddalert-worker/0.1"),
            poll_interval_minutes: env_parsed("POLL_INTERVAL_MINUTES", 60)?,
            retention_days: env_parsed("RETENTION_DAYS", 90)?,
            webhook_url_pattern: env_or("WEBHOOK_URL_PATTERN", DEFAULT_WEBHOOK_URL_PATTERN),
            poll_tick_seconds: env_parsed("POLL_TICK_SECONDS", 60)?,
            match_tick_seconds: env_parsed("MATCH_TICK_SECONDS", 30)?,
            dispatch_tick_seconds: env_parsed("DISPATCH_TICK_SECONDS", 30)?,
            http_timeout_seconds: env_parsed("HTTP_TIMEOUT_SECONDS", 15)?,
            sendgrid_api_key: std::env::var("SENDGRID_API_KEY").ok().filter(|v| !v.is_empty()),
            email_from_name: env_or("EMAIL_FROM_NAME", "Reddalert"),
            email_from_address: env_or("EMAIL_FROM_ADDRESS", "alerts@reddalert.io"),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(5..=1440).contains(&self.poll_interval_minutes) {
            return Err(ConfigError::InvalidValue {
                field: "POLL_INTERVAL_MINUTES".to_string(),
                value: self.poll_interval_minutes.to_string(),
            });
        }
        if self.retention_days < 1 {
            return Err(ConfigError::InvalidValue {
                field: "RETENTION_DAYS".to_string(),
                value: self.retention_days.to_string(),
            });
        }
        if Regex::new(&self.webhook_url_pattern).is_err() {
            return Err(ConfigError::InvalidValue {
                field: "WEBHOOK_URL_PATTERN".to_string(),
                value: self.webhook_url_pattern.clone(),
            });
        }
        Ok(())
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_required(name: &str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::MissingEnvironmentVariable {
            var_name: name.to_string(),
        })
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            field: name.to_string(),
            value: raw.clone(),
        }),
        Err(_) => Ok(default),
    }
}
