pub mod embed;
pub mod sinks;

pub use sinks::{EmailSink, HttpWebhookSink, SendgridEmailSink, WebhookSink};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use database::Database;
use reddalert_core::{ConfigSnapshot, CoreError, Match, WebhookError};
use regex::Regex;
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

use crate::embed::{batch_payloads, single_payload};

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Batch when this many matches share the window.
    pub batch_threshold: usize,
    /// The sliding batch window.
    pub batch_window_seconds: i64,
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    /// 1s, 4s, 16s.
    pub backoff_multiplier: f64,
    /// ±20% jitter on each backoff delay.
    pub jitter_factor: f64,
    pub max_embeds_per_message: usize,
    pub webhook_url_pattern: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_threshold: 3,
            batch_window_seconds: 120,
            max_attempts: 3,
            base_backoff_ms: 1000,
            backoff_multiplier: 4.0,
            jitter_factor: 0.2,
            max_embeds_per_message: 10,
            webhook_url_pattern: reddalert_core::DEFAULT_WEBHOOK_URL_PATTERN.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub sent: usize,
    pub failed: usize,
    /// Young matches left to accumulate toward a batch.
    pub deferred: usize,
}

/// How one tenant's pending matches are delivered on this tick.
#[derive(Debug, Default)]
struct TenantPlan {
    batch: Vec<Match>,
    singles: Vec<Match>,
    deferred: usize,
}

/// Batching rule: within the sliding window, three or more
/// pending matches for a tenant go out as one batched message; matches
/// older than the window go out individually; younger ones wait.
fn plan_tenant_dispatch(
    matches: Vec<Match>,
    now: i64,
    threshold: usize,
    window_seconds: i64,
) -> TenantPlan {
    let window_start = now - window_seconds;
    let mut plan = TenantPlan::default();
    let mut in_window = Vec::new();

    for m in matches {
        if m.detected_at >= window_start {
            in_window.push(m);
        } else {
            plan.singles.push(m);
        }
    }

    if in_window.len() >= threshold {
        plan.batch = in_window;
    } else {
        plan.deferred = in_window.len();
    }
    plan
}

pub struct AlertDispatcher {
    db: Arc<Database>,
    webhook_sink: Arc<dyn WebhookSink>,
    email_sink: Option<Arc<dyn EmailSink>>,
    url_guard: Regex,
    config: DispatchConfig,
}

impl AlertDispatcher {
    pub fn new(
        db: Arc<Database>,
        webhook_sink: Arc<dyn WebhookSink>,
        email_sink: Option<Arc<dyn EmailSink>>,
        config: DispatchConfig,
    ) -> Result<Self, CoreError> {
        let url_guard = Regex::new(&config.webhook_url_pattern).map_err(|e| {
            reddalert_core::ConfigError::InvalidValue {
                field: "webhook_url_pattern".to_string(),
                value: e.to_string(),
            }
        })?;
        Ok(Self {
            db,
            webhook_sink,
            email_sink,
            url_guard,
            config,
        })
    }

    /// One dispatch tick: batch, send, transition statuses, fall back.
    pub async fn dispatch_pending(
        &self,
        snapshot: &ConfigSnapshot,
        now: i64,
    ) -> Result<DispatchSummary, CoreError> {
        let pending = self.db.pending_matches().await?;
        if pending.is_empty() {
            return Ok(DispatchSummary::default());
        }

        // Group per tenant, preserving detected_at order within groups.
        let mut by_tenant: BTreeMap<Uuid, Vec<Match>> = BTreeMap::new();
        for m in pending {
            by_tenant.entry(m.tenant_id).or_default().push(m);
        }

        let mut summary = DispatchSummary::default();

        for (tenant_id, matches) in by_tenant {
            let Some(tenant_config) = snapshot.tenant(&tenant_id) else {
                warn!("pending matches for unknown tenant {tenant_id}, leaving pending");
                continue;
            };
            let Some(webhook) = tenant_config.primary_webhook() else {
                warn!("no active webhook for tenant {tenant_id}, leaving matches pending");
                continue;
            };
            if !self.url_guard.is_match(&webhook.url) {
                warn!(
                    "webhook URL for tenant {tenant_id} rejected by pattern guard, leaving pending"
                );
                continue;
            }

            let plan = plan_tenant_dispatch(
                matches,
                now,
                self.config.batch_threshold,
                self.config.batch_window_seconds,
            );
            summary.deferred += plan.deferred;

            for single in &plan.singles {
                let outcome = self
                    .deliver(&webhook.url, &single_payload(single), std::slice::from_ref(single), now)
                    .await?;
                summary.sent += outcome.0;
                summary.failed += outcome.1;
            }

            if !plan.batch.is_empty() {
                info!(
                    "batching {} matches for tenant {tenant_id}",
                    plan.batch.len()
                );
                let payloads = batch_payloads(&plan.batch, self.config.max_embeds_per_message);
                let chunks = plan.batch.chunks(self.config.max_embeds_per_message.max(1));
                for (payload, chunk) in payloads.iter().zip(chunks) {
                    let outcome = self.deliver(&webhook.url, payload, chunk, now).await?;
                    summary.sent += outcome.0;
                    summary.failed += outcome.1;
                }
            }
        }

        Ok(summary)
    }

    /// Send one payload and apply the single-transition status machine to
    /// the matches it carries. Returns (sent, failed) counts.
    async fn deliver(
        &self,
        url: &str,
        payload: &serde_json::Value,
        matches: &[Match],
        now: i64,
    ) -> Result<(usize, usize), CoreError> {
        let ids: Vec<Uuid> = matches.iter().map(|m| m.id).collect();
        match self.send_with_retry(url, payload).await {
            Ok(()) => {
                self.db.mark_matches_sent(&ids, now).await?;
                Ok((matches.len(), 0))
            }
            Err(e) => {
                warn!("webhook delivery failed after retries: {e}");
                self.db.mark_matches_failed(&ids).await?;
                for m in matches {
                    self.send_fallback(m).await;
                }
                Ok((0, matches.len()))
            }
        }
    }

    async fn send_with_retry(
        &self,
        url: &str,
        payload: &serde_json::Value,
    ) -> Result<(), WebhookError> {
        let mut last_error = WebhookError::Network {
            details: "no attempts made".to_string(),
        };

        for attempt in 0..self.config.max_attempts {
            match self.webhook_sink.post(url, payload).await {
                Ok(()) => return Ok(()),
                Err(error) => {
                    let is_last = attempt + 1 >= self.config.max_attempts;
                    if !is_last {
                        let delay = match &error {
                            WebhookError::RateLimited {
                                retry_after: Some(secs),
                            } => Duration::from_secs(*secs),
                            _ => self.backoff_delay(attempt),
                        };
                        info!("webhook attempt {} failed ({error}), retrying in {delay:?}", attempt + 1);
                        sleep(delay).await;
                    }
                    last_error = error;
                }
            }
        }
        Err(last_error)
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base =
            self.config.base_backoff_ms as f64 * self.config.backoff_multiplier.powi(attempt as i32);
        let jitter = base * self.config.jitter_factor;
        let delay_ms = base - jitter + fastrand::f64() * 2.0 * jitter;
        Duration::from_millis(delay_ms.max(0.0) as u64)
    }

    /// Fallback after webhook exhaustion: email the tenant if an address
    /// and a mail sink are configured. The match stays queryable with its
    /// failed badge either way.
    async fn send_fallback(&self, m: &Match) {
        let Some(email_sink) = &self.email_sink else {
            return;
        };
        let Ok(Some(tenant)) = self.tenant_email(&m.tenant_id).await else {
            warn!("no email on file for tenant {}, skipping fallback", m.tenant_id);
            return;
        };

        let subject = format!("Reddalert: alert delivery failed for r/{}", m.subreddit);
        let body = format!(
            "A keyword match could not be delivered to your Discord webhook.\n\n\
             Keyword: {}\nSubreddit: r/{}\nAuthor: u/{}\nLink: {}\n\n\
             The match remains visible in your dashboard.",
            m.matched_phrase, m.subreddit, m.reddit_author, m.reddit_url
        );
        if let Err(e) = email_sink.send(&tenant, &subject, &body).await {
            warn!("fallback email to tenant {} failed: {e}", m.tenant_id);
        }
    }

    async fn tenant_email(&self, tenant_id: &Uuid) -> Result<Option<String>, CoreError> {
        let configs = self.db.load_tenant_configs().await?;
        Ok(configs
            .into_iter()
            .find(|c| c.tenant.id == *tenant_id)
            .map(|c| c.tenant.email))
    }
}
