use std::sync::Arc;
use std::time::Duration;

use database::Database;
use dispatcher::AlertDispatcher;
use reddalert_core::{ContentSource, CoreError};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config_cache::ConfigCache;
use crate::match_engine::MatchEngine;
use crate::poller::Poller;
use crate::retention::cleanup_old_data;

const CONFIG_CACHE_TTL: Duration = Duration::from_secs(60);
const RETENTION_TICK: Duration = Duration::from_secs(86_400);
const STORE_BACKOFF_CAP_SECONDS: u64 = 300;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub poll_tick: Duration,
    pub match_tick: Duration,
    pub dispatch_tick: Duration,
    pub retention_days: i64,
}

#[derive(Debug, Default)]
pub struct CycleSummary {
    pub subreddits_polled: usize,
    pub new_content: usize,
    pub matches_found: usize,
    pub alerts_sent: usize,
    pub alerts_failed: usize,
}

/// Cooperative time wheel: poll, match, and dispatch ticks plus a
/// daily retention sweep. Store outages pause all ticks with exponential
/// backoff; shutdown lets the in-flight tick finish before returning.
pub struct Scheduler {
    db: Arc<Database>,
    cache: ConfigCache,
    poller: Poller,
    engine: MatchEngine,
    dispatcher: AlertDispatcher,
    config: SchedulerConfig,
    /// fetched_at watermark: the match tick drains content ingested
    /// after this point.
    match_watermark: i64,
    store_failures: u32,
}

impl Scheduler {
    pub fn new(
        db: Arc<Database>,
        source: Arc<dyn ContentSource>,
        dispatcher: AlertDispatcher,
        config: SchedulerConfig,
        default_cadence_minutes: i64,
    ) -> Self {
        Self {
            cache: ConfigCache::new(db.clone(), CONFIG_CACHE_TTL),
            poller: Poller::new(source, db.clone(), default_cadence_minutes),
            engine: MatchEngine::new(db.clone()),
            dispatcher,
            db,
            config,
            match_watermark: 0,
            store_failures: 0,
        }
    }

    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), CoreError> {
        info!(
            "scheduler starting: poll {:?}, match {:?}, dispatch {:?}, retention {} days",
            self.config.poll_tick,
            self.config.match_tick,
            self.config.dispatch_tick,
            self.config.retention_days
        );

        // One full cycle up front so a fresh worker is useful immediately.
        let summary = self.run_cycle(now()).await;
        match summary {
            Ok(s) => info!("startup cycle: {s:?}"),
            Err(e) => warn!("startup cycle failed: {e}"),
        }

        let mut poll = interval(self.config.poll_tick);
        let mut matching = interval(self.config.match_tick);
        let mut dispatch = interval(self.config.dispatch_tick);
        let mut retention = interval(RETENTION_TICK);
        for ticker in [&mut poll, &mut matching, &mut dispatch, &mut retention] {
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.reset();
        }

        loop {
            tokio::select! {
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        info!("shutdown signal received, stopping scheduler");
                        return Ok(());
                    }
                }
                _ = poll.tick() => {
                    let outcome = self.poll_tick(now()).await;
                    self.settle("poll", outcome).await;
                }
                _ = matching.tick() => {
                    let outcome = self.match_tick(now()).await;
                    self.settle("match", outcome).await;
                }
                _ = dispatch.tick() => {
                    let outcome = self.dispatch_tick(now()).await;
                    self.settle("dispatch", outcome).await;
                }
                _ = retention.tick() => {
                    let outcome = cleanup_old_data(&self.db, self.config.retention_days, now())
                        .await
                        .map(|_| ());
                    self.settle("retention", outcome).await;
                }
            }
        }
    }

    pub async fn poll_tick(&mut self, now: i64) -> Result<(), CoreError> {
        let snapshot = self.cache.refresh_if_stale().await;
        self.poller.run_once(&snapshot, now).await?;
        Ok(())
    }

    pub async fn match_tick(&mut self, now: i64) -> Result<(), CoreError> {
        let snapshot = self.cache.refresh_if_stale().await;
        let batch = self.db.content_fetched_since(self.match_watermark).await?;
        if batch.is_empty() {
            return Ok(());
        }
        let max_fetched = batch.iter().map(|c| c.fetched_at).max().unwrap_or(0);
        self.engine.process_batch(&batch, &snapshot, now).await?;
        self.match_watermark = self.match_watermark.max(max_fetched);
        Ok(())
    }

    pub async fn dispatch_tick(&mut self, now: i64) -> Result<(), CoreError> {
        let snapshot = self.cache.refresh_if_stale().await;
        let summary = self.dispatcher.dispatch_pending(&snapshot, now).await?;
        if summary.sent + summary.failed > 0 {
            info!(
                "dispatch tick: {} sent, {} failed, {} deferred",
                summary.sent, summary.failed, summary.deferred
            );
        }
        Ok(())
    }

    /// One full poll -> match -> dispatch cycle. Used at startup and by
    /// end-to-end tests.
    pub async fn run_cycle(&mut self, now: i64) -> Result<CycleSummary, CoreError> {
        let snapshot = self.cache.refresh_if_stale().await;

        let poll = self.poller.run_once(&snapshot, now).await?;

        let batch = self.db.content_fetched_since(self.match_watermark).await?;
        let max_fetched = batch.iter().map(|c| c.fetched_at).max().unwrap_or(0);
        let matches_found = self.engine.process_batch(&batch, &snapshot, now).await?;
        self.match_watermark = self.match_watermark.max(max_fetched);

        let dispatched = self.dispatcher.dispatch_pending(&snapshot, now).await?;

        Ok(CycleSummary {
            subreddits_polled: poll.subreddits_polled,
            new_content: poll.new_content,
            matches_found,
            alerts_sent: dispatched.sent,
            alerts_failed: dispatched.failed,
        })
    }

    /// Tenant-scoped errors are already isolated inside the ticks; what
    /// reaches here is scheduler-level. Store outages pause everything
    /// with exponential backoff until healthy.
    async fn settle(&mut self, tick: &str, outcome: Result<(), CoreError>) {
        match outcome {
            Ok(()) => {
                self.store_failures = 0;
            }
            Err(CoreError::Store(e)) => {
                self.store_failures += 1;
                let backoff_seconds =
                    (2u64.saturating_pow(self.store_failures)).min(STORE_BACKOFF_CAP_SECONDS);
                error!(
                    "{tick} tick hit store error ({e}), pausing {}s",
                    backoff_seconds
                );
                tokio::time::sleep(Duration::from_secs(backoff_seconds)).await;
            }
            Err(e) => {
                error!("{tick} tick failed: {e}");
            }
        }
    }
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
