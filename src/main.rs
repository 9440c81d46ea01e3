use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use database::Database;
use dispatcher::{AlertDispatcher, DispatchConfig, EmailSink, HttpWebhookSink, SendgridEmailSink};
use reddalert_core::{ContentSource, CoreError, WorkerConfig};
use reddit_client::{RedditAppConfig, RedditClient};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use worker::{Scheduler, SchedulerConfig};

#[derive(Debug, Parser)]
#[command(name = "reddalert")]
#[command(about = "Multi-tenant Reddit keyword monitoring with Discord alerts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Background worker.
    Worker {
        #[command(subcommand)]
        command: WorkerCommands,
    },
}

#[derive(Debug, Subcommand)]
enum WorkerCommands {
    /// Start the poll/match/dispatch scheduler.
    Run,
}

#[tokio::main]
async fn main() -> Result<(), CoreError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "reddalert=info,worker=info,dispatcher=info,reddit_client=info,database=info".into()
        }))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Worker {
            command: WorkerCommands::Run,
        } => run_worker().await,
    }
}

async fn run_worker() -> Result<(), CoreError> {
    let config = WorkerConfig::from_env()?;
    tracing::info!(
        "starting Reddalert worker: poll tick {}s, retention {} days",
        config.poll_tick_seconds,
        config.retention_days
    );

    let db = Arc::new(Database::connect(&config.database_url).await?);
    db.run_migrations().await?;

    let http_timeout = Duration::from_secs(config.http_timeout_seconds);
    let source: Arc<dyn ContentSource> = Arc::new(RedditClient::new(RedditAppConfig {
        app_id: config.forum_app_id.clone(),
        app_secret: config.forum_app_secret.clone(),
        user_agent: config.forum_user_agent.clone(),
        http_timeout,
    })?);

    let webhook_sink = Arc::new(HttpWebhookSink::new(http_timeout)?);
    let email_sink: Option<Arc<dyn EmailSink>> = match &config.sendgrid_api_key {
        Some(api_key) => Some(Arc::new(SendgridEmailSink::new(
            api_key.clone(),
            config.email_from_name.clone(),
            config.email_from_address.clone(),
            http_timeout,
        )?)),
        None => {
            tracing::warn!("SENDGRID_API_KEY not set; email fallback disabled");
            None
        }
    };

    let alert_dispatcher = AlertDispatcher::new(
        db.clone(),
        webhook_sink,
        email_sink,
        DispatchConfig {
            webhook_url_pattern: config.webhook_url_pattern.clone(),
            ..DispatchConfig::default()
        },
    )?;

    let mut scheduler = Scheduler::new(
        db,
        source,
        alert_dispatcher,
        SchedulerConfig {
            poll_tick: Duration::from_secs(config.poll_tick_seconds),
            match_tick: Duration::from_secs(config.match_tick_seconds),
            dispatch_tick: Duration::from_secs(config.dispatch_tick_seconds),
            retention_days: config.retention_days,
        },
        config.poll_interval_minutes,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    scheduler.run(shutdown_rx).await
}
