use database::{Database, RetentionSummary};
use reddalert_core::CoreError;
use tracing::info;

const SECONDS_PER_DAY: i64 = 86_400;

/// Daily retention sweep: drop matches and content older than the
/// configured horizon.
pub async fn cleanup_old_data(
    db: &Database,
    retention_days: i64,
    now: i64,
) -> Result<RetentionSummary, CoreError> {
    let cutoff = now - retention_days * SECONDS_PER_DAY;
    let summary = db.delete_expired(cutoff).await?;
    info!(
        "retention cleanup: deleted {} matches and {} content rows older than {} days",
        summary.matches_deleted, summary.content_deleted, retention_days
    );
    Ok(summary)
}
