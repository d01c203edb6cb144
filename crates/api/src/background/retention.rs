//! Periodic cleanup of expired locks, old job records and idle log channels.
//!
//! Runs on a fixed interval using `tokio::time::interval`. Pending and
//! Running records are never touched.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use doculab_events::LogBroadcaster;
use doculab_store::Stores;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub struct RetentionSettings {
    /// How often the sweep runs.
    pub interval: Duration,
    /// Age after which finished job records are purged.
    pub ledger_retention: Duration,
    /// Idle time after which log channels are forgotten.
    pub channel_idle: Duration,
}

/// What one sweep removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub locks: usize,
    pub records: usize,
    pub channels: usize,
}

/// Run the retention loop until `cancel` is triggered.
pub async fn run(
    stores: Stores,
    broadcaster: Arc<LogBroadcaster>,
    settings: RetentionSettings,
    cancel: CancellationToken,
) {
    tracing::info!(
        interval_secs = settings.interval.as_secs(),
        ledger_retention_secs = settings.ledger_retention.as_secs(),
        "Retention job started"
    );

    let mut interval = tokio::time::interval(settings.interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Retention job stopping");
                break;
            }
            _ = interval.tick() => {
                let report = sweep(&stores, &broadcaster, &settings).await;
                if report == SweepReport::default() {
                    tracing::debug!("Retention: nothing to purge");
                } else {
                    tracing::info!(
                        locks = report.locks,
                        records = report.records,
                        channels = report.channels,
                        "Retention: purged stale entries"
                    );
                }
            }
        }
    }
}

/// One retention pass. Store failures are logged and skipped.
pub async fn sweep(
    stores: &Stores,
    broadcaster: &LogBroadcaster,
    settings: &RetentionSettings,
) -> SweepReport {
    let mut report = SweepReport::default();

    match stores.locks.purge_expired().await {
        Ok(n) => report.locks = n,
        Err(e) => tracing::error!(error = %e, "Retention: lock purge failed"),
    }

    let retention = chrono::Duration::from_std(settings.ledger_retention)
        .unwrap_or_else(|_| chrono::Duration::days(36_500));
    let cutoff = Utc::now() - retention;
    match stores.ledger.purge_terminal_before(cutoff).await {
        Ok(n) => report.records = n,
        Err(e) => tracing::error!(error = %e, "Retention: ledger purge failed"),
    }

    report.channels = broadcaster.sweep(settings.channel_idle);
    report
}
