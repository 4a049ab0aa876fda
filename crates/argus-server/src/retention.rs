use argus_storage::engine::SqliteTimeSeriesEngine;
use argus_storage::TimeSeriesStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing;

/// Daily retention sweep over the time-series partitions.
pub fn spawn_retention(
    store: Arc<SqliteTimeSeriesEngine>,
    retention_days: u32,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(Duration::from_secs(24 * 3600));
        loop {
            ticker.tick().await;
            let store = store.clone();
            let result =
                tokio::task::spawn_blocking(move || store.purge(retention_days)).await;
            match result {
                Ok(Ok(removed)) if removed > 0 => {
                    tracing::info!(removed, retention_days, "Purged expired partitions");
                }
                Ok(Ok(_)) => {}
                Ok(Err(err)) => {
                    tracing::error!(error = %err, "Retention purge failed");
                }
                Err(err) => {
                    tracing::error!(error = %err, "Retention task failed");
                }
            }
        }
    })
}
