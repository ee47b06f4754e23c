//! Purge worker: periodically deletes terminal jobs past their retention
//! window and expired, unpinned media assets. Failures are logged and never
//! propagated — the next cycle retries.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::Config;
use crate::store::Store;

/// Runs one purge pass against `store` using the retention windows in
/// `config`. Exposed separately from the interval loop so integration tests
/// can invoke a single pass deterministically.
pub async fn run_once(store: &Arc<dyn Store>, config: &Config) {
    let now = Utc::now();
    let retention_cutoff = now - ChronoDuration::hours(config.playback_job_retention_hours as i64);

    match store.purge_finished_jobs_before(retention_cutoff).await {
        Ok(count) if count > 0 => info!(count, "purge: removed terminal playback jobs"),
        Ok(_) => {}
        Err(err) => warn!(error = %err, "purge: purge_finished_jobs_before failed"),
    }

    match store.purge_expired_media(now).await {
        Ok(count) if count > 0 => info!(count, "purge: removed expired media assets"),
        Ok(_) => {}
        Err(err) => warn!(error = %err, "purge: purge_expired_media failed"),
    }
}

/// Runs `run_once` on `config.purge_interval_secs`, until `shutdown` fires.
pub async fn run_forever(store: Arc<dyn Store>, config: Config, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(Duration::from_secs(config.purge_interval_secs.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_once(&store, &config).await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("purge worker shutting down");
                    return;
                }
            }
        }
    }
}
