use std::collections::HashSet;
use std::time::Duration;

use chrono::{Days, NaiveDate, Utc};
use tokio::sync::watch;
use tracing::{error, info, instrument};

use crate::store::{bucket_for, KindStores, ResourceStore, StoreResult};

#[derive(Debug, Clone)]
pub struct CleanupWorkerConfig {
    pub interval: Duration,
    /// Number of daily buckets kept, today included.
    pub retention_days: u32,
}

impl Default for CleanupWorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            retention_days: 7,
        }
    }
}

/// Deletes changed-index buckets that fall outside the retention window.
pub struct CleanupWorker {
    stores: KindStores,
    config: CleanupWorkerConfig,
}

impl CleanupWorker {
    pub fn new(stores: KindStores, config: CleanupWorkerConfig) -> Self {
        Self { stores, config }
    }

    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            retention_days = self.config.retention_days,
            "Starting cleanup worker"
        );

        let mut interval = tokio::time::interval(self.config.interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.sweep(Utc::now().date_naive()).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Cleanup worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run one cleanup pass as of `today`. Returns the number of entries removed.
    pub async fn sweep(&self, today: NaiveDate) -> u64 {
        let retained = self.retained_buckets(today);
        let mut total_deleted = 0u64;

        for store in self.stores.all() {
            match self.sweep_store(store, &retained).await {
                Ok(count) => {
                    if count > 0 {
                        info!(kind = %store.kind(), deleted = count, "Cleaned up expired changed entries");
                    }
                    total_deleted += count;
                }
                Err(e) => {
                    error!(kind = %store.kind(), error = %e, "Failed to clean up changed index");
                }
            }
        }

        total_deleted
    }

    fn retained_buckets(&self, today: NaiveDate) -> HashSet<String> {
        (0..self.config.retention_days.max(1))
            .filter_map(|days_ago| today.checked_sub_days(Days::new(u64::from(days_ago))))
            .map(bucket_for)
            .collect()
    }

    async fn sweep_store(&self, store: &ResourceStore, retained: &HashSet<String>) -> StoreResult<u64> {
        let mut deleted = 0;
        for bucket in store.changed_buckets().await? {
            if !retained.contains(&bucket) {
                deleted += store.delete_bucket(&bucket).await?;
            }
        }
        Ok(deleted)
    }
}
