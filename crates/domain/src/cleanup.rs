//! Cart pruning after commit.
//!
//! A commit writes a [`CartCleanup`] record in its own transaction. Right
//! after the commit the cleanup is attempted once; whatever fails stays
//! pending in the outbox and is retried by [`CartCleanupSweeper`].

use std::time::Duration;

use chrono::{TimeDelta, Utc};
use store::{CartCleanup, CartStore, Database};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::Result;

/// Default number of pending cleanups handled per sweep.
pub const DEFAULT_SWEEP_BATCH: usize = 100;

/// Default number of days a completed cleanup is kept before it is purged.
pub const DEFAULT_CLEANUP_RETENTION_DAYS: u32 = 7;

/// Removes a cleanup's variants from the cart and marks the record done.
///
/// Returns `true` if the cart was pruned. Failures are logged, counted and
/// recorded on the outbox entry, never returned.
pub async fn apply_cleanup<D: Database, C: CartStore>(
    db: &D,
    cart: &C,
    cleanup: &CartCleanup,
) -> bool {
    match cart.remove(cleanup.user_id, &cleanup.sku_ids).await {
        Ok(()) => {
            if let Err(e) = db.complete_cleanup(cleanup.id).await {
                // The cart is pruned already; a later sweep repeats an idempotent remove.
                warn!(cleanup_id = %cleanup.id, error = %e, "failed to mark cart cleanup done");
            }
            true
        }
        Err(e) => {
            metrics::counter!("cart_cleanup_failures_total").increment(1);
            warn!(
                cleanup_id = %cleanup.id,
                order_id = %cleanup.order_id,
                user_id = %cleanup.user_id,
                attempts = cleanup.attempts + 1,
                error = %e,
                "failed to prune cart after order commit"
            );
            if let Err(e) = db.record_cleanup_failure(cleanup.id).await {
                warn!(cleanup_id = %cleanup.id, error = %e, "failed to record cart cleanup failure");
            }
            false
        }
    }
}

/// Result of one sweep over the outbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub completed: usize,
    pub failed: usize,
    /// Completed cleanups deleted because they outlived the retention.
    pub purged: u64,
}

/// Background task retrying cart cleanups left pending by failed prunes.
pub struct CartCleanupSweeper<D: Database, C: CartStore> {
    db: D,
    cart: C,
    interval: Duration,
    batch_size: usize,
    retention: TimeDelta,
}

impl<D: Database, C: CartStore> CartCleanupSweeper<D, C> {
    /// Creates a sweeper running every 30 seconds that keeps completed
    /// cleanups for a week.
    pub fn new(db: D, cart: C) -> Self {
        Self {
            db,
            cart,
            interval: Duration::from_secs(30),
            batch_size: DEFAULT_SWEEP_BATCH,
            retention: TimeDelta::days(i64::from(DEFAULT_CLEANUP_RETENTION_DAYS)),
        }
    }

    /// Sets how often the outbox is swept. A zero interval is raised to one
    /// second.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = if interval.is_zero() {
            Duration::from_secs(1)
        } else {
            interval
        };
        self
    }

    /// Sets how long completed cleanups are kept before a sweep deletes them.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = TimeDelta::from_std(retention).unwrap_or(TimeDelta::MAX);
        self
    }

    /// Sets how many pending cleanups one sweep handles.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Runs one sweep.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> Result<SweepReport> {
        let pending = self.db.pending_cleanups(self.batch_size).await?;
        metrics::gauge!("cart_cleanup_pending").set(pending.len() as f64);

        let mut report = SweepReport::default();
        for cleanup in &pending {
            if apply_cleanup(&self.db, &self.cart, cleanup).await {
                report.completed += 1;
            } else {
                report.failed += 1;
            }
        }

        if let Some(cutoff) = Utc::now().checked_sub_signed(self.retention) {
            report.purged = self.db.purge_completed_cleanups(cutoff).await?;
        }

        Ok(report)
    }

    /// Spawns the sweeper as a background task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(interval_secs = self.interval.as_secs(), "cart cleanup sweeper started");

            loop {
                interval.tick().await;

                match self.run_once().await {
                    Ok(report) if report != SweepReport::default() => {
                        info!(
                            completed = report.completed,
                            failed = report.failed,
                            purged = report.purged,
                            "cart cleanup sweep finished"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "cart cleanup sweep failed");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use common::{OrderId, SkuId, UserId};
    use store::{InMemoryCartStore, InMemoryDatabase, Transaction};

    use super::*;

    async fn enqueue(db: &InMemoryDatabase, cleanup: &CartCleanup) {
        let mut tx = db.begin().await.unwrap();
        tx.enqueue_cart_cleanup(cleanup).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn sweep_retries_failed_cleanups() {
        let db = InMemoryDatabase::new();
        let cart = InMemoryCartStore::new();
        let user = UserId::new(1);
        cart.add_item(user, SkuId::new(1), 2, true);
        let cleanup = CartCleanup::new(user, OrderId::new("o1"), vec![SkuId::new(1)]);
        enqueue(&db, &cleanup).await;

        cart.set_fail_on_remove(true);
        assert!(!apply_cleanup(&db, &cart, &cleanup).await);
        assert!(cart.contains(user, SkuId::new(1)));
        assert_eq!(db.pending_cleanups(10).await.unwrap()[0].attempts, 1);

        let sweeper = CartCleanupSweeper::new(db.clone(), cart.clone());
        assert_eq!(
            sweeper.run_once().await.unwrap(),
            SweepReport {
                completed: 0,
                failed: 1,
                purged: 0,
            }
        );

        cart.set_fail_on_remove(false);
        assert_eq!(
            sweeper.run_once().await.unwrap(),
            SweepReport {
                completed: 1,
                failed: 0,
                purged: 0,
            }
        );
        assert!(!cart.contains(user, SkuId::new(1)));
        assert!(db.pending_cleanups(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sweep_purges_completed_cleanups_past_retention() {
        let db = InMemoryDatabase::new();
        let cart = InMemoryCartStore::new();
        let cleanup = CartCleanup::new(UserId::new(1), OrderId::new("o1"), vec![SkuId::new(1)]);
        enqueue(&db, &cleanup).await;
        assert!(apply_cleanup(&db, &cart, &cleanup).await);

        let keeping = CartCleanupSweeper::new(db.clone(), cart.clone());
        assert_eq!(keeping.run_once().await.unwrap().purged, 0);

        let purging = CartCleanupSweeper::new(db.clone(), cart).with_retention(Duration::ZERO);
        assert_eq!(purging.run_once().await.unwrap().purged, 1);
        assert_eq!(purging.run_once().await.unwrap(), SweepReport::default());
    }

    #[tokio::test]
    async fn empty_outbox_sweeps_nothing() {
        let sweeper = CartCleanupSweeper::new(InMemoryDatabase::new(), InMemoryCartStore::new())
            .with_interval(Duration::from_millis(10))
            .with_batch_size(5);
        assert_eq!(sweeper.run_once().await.unwrap(), SweepReport::default());
    }
}
