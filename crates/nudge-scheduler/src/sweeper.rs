//! Periodic reconciliation of pending reminders into the task queue.
//!
//! Covers reminders created while the process was down, queue data loss, and
//! schedule calls that failed after the reminder was stored.

use crate::queue::{config_secs, TaskQueue};
use chrono::{DateTime, Utc};
use nudge_core::{
    config::SweeperConfig,
    error::NudgeError,
    reminder::{Reminder, ReminderTask},
};
use nudge_store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Upper bound on reminders examined per tick.
const SWEEP_BATCH: i64 = 1000;

/// Result of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub scheduled: usize,
    pub already_queued: usize,
    /// Pending reminders whose owner is gone, now marked failed.
    pub orphaned: usize,
    pub errors: usize,
}

/// What [`RecoverySweeper::readmit`] did with one reminder.
enum Readmit {
    Scheduled,
    AlreadyQueued,
    Orphaned,
}

pub struct RecoverySweeper {
    store: Store,
    queue: Arc<dyn TaskQueue>,
    interval: Duration,
    lookahead: chrono::Duration,
}

impl RecoverySweeper {
    pub fn new(store: Store, queue: Arc<dyn TaskQueue>, config: &SweeperConfig) -> Self {
        Self {
            store,
            queue,
            interval: config_secs(config.interval_secs.max(1))
                .to_std()
                .unwrap_or(Duration::from_secs(1)),
            lookahead: config_secs(config.lookahead_secs),
        }
    }

    /// Re-admit every pending reminder due before `now + lookahead` that the
    /// queue does not hold. A failure on one reminder is logged and the sweep
    /// moves on; only the initial store query can fail the tick.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<SweepReport, NudgeError> {
        let due = self
            .store
            .pending_due_before(now + self.lookahead, SWEEP_BATCH)
            .await?;

        let mut report = SweepReport {
            scanned: due.len(),
            ..Default::default()
        };
        for reminder in &due {
            match self.readmit(reminder).await {
                Ok(Readmit::Scheduled) => report.scheduled += 1,
                Ok(Readmit::AlreadyQueued) => report.already_queued += 1,
                Ok(Readmit::Orphaned) => report.orphaned += 1,
                Err(e) => {
                    warn!("sweeper: skipping {}: {e}", reminder.id);
                    report.errors += 1;
                }
            }
        }
        Ok(report)
    }

    /// Schedule one reminder unless already queued. A reminder without an
    /// owner can never be delivered and is failed, so it leaves the pending
    /// set instead of heading every batch.
    async fn readmit(&self, reminder: &Reminder) -> Result<Readmit, NudgeError> {
        if self.queue.contains(&reminder.id).await? {
            return Ok(Readmit::AlreadyQueued);
        }
        let Some(owner) = self.store.get_owner(&reminder.owner_id).await? else {
            let reason = format!("owner {} not found", reminder.owner_id);
            if self.store.mark_failed(&reminder.id, &reason).await? {
                warn!("sweeper: {} failed: {reason}", reminder.id);
            }
            return Ok(Readmit::Orphaned);
        };

        let task = ReminderTask::new(reminder, &owner.destination_address);
        self.queue
            .schedule(&reminder.id, &task, reminder.scheduled_at)
            .await?;
        debug!(
            "sweeper: re-admitted {} due {}",
            reminder.id, reminder.scheduled_at
        );
        Ok(Readmit::Scheduled)
    }

    /// Sweep once immediately, then every interval, until `shutdown` flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "sweeper: every {}s, looking {}s ahead",
            self.interval.as_secs(),
            self.lookahead.num_seconds()
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.tick(Utc::now()).await {
                Ok(r) if r.scheduled > 0 || r.orphaned > 0 || r.errors > 0 => info!(
                    "sweeper: scanned={} scheduled={} queued={} orphaned={} errors={}",
                    r.scanned, r.scheduled, r.already_queued, r.orphaned, r.errors
                ),
                Ok(_) => {}
                Err(e) => error!("sweeper: tick failed: {e}"),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("sweeper: stopped");
    }
}
