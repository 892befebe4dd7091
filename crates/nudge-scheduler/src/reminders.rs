//! Entry points that change a reminder and its queued task together.

use crate::queue::TaskQueue;
use nudge_core::{
    error::NudgeError,
    owner::Owner,
    reminder::{NewReminder, Reminder, ReminderTask},
};
use nudge_store::{CancelOutcome, Store};
use std::sync::Arc;
use tracing::{info, warn};

/// Creates and cancels reminders, keeping the queue in step on a best-effort
/// basis. The store is the source of truth; the sweeper repairs the queue
/// when a queue call here fails.
#[derive(Clone)]
pub struct ReminderScheduler {
    store: Store,
    queue: Arc<dyn TaskQueue>,
}

impl ReminderScheduler {
    pub fn new(store: Store, queue: Arc<dyn TaskQueue>) -> Self {
        Self { store, queue }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn queue(&self) -> &Arc<dyn TaskQueue> {
        &self.queue
    }

    /// Persist a pending reminder for `owner` and enqueue it at its
    /// scheduled time, keyed by the reminder id.
    pub async fn create(&self, owner: &Owner, new: NewReminder) -> Result<Reminder, NudgeError> {
        let reminder = self.store.create_reminder(&new).await?;
        let task = ReminderTask::new(&reminder, &owner.destination_address);
        match self
            .queue
            .schedule(&reminder.id, &task, reminder.scheduled_at)
            .await
        {
            Ok(()) => info!(
                "scheduler: queued {} for {} at {}",
                reminder.id, owner.id, reminder.scheduled_at
            ),
            Err(e) => warn!(
                "scheduler: {} stored but not queued ({e}); the sweeper will pick it up",
                reminder.id
            ),
        }
        Ok(reminder)
    }

    /// Cancel a reminder. With `owner_id`, only that owner's reminder is
    /// touched. Removing the queued task is advisory; the executor's status
    /// check is what actually stops a send.
    pub async fn cancel(
        &self,
        reminder_id: &str,
        owner_id: Option<&str>,
    ) -> Result<CancelOutcome, NudgeError> {
        let outcome = match owner_id {
            Some(owner) => self.store.cancel_reminder_for_owner(reminder_id, owner).await?,
            None => self.store.cancel_reminder(reminder_id).await?,
        };
        if outcome == CancelOutcome::Cancelled {
            match self.queue.cancel(reminder_id).await {
                Ok(true) => info!("scheduler: cancelled {reminder_id} and dequeued it"),
                Ok(false) => info!("scheduler: cancelled {reminder_id} (not waiting in queue)"),
                Err(e) => warn!("scheduler: cancelled {reminder_id} but dequeue failed: {e}"),
            }
        }
        Ok(outcome)
    }
}
