//! Delivery of one due reminder.

use crate::queue::{QueuedTask, RetryPolicy};
use chrono::Utc;
use nudge_core::{
    conversation::ConversationMessage,
    error::{NotifyError, NudgeError},
    reminder::ReminderStatus,
    traits::Notifier,
};
use nudge_store::Store;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// What happened to a task, and therefore what the queue should do with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Notifier accepted the message and the reminder is now `sent`. Ack.
    Sent { external_message_id: String },
    /// The reminder was missing or no longer pending. Ack.
    Skipped { status: Option<ReminderStatus> },
    /// Transient failure with attempts left. Retry with backoff.
    Retry { reason: String },
    /// The reminder is now `failed`. Bury.
    Failed { reason: String },
}

/// Sends due reminders through a [`Notifier`] and records the result.
///
/// Safe to run concurrently on the same reminder: only the caller whose
/// conditional `pending → sent` update succeeds records the send.
pub struct Executor {
    store: Store,
    notifier: Arc<dyn Notifier>,
    policy: RetryPolicy,
    send_timeout: Duration,
}

impl Executor {
    pub fn new(
        store: Store,
        notifier: Arc<dyn Notifier>,
        policy: RetryPolicy,
        send_timeout: Duration,
    ) -> Self {
        Self {
            store,
            notifier,
            policy,
            send_timeout,
        }
    }

    /// Run one delivery attempt for `task`.
    ///
    /// Store errors are returned as `Err` and leave the reminder untouched, so
    /// the queue retries the whole attempt.
    pub async fn execute(&self, task: &QueuedTask) -> Result<ExecOutcome, NudgeError> {
        let id = task.payload.reminder_id.as_str();

        let reminder = match self.store.get_reminder(id).await? {
            Some(r) if r.status == ReminderStatus::Pending => r,
            Some(r) => {
                info!("executor: {id} is {}, skipping", r.status);
                return Ok(ExecOutcome::Skipped {
                    status: Some(r.status),
                });
            }
            None => {
                warn!("executor: {id} no longer exists, skipping");
                return Ok(ExecOutcome::Skipped { status: None });
            }
        };

        let text = task.payload.render();
        let sent = match tokio::time::timeout(
            self.send_timeout,
            self.notifier
                .send(&task.payload.destination_address, &text),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(NotifyError::Retryable(format!(
                "send timed out after {}ms",
                self.send_timeout.as_millis()
            ))),
        };

        match sent {
            Ok(delivery) => {
                let now = Utc::now();
                if !self
                    .store
                    .mark_sent(id, &delivery.external_message_id, now)
                    .await?
                {
                    warn!(
                        "executor: {id} changed state during send ({}), not marking sent",
                        delivery.external_message_id
                    );
                    let status = self.store.get_reminder(id).await?.map(|r| r.status);
                    return Ok(ExecOutcome::Skipped { status });
                }

                let log = ConversationMessage::outbound(&reminder.owner_id, &text)
                    .with_reminder(id);
                if let Err(e) = self.store.append_message(&log).await {
                    warn!("executor: sent {id} but failed to log it: {e}");
                }

                info!(
                    "executor: sent {id} via {} ({})",
                    self.notifier.name(),
                    delivery.external_message_id
                );
                Ok(ExecOutcome::Sent {
                    external_message_id: delivery.external_message_id,
                })
            }
            Err(e) => {
                let reason = e.reason().to_string();
                if e.is_retryable() && self.policy.has_attempts_left(task.attempts) {
                    warn!(
                        "executor: attempt {}/{} for {id} failed: {reason}",
                        task.attempts, self.policy.max_attempts
                    );
                    return Ok(ExecOutcome::Retry { reason });
                }

                let reason = if e.is_retryable() {
                    format!("gave up after {} attempts: {reason}", task.attempts)
                } else {
                    format!("rejected: {reason}")
                };
                if !self.store.mark_failed(id, &reason).await? {
                    warn!("executor: {id} left pending before it could be marked failed");
                }
                warn!("executor: {id} failed: {reason}");
                Ok(ExecOutcome::Failed { reason })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use nudge_core::{
        reminder::{NewReminder, ReminderTask},
        traits::Delivery,
    };

    struct SlowNotifier;

    #[async_trait]
    impl Notifier for SlowNotifier {
        fn name(&self) -> &str {
            "slow"
        }

        async fn send(&self, _: &str, _: &str) -> Result<Delivery, NotifyError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Delivery {
                external_message_id: "late".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_send_timeout_is_retryable() {
        let store = Store::open_in_memory().await.unwrap();
        let reminder = store
            .create_reminder(&NewReminder {
                owner_id: "user1".into(),
                text: "stretch".into(),
                scheduled_at: Utc::now(),
                ..Default::default()
            })
            .await
            .unwrap();
        let executor = Executor::new(
            store.clone(),
            Arc::new(SlowNotifier),
            RetryPolicy::default(),
            Duration::from_millis(50),
        );
        let task = QueuedTask {
            key: reminder.id.clone(),
            payload: ReminderTask::new(&reminder, "15550001111"),
            fire_at: reminder.scheduled_at,
            attempts: 1,
            last_error: None,
        };

        let outcome = executor.execute(&task).await.unwrap();
        assert!(matches!(outcome, ExecOutcome::Retry { ref reason } if reason.contains("timed out")));
        let r = store.get_reminder(&reminder.id).await.unwrap().unwrap();
        assert_eq!(r.status, ReminderStatus::Pending);
    }

    #[tokio::test]
    async fn test_missing_reminder_is_skipped() {
        let store = Store::open_in_memory().await.unwrap();
        let executor = Executor::new(
            store,
            Arc::new(SlowNotifier),
            RetryPolicy::default(),
            Duration::from_millis(50),
        );
        let task = QueuedTask {
            key: "gone".into(),
            payload: ReminderTask {
                reminder_id: "gone".into(),
                owner_id: "user1".into(),
                destination_address: "15550001111".into(),
                text: "x".into(),
            },
            fire_at: Utc::now(),
            attempts: 1,
            last_error: None,
        };
        assert_eq!(
            executor.execute(&task).await.unwrap(),
            ExecOutcome::Skipped { status: None }
        );
    }
}
