//! Process-local queue. Loses everything on restart; the recovery sweeper
//! re-admits pending reminders afterwards.

use super::{DeadLetter, QueueStats, QueuedTask, RetryOutcome, RetryPolicy, TaskQueue, TaskStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nudge_core::{error::NudgeError, reminder::ReminderTask};
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct Entry {
    payload: ReminderTask,
    fire_at: DateTime<Utc>,
    status: TaskStatus,
    attempts: u32,
    last_error: Option<String>,
    lease_until: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl Entry {
    fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            TaskStatus::Waiting => self.fire_at <= now,
            TaskStatus::Active => self.lease_until.is_some_and(|l| l <= now),
            TaskStatus::Failed => false,
        }
    }
}

/// In-memory [`TaskQueue`] used by tests and single-shot CLI runs.
pub struct MemoryQueue {
    entries: Mutex<HashMap<String, Entry>>,
    policy: RetryPolicy,
}

impl MemoryQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            policy,
        }
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    fn name(&self) -> &str {
        "memory"
    }

    async fn schedule(
        &self,
        key: &str,
        payload: &ReminderTask,
        fire_at: DateTime<Utc>,
    ) -> Result<(), NudgeError> {
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.get(key) {
            if existing.status == TaskStatus::Active {
                return Ok(());
            }
        }
        entries.insert(
            key.to_string(),
            Entry {
                payload: payload.clone(),
                fire_at,
                status: TaskStatus::Waiting,
                attempts: 0,
                last_error: None,
                lease_until: None,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn cancel(&self, key: &str) -> Result<bool, NudgeError> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.status == TaskStatus::Waiting => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn contains(&self, key: &str) -> Result<bool, NudgeError> {
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .is_some_and(|e| e.status != TaskStatus::Failed))
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueuedTask>, NudgeError> {
        let mut entries = self.entries.lock().await;
        let mut due: Vec<(&String, &mut Entry)> = entries
            .iter_mut()
            .filter(|(_, e)| e.is_claimable(now))
            .collect();
        due.sort_by_key(|(_, e)| e.fire_at);

        let lease_until = now + self.policy.lease;
        Ok(due
            .into_iter()
            .take(limit)
            .map(|(key, entry)| {
                entry.status = TaskStatus::Active;
                entry.attempts += 1;
                entry.lease_until = Some(lease_until);
                entry.updated_at = now;
                QueuedTask {
                    key: key.clone(),
                    payload: entry.payload.clone(),
                    fire_at: entry.fire_at,
                    attempts: entry.attempts,
                    last_error: entry.last_error.clone(),
                }
            })
            .collect())
    }

    async fn ack(&self, key: &str) -> Result<(), NudgeError> {
        let mut entries = self.entries.lock().await;
        if entries
            .get(key)
            .is_some_and(|e| e.status == TaskStatus::Active)
        {
            entries.remove(key);
        }
        Ok(())
    }

    async fn retry(
        &self,
        key: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<RetryOutcome, NudgeError> {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(key) else {
            return Ok(RetryOutcome::Missing);
        };
        entry.last_error = Some(error.to_string());
        entry.lease_until = None;
        entry.updated_at = now;
        if self.policy.has_attempts_left(entry.attempts) {
            let next = now + self.policy.backoff(entry.attempts);
            entry.status = TaskStatus::Waiting;
            entry.fire_at = next;
            Ok(RetryOutcome::Rescheduled(next))
        } else {
            entry.status = TaskStatus::Failed;
            Ok(RetryOutcome::Buried)
        }
    }

    async fn bury(&self, key: &str, error: &str) -> Result<(), NudgeError> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(key) {
            entry.status = TaskStatus::Failed;
            entry.last_error = Some(error.to_string());
            entry.lease_until = None;
            entry.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, NudgeError> {
        let entries = self.entries.lock().await;
        let mut dead: Vec<DeadLetter> = entries
            .iter()
            .filter(|(_, e)| e.status == TaskStatus::Failed)
            .map(|(key, e)| DeadLetter {
                key: key.clone(),
                payload: e.payload.clone(),
                attempts: e.attempts,
                last_error: e.last_error.clone(),
                failed_at: e.updated_at,
            })
            .collect();
        dead.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));
        Ok(dead)
    }

    async fn stats(&self) -> Result<QueueStats, NudgeError> {
        let entries = self.entries.lock().await;
        let mut stats = QueueStats::default();
        for entry in entries.values() {
            match entry.status {
                TaskStatus::Waiting => stats.waiting += 1,
                TaskStatus::Active => stats.active += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}
