//! Delayed task queue contract.
//!
//! Delivery is at-least-once: a claimed task whose worker disappears is
//! handed out again once its lease runs out, and a failed attempt comes back
//! after a backoff. Consumers must be idempotent per key.

pub mod memory;
pub mod sqlite;


use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use nudge_core::{config::SchedulerConfig, error::NudgeError, reminder::ReminderTask};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a task sits in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting for `fire_at`.
    Waiting,
    /// Claimed by a worker until its lease expires.
    Active,
    /// Out of attempts; parked in the dead lane.
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task handed to a worker by [`TaskQueue::claim_due`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedTask {
    pub key: String,
    pub payload: ReminderTask,
    pub fire_at: DateTime<Utc>,
    /// 1 on the first delivery, incremented on every claim.
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// A task that exhausted its attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub key: String,
    pub payload: ReminderTask,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub failed_at: DateTime<Utc>,
}

/// What [`TaskQueue::retry`] did with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Back to `waiting`, due again at the given instant.
    Rescheduled(DateTime<Utc>),
    /// Attempts exhausted; moved to the dead lane.
    Buried,
    /// The key is no longer in the queue.
    Missing,
}

/// Per-status task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub waiting: usize,
    pub active: usize,
    pub failed: usize,
}

/// Longest configurable span. Larger settings are clamped to it.
const MAX_CONFIG_SECS: u64 = 366 * 24 * 3600;

/// A configured number of seconds as a signed span, clamped to a year.
pub(crate) fn config_secs(secs: u64) -> Duration {
    let secs = i64::try_from(secs.min(MAX_CONFIG_SECS)).unwrap_or(i64::MAX);
    Duration::try_seconds(secs).unwrap_or(Duration::zero())
}

/// Attempt budget and capped exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// How long a claim stays exclusive before the task is redelivered.
    pub lease: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base: config_secs(config.backoff_base_secs),
            backoff_max: config_secs(config.backoff_max_secs),
            lease: config_secs(config.lease_secs.max(1)),
        }
    }

    /// Delay before the attempt following attempt number `attempts`
    /// (1-based): `base * 2^(attempts - 1)`, capped at `backoff_max`.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(30);
        let delay = self
            .backoff_base
            .checked_mul(1i32 << exponent)
            .unwrap_or(self.backoff_max);
        delay.min(self.backoff_max)
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    pub fn has_attempts_left(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// Durable delayed delivery keyed by an idempotency key.
///
/// `schedule` replaces a waiting or dead task with the same key, so one key
/// fires at most once per schedule. A task that is currently claimed is
/// left alone; its worker's own re-check of the reminder decides what happens.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Backing name, for logs and `status`.
    fn name(&self) -> &str;

    /// Enqueue `payload` to fire at or after `fire_at`.
    async fn schedule(
        &self,
        key: &str,
        payload: &ReminderTask,
        fire_at: DateTime<Utc>,
    ) -> Result<(), NudgeError>;

    /// Remove a waiting task. Returns `false` if absent or already claimed.
    async fn cancel(&self, key: &str) -> Result<bool, NudgeError>;

    /// Whether `key` is waiting or claimed. Dead tasks do not count.
    async fn contains(&self, key: &str) -> Result<bool, NudgeError>;

    /// Claim up to `limit` tasks that are due at `now`, plus claimed tasks
    /// whose lease expired. Each claim increments `attempts`.
    async fn claim_due(&self, now: DateTime<Utc>, limit: usize)
        -> Result<Vec<QueuedTask>, NudgeError>;

    /// Acknowledge a claimed task; it leaves the queue.
    async fn ack(&self, key: &str) -> Result<(), NudgeError>;

    /// Return a claimed task after a failed attempt. Reschedules with backoff
    /// while attempts remain, otherwise buries it.
    async fn retry(
        &self,
        key: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<RetryOutcome, NudgeError>;

    /// Move a task to the dead lane without further attempts.
    async fn bury(&self, key: &str, error: &str) -> Result<(), NudgeError>;

    /// Tasks in the dead lane, most recent first.
    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, NudgeError>;

    async fn stats(&self) -> Result<QueueStats, NudgeError>;
}
