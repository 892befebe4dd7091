//! Queue persisted in the `task_queue` table of the main database.
//!
//! Every state change is a single statement, so concurrent workers (or
//! processes sharing the file) never both claim the same key.

use super::{DeadLetter, QueueStats, QueuedTask, RetryOutcome, RetryPolicy, TaskQueue};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nudge_core::{error::NudgeError, reminder::ReminderTask};
use nudge_store::timestamp::{format_ts, parse_ts};
use sqlx::SqlitePool;
use tracing::debug;

/// Durable [`TaskQueue`] sharing the store's connection pool.
pub struct SqliteQueue {
    pool: SqlitePool,
    policy: RetryPolicy,
}

type ClaimRow = (String, String, String, i64, Option<String>);

fn decode_payload(key: &str, payload: &str) -> Result<ReminderTask, NudgeError> {
    serde_json::from_str(payload)
        .map_err(|e| NudgeError::Queue(format!("corrupt payload for {key}: {e}")))
}

impl SqliteQueue {
    /// Create the queue on `pool`, creating its table if needed.
    pub async fn new(pool: SqlitePool, policy: RetryPolicy) -> Result<Self, NudgeError> {
        sqlx::raw_sql(include_str!("../../migrations/001_task_queue.sql"))
            .execute(&pool)
            .await
            .map_err(|e| NudgeError::Queue(format!("task_queue migration failed: {e}")))?;
        Ok(Self { pool, policy })
    }
}

#[async_trait]
impl TaskQueue for SqliteQueue {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn schedule(
        &self,
        key: &str,
        payload: &ReminderTask,
        fire_at: DateTime<Utc>,
    ) -> Result<(), NudgeError> {
        let payload = serde_json::to_string(payload)?;
        let result = sqlx::query(
            "INSERT INTO task_queue (key, payload, fire_at, status, attempts, updated_at) \
             VALUES (?, ?, ?, 'waiting', 0, ?) \
             ON CONFLICT(key) DO UPDATE SET \
                 payload = excluded.payload, \
                 fire_at = excluded.fire_at, \
                 status = 'waiting', \
                 attempts = 0, \
                 last_error = NULL, \
                 lease_until = NULL, \
                 updated_at = excluded.updated_at \
             WHERE task_queue.status != 'active'",
        )
        .bind(key)
        .bind(&payload)
        .bind(format_ts(fire_at))
        .bind(format_ts(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| NudgeError::Queue(format!("schedule {key} failed: {e}")))?;

        if result.rows_affected() == 0 {
            debug!("queue: {key} is claimed, schedule left it alone");
        }
        Ok(())
    }

    async fn cancel(&self, key: &str) -> Result<bool, NudgeError> {
        let result = sqlx::query("DELETE FROM task_queue WHERE key = ? AND status = 'waiting'")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| NudgeError::Queue(format!("cancel {key} failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    async fn contains(&self, key: &str) -> Result<bool, NudgeError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT key FROM task_queue WHERE key = ? AND status IN ('waiting', 'active')",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| NudgeError::Queue(format!("contains {key} failed: {e}")))?;
        Ok(row.is_some())
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueuedTask>, NudgeError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let now_ts = format_ts(now);
        let rows: Vec<ClaimRow> = sqlx::query_as(
            "UPDATE task_queue \
             SET status = 'active', attempts = attempts + 1, lease_until = ?, updated_at = ? \
             WHERE key IN ( \
                 SELECT key FROM task_queue \
                 WHERE (status = 'waiting' AND fire_at <= ?) \
                    OR (status = 'active' AND lease_until <= ?) \
                 ORDER BY fire_at ASC LIMIT ? \
             ) \
             RETURNING key, payload, fire_at, attempts, last_error",
        )
        .bind(format_ts(now + self.policy.lease))
        .bind(&now_ts)
        .bind(&now_ts)
        .bind(&now_ts)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| NudgeError::Queue(format!("claim failed: {e}")))?;

        let mut tasks = Vec::with_capacity(rows.len());
        for (key, payload, fire_at, attempts, last_error) in rows {
            tasks.push(QueuedTask {
                payload: decode_payload(&key, &payload)?,
                fire_at: parse_ts(&fire_at)?,
                attempts: attempts.max(0) as u32,
                last_error,
                key,
            });
        }
        tasks.sort_by_key(|t| t.fire_at);
        Ok(tasks)
    }

    async fn ack(&self, key: &str) -> Result<(), NudgeError> {
        sqlx::query("DELETE FROM task_queue WHERE key = ? AND status = 'active'")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| NudgeError::Queue(format!("ack {key} failed: {e}")))?;
        Ok(())
    }

    async fn retry(
        &self,
        key: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<RetryOutcome, NudgeError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT attempts FROM task_queue WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| NudgeError::Queue(format!("retry lookup {key} failed: {e}")))?;
        let Some((attempts,)) = row else {
            return Ok(RetryOutcome::Missing);
        };
        let attempts = attempts.max(0) as u32;

        if !self.policy.has_attempts_left(attempts) {
            self.bury(key, error).await?;
            return Ok(RetryOutcome::Buried);
        }

        let next = now + self.policy.backoff(attempts);
        sqlx::query(
            "UPDATE task_queue \
             SET status = 'waiting', fire_at = ?, last_error = ?, lease_until = NULL, updated_at = ? \
             WHERE key = ?",
        )
        .bind(format_ts(next))
        .bind(error)
        .bind(format_ts(now))
        .bind(key)
        .execute(&self.pool)
        .await
        .map_err(|e| NudgeError::Queue(format!("retry {key} failed: {e}")))?;
        Ok(RetryOutcome::Rescheduled(next))
    }

    async fn bury(&self, key: &str, error: &str) -> Result<(), NudgeError> {
        sqlx::query(
            "UPDATE task_queue \
             SET status = 'failed', last_error = ?, lease_until = NULL, updated_at = ? \
             WHERE key = ?",
        )
        .bind(error)
        .bind(format_ts(Utc::now()))
        .bind(key)
        .execute(&self.pool)
        .await
        .map_err(|e| NudgeError::Queue(format!("bury {key} failed: {e}")))?;
        Ok(())
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, NudgeError> {
        let rows: Vec<(String, String, i64, Option<String>, String)> = sqlx::query_as(
            "SELECT key, payload, attempts, last_error, updated_at FROM task_queue \
             WHERE status = 'failed' ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| NudgeError::Queue(format!("dead letters failed: {e}")))?;

        rows.into_iter()
            .map(|(key, payload, attempts, last_error, updated_at)| {
                Ok(DeadLetter {
                    payload: decode_payload(&key, &payload)?,
                    attempts: attempts.max(0) as u32,
                    failed_at: parse_ts(&updated_at)?,
                    last_error,
                    key,
                })
            })
            .collect()
    }

    async fn stats(&self) -> Result<QueueStats, NudgeError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM task_queue GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| NudgeError::Queue(format!("queue stats failed: {e}")))?;

        let mut stats = QueueStats::default();
        for (status, count) in rows {
            let count = count.max(0) as usize;
            match status.as_str() {
                "waiting" => stats.waiting = count,
                "active" => stats.active = count,
                "failed" => stats.failed = count,
                _ => {}
            }
        }
        Ok(stats)
    }
}
