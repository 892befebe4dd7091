//! Reminder CRUD and status-guarded lifecycle transitions.
//!
//! Every status change is a conditional `UPDATE ... WHERE status IN (...)`,
//! so two writers racing on the same reminder cannot both win.

use super::Store;
use crate::timestamp::{format_ts, parse_opt_ts, parse_ts};
use chrono::{DateTime, Utc};
use nudge_core::{
    error::NudgeError,
    reminder::{NewReminder, Reminder, ReminderStatus},
};
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

const REMINDER_COLUMNS: &str = "id, owner_id, text, scheduled_at, status, sent_at, delivered_at, \
     failure_reason, external_message_id, metadata_json, created_at";

#[derive(sqlx::FromRow)]
struct ReminderRow {
    id: String,
    owner_id: String,
    text: String,
    scheduled_at: String,
    status: String,
    sent_at: Option<String>,
    delivered_at: Option<String>,
    failure_reason: Option<String>,
    external_message_id: Option<String>,
    metadata_json: String,
    created_at: String,
}

impl TryFrom<ReminderRow> for Reminder {
    type Error = NudgeError;

    fn try_from(row: ReminderRow) -> Result<Self, Self::Error> {
        let metadata: BTreeMap<String, String> = serde_json::from_str(&row.metadata_json)?;
        Ok(Reminder {
            scheduled_at: parse_ts(&row.scheduled_at)?,
            status: row.status.parse()?,
            sent_at: parse_opt_ts(row.sent_at.as_deref())?,
            delivered_at: parse_opt_ts(row.delivered_at.as_deref())?,
            created_at: parse_ts(&row.created_at)?,
            id: row.id,
            owner_id: row.owner_id,
            text: row.text,
            failure_reason: row.failure_reason,
            external_message_id: row.external_message_id,
            metadata,
        })
    }
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The reminder moved to `cancelled`.
    Cancelled,
    /// The reminder was already terminal; nothing changed.
    AlreadyFinal(ReminderStatus),
    NotFound,
}

impl Store {
    /// Persist a new `pending` reminder.
    pub async fn create_reminder(&self, new: &NewReminder) -> Result<Reminder, NudgeError> {
        let now = Utc::now();
        let reminder = Reminder {
            id: Uuid::new_v4().to_string(),
            owner_id: new.owner_id.clone(),
            text: new.text.clone(),
            scheduled_at: new.scheduled_at,
            status: ReminderStatus::Pending,
            sent_at: None,
            delivered_at: None,
            failure_reason: None,
            external_message_id: None,
            metadata: new.metadata.clone(),
            created_at: now,
        };
        let metadata_json = serde_json::to_string(&reminder.metadata)?;

        sqlx::query(
            "INSERT INTO reminders \
             (id, owner_id, text, scheduled_at, status, metadata_json, created_at, updated_at) \
             VALUES (?, ?, ?, ?, 'pending', ?, ?, ?)",
        )
        .bind(&reminder.id)
        .bind(&reminder.owner_id)
        .bind(&reminder.text)
        .bind(format_ts(reminder.scheduled_at))
        .bind(&metadata_json)
        .bind(format_ts(now))
        .bind(format_ts(now))
        .execute(&self.pool)
        .await
        .map_err(|e| NudgeError::Store(format!("create reminder failed: {e}")))?;

        debug!(
            "store: created reminder {} for {} at {}",
            reminder.id, reminder.owner_id, reminder.scheduled_at
        );
        Ok(reminder)
    }

    /// Fetch a reminder by id.
    pub async fn get_reminder(&self, id: &str) -> Result<Option<Reminder>, NudgeError> {
        let row: Option<ReminderRow> = sqlx::query_as(&format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| NudgeError::Store(format!("get reminder failed: {e}")))?;

        row.map(Reminder::try_from).transpose()
    }

    /// `pending → sent`. Returns `false` if the reminder was no longer pending.
    pub async fn mark_sent(
        &self,
        id: &str,
        external_message_id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, NudgeError> {
        let result = sqlx::query(
            "UPDATE reminders \
             SET status = 'sent', sent_at = ?, external_message_id = ?, updated_at = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(format_ts(sent_at))
        .bind(external_message_id)
        .bind(format_ts(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| NudgeError::Store(format!("mark sent failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// `pending → failed` with a recorded reason. Returns `false` if the
    /// reminder was no longer pending.
    pub async fn mark_failed(&self, id: &str, reason: &str) -> Result<bool, NudgeError> {
        let reason = if reason.trim().is_empty() {
            "unknown failure"
        } else {
            reason
        };
        let result = sqlx::query(
            "UPDATE reminders SET status = 'failed', failure_reason = ?, updated_at = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(reason)
        .bind(format_ts(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| NudgeError::Store(format!("mark failed failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// `sent → delivered`, correlated by the downstream message id.
    ///
    /// Returns the reminder id when a transition happened.
    pub async fn mark_delivered(
        &self,
        external_message_id: &str,
        delivered_at: DateTime<Utc>,
    ) -> Result<Option<String>, NudgeError> {
        let row: Option<(String,)> = sqlx::query_as(
            "UPDATE reminders SET status = 'delivered', delivered_at = ?, updated_at = ? \
             WHERE external_message_id = ? AND status = 'sent' \
             RETURNING id",
        )
        .bind(format_ts(delivered_at))
        .bind(format_ts(Utc::now()))
        .bind(external_message_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| NudgeError::Store(format!("mark delivered failed: {e}")))?;

        Ok(row.map(|(id,)| id))
    }

    /// Cancel a reminder in any non-terminal state.
    pub async fn cancel_reminder(&self, id: &str) -> Result<CancelOutcome, NudgeError> {
        self.cancel_where(id, None).await
    }

    /// Cancel a reminder only if it belongs to `owner_id`.
    pub async fn cancel_reminder_for_owner(
        &self,
        id: &str,
        owner_id: &str,
    ) -> Result<CancelOutcome, NudgeError> {
        self.cancel_where(id, Some(owner_id)).await
    }

    async fn cancel_where(
        &self,
        id: &str,
        owner_id: Option<&str>,
    ) -> Result<CancelOutcome, NudgeError> {
        let result = sqlx::query(
            "UPDATE reminders SET status = 'cancelled', updated_at = ? \
             WHERE id = ? AND status IN ('pending', 'sent') \
             AND (? IS NULL OR owner_id = ?)",
        )
        .bind(format_ts(Utc::now()))
        .bind(id)
        .bind(owner_id)
        .bind(owner_id)
        .execute(&self.pool)
        .await
        .map_err(|e| NudgeError::Store(format!("cancel reminder failed: {e}")))?;

        if result.rows_affected() > 0 {
            return Ok(CancelOutcome::Cancelled);
        }

        match self.get_reminder(id).await? {
            Some(r) if owner_id.map_or(true, |o| o == r.owner_id) => {
                Ok(CancelOutcome::AlreadyFinal(r.status))
            }
            _ => Ok(CancelOutcome::NotFound),
        }
    }

    /// Pending reminders due at or before `horizon`, oldest first.
    pub async fn pending_due_before(
        &self,
        horizon: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Reminder>, NudgeError> {
        let rows: Vec<ReminderRow> = sqlx::query_as(&format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders \
             WHERE status = 'pending' AND scheduled_at <= ? \
             ORDER BY scheduled_at ASC LIMIT ?"
        ))
        .bind(format_ts(horizon))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| NudgeError::Store(format!("pending due query failed: {e}")))?;

        rows.into_iter().map(Reminder::try_from).collect()
    }

    /// Pending reminders for an owner, soonest first.
    pub async fn pending_for_owner(&self, owner_id: &str) -> Result<Vec<Reminder>, NudgeError> {
        let rows: Vec<ReminderRow> = sqlx::query_as(&format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders \
             WHERE owner_id = ? AND status = 'pending' \
             ORDER BY scheduled_at ASC"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| NudgeError::Store(format!("pending for owner failed: {e}")))?;

        rows.into_iter().map(Reminder::try_from).collect()
    }

    /// All reminders for an owner in any state, newest schedule first.
    pub async fn reminders_for_owner(
        &self,
        owner_id: &str,
        limit: i64,
    ) -> Result<Vec<Reminder>, NudgeError> {
        let rows: Vec<ReminderRow> = sqlx::query_as(&format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders \
             WHERE owner_id = ? ORDER BY scheduled_at DESC LIMIT ?"
        ))
        .bind(owner_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| NudgeError::Store(format!("reminders for owner failed: {e}")))?;

        rows.into_iter().map(Reminder::try_from).collect()
    }

    /// Count reminders per status (for `status`).
    pub async fn reminder_counts(&self) -> Result<Vec<(String, i64)>, NudgeError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM reminders GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| NudgeError::Store(format!("reminder counts failed: {e}")))?;

        Ok(rows)
    }
}
