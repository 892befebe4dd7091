//! Append-only conversation log.

use super::Store;
use crate::timestamp::{format_ts, parse_ts};
use nudge_core::{conversation::ConversationMessage, error::NudgeError};
use tracing::debug;

#[derive(sqlx::FromRow)]
struct MessageRow {
    owner_id: String,
    direction: String,
    text: String,
    timestamp: String,
    detected_intent: Option<String>,
    related_reminder_id: Option<String>,
    extracted_data: Option<String>,
}

impl TryFrom<MessageRow> for ConversationMessage {
    type Error = NudgeError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(ConversationMessage {
            direction: row.direction.parse().map_err(NudgeError::Store)?,
            timestamp: parse_ts(&row.timestamp)?,
            extracted_data: row
                .extracted_data
                .as_deref()
                .map(serde_json::from_str::<serde_json::Value>)
                .transpose()?,
            owner_id: row.owner_id,
            text: row.text,
            detected_intent: row.detected_intent,
            related_reminder_id: row.related_reminder_id,
        })
    }
}

const MESSAGE_COLUMNS: &str = "owner_id, direction, text, timestamp, detected_intent, \
     related_reminder_id, extracted_data";

impl Store {
    /// Append one entry to the conversation log.
    pub async fn append_message(&self, message: &ConversationMessage) -> Result<(), NudgeError> {
        let extracted = message
            .extracted_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            "INSERT INTO conversation_messages \
             (owner_id, direction, text, timestamp, detected_intent, related_reminder_id, extracted_data) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.owner_id)
        .bind(message.direction.as_str())
        .bind(&message.text)
        .bind(format_ts(message.timestamp))
        .bind(&message.detected_intent)
        .bind(&message.related_reminder_id)
        .bind(&extracted)
        .execute(&self.pool)
        .await
        .map_err(|e| NudgeError::Store(format!("append message failed: {e}")))?;

        debug!(
            "log: {} {} {}",
            message.owner_id,
            message.direction.as_str(),
            truncate(&message.text, 80)
        );
        Ok(())
    }

    /// The `limit` most recent entries for an owner, oldest first.
    pub async fn recent_messages(
        &self,
        owner_id: &str,
        limit: i64,
    ) -> Result<Vec<ConversationMessage>, NudgeError> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM ( \
                 SELECT * FROM conversation_messages WHERE owner_id = ? \
                 ORDER BY id DESC LIMIT ? \
             ) ORDER BY id ASC"
        ))
        .bind(owner_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| NudgeError::Store(format!("recent messages failed: {e}")))?;

        rows.into_iter().map(ConversationMessage::try_from).collect()
    }

    /// Every log entry correlated with a reminder, oldest first.
    pub async fn messages_for_reminder(
        &self,
        reminder_id: &str,
    ) -> Result<Vec<ConversationMessage>, NudgeError> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM conversation_messages \
             WHERE related_reminder_id = ? ORDER BY id ASC"
        ))
        .bind(reminder_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| NudgeError::Store(format!("messages for reminder failed: {e}")))?;

        rows.into_iter().map(ConversationMessage::try_from).collect()
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
