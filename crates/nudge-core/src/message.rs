use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An inbound message from a user, already authenticated by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub id: Uuid,
    /// Stable user id (owner of reminders and conversation state).
    pub sender_id: String,
    /// Human-readable sender name, if the transport provides one.
    pub sender_name: Option<String>,
    /// Address replies and notifications are delivered to.
    pub reply_target: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl IncomingMessage {
    pub fn new(sender_id: &str, reply_target: &str, text: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender_id: sender_id.to_string(),
            sender_name: None,
            reply_target: reply_target.to_string(),
            text: text.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// A reply produced by a handler for the message it processed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub text: String,
    pub metadata: MessageMetadata,
}

/// How a reply was produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Agent that handled the message.
    pub agent: String,
    /// Intent detected for the inbound message, if classification ran.
    pub detected_intent: Option<String>,
    /// Reminder created, listed, or cancelled by this exchange.
    pub related_reminder_id: Option<String>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: MessageMetadata::default(),
        }
    }

    pub fn with_reminder(mut self, reminder_id: &str) -> Self {
        self.metadata.related_reminder_id = Some(reminder_id.to_string());
        self
    }
}
