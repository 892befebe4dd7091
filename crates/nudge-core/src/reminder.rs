//! Reminder records and their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::NudgeError;

/// Lifecycle status of a reminder.
///
/// `pending → sent → delivered`, `pending → failed`, and
/// `pending | sent → cancelled`. `delivered`, `failed` and `cancelled` are
/// terminal. A reminder left at `sent` forever is acceptable when no delivery
/// confirmation ever arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
    Cancelled,
}

impl ReminderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed | Self::Cancelled)
    }

    /// Whether `self → next` is a legal lifecycle transition.
    pub fn can_transition_to(&self, next: ReminderStatus) -> bool {
        use ReminderStatus::*;
        matches!(
            (self, next),
            (Pending, Sent)
                | (Sent, Delivered)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Sent, Cancelled)
        )
    }

    /// Source states from which `next` may be entered.
    pub fn sources_of(next: ReminderStatus) -> &'static [ReminderStatus] {
        use ReminderStatus::*;
        match next {
            Sent | Failed => &[Pending],
            Delivered => &[Sent],
            Cancelled => &[Pending, Sent],
            Pending => &[],
        }
    }
}

impl fmt::Display for ReminderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReminderStatus {
    type Err = NudgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(NudgeError::Store(format!("unknown reminder status: {other}"))),
        }
    }
}

/// A persisted request to notify one owner at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    /// Also the task queue's dedup key.
    pub id: String,
    pub owner_id: String,
    pub text: String,
    pub scheduled_at: DateTime<Utc>,
    pub status: ReminderStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub external_message_id: Option<String>,
    /// Original request text and parse provenance.
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when a reminder is first created.
#[derive(Debug, Clone, Default)]
pub struct NewReminder {
    pub owner_id: String,
    pub text: String,
    pub scheduled_at: DateTime<Utc>,
    pub metadata: BTreeMap<String, String>,
}

/// Payload carried by a queued task. The queue key is `reminder_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderTask {
    pub reminder_id: String,
    pub owner_id: String,
    pub destination_address: String,
    pub text: String,
}

impl ReminderTask {
    pub fn new(reminder: &Reminder, destination_address: &str) -> Self {
        Self {
            reminder_id: reminder.id.clone(),
            owner_id: reminder.owner_id.clone(),
            destination_address: destination_address.to_string(),
            text: reminder.text.clone(),
        }
    }

    /// Text handed to the notifier.
    pub fn render(&self) -> String {
        format!("⏰ Reminder: {}", self.text)
    }
}
