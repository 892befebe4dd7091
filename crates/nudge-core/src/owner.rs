use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

/// An end user who owns reminders and a conversation state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub id: String,
    /// Transport address notifications are sent to (e.g. a WhatsApp number).
    pub destination_address: String,
    pub display_name: Option<String>,
    /// Offset from UTC used to interpret and render wall-clock times.
    pub utc_offset_minutes: i32,
    /// Whether the one-time setup exchange has finished.
    pub setup_complete: bool,
}

impl Owner {
    /// The owner's fixed offset, falling back to UTC for out-of-range values.
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or(Utc.fix())
    }

    /// Render an instant in the owner's local time.
    pub fn local_time(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.offset())
            .format("%a %d %b %H:%M")
            .to_string()
    }
}
