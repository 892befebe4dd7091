use crate::{
    conversation::{ConversationMessage, Intent},
    error::NotifyError,
};
use async_trait::async_trait;

/// Receipt returned by a successful send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Id assigned by the downstream, used to correlate delivery receipts.
    pub external_message_id: String,
}

/// Outbound notification transport.
///
/// Implementations classify failures so the queue knows whether to retry.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Human-readable notifier name.
    fn name(&self) -> &str;

    /// Send `text` to `destination_address`.
    async fn send(&self, destination_address: &str, text: &str) -> Result<Delivery, NotifyError>;
}

/// Intent classifier consulted when no flow is active.
#[async_trait]
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    /// Decide what `message` asks for, given the most recent log entries
    /// (oldest first).
    async fn classify(&self, message: &str, recent_history: &[ConversationMessage]) -> Intent;
}
