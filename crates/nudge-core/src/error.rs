use thiserror::Error;

/// Top-level error type for Nudge.
#[derive(Debug, Error)]
pub enum NudgeError {
    /// Error from the relational store (reminders, owners, conversation state).
    #[error("store error: {0}")]
    Store(String),

    /// Error from the delayed task queue.
    #[error("queue error: {0}")]
    Queue(String),

    /// Error from the outbound notifier.
    #[error("notifier error: {0}")]
    Notifier(#[from] NotifyError),

    /// Conversation flow integrity error.
    #[error("flow error: {0}")]
    Flow(#[from] FlowError),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure reported by a [`Notifier`](crate::traits::Notifier).
///
/// The classification decides whether the queue retries the send.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    /// Network failure, downstream 5xx, rate limiting, or timeout.
    #[error("retryable: {0}")]
    Retryable(String),

    /// The downstream explicitly rejected the message.
    #[error("terminal: {0}")]
    Terminal(String),
}

impl NotifyError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    /// The reason text without the classification prefix.
    pub fn reason(&self) -> &str {
        match self {
            Self::Retryable(r) | Self::Terminal(r) => r,
        }
    }
}

/// Violations of the per-user flow state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    /// `start_flow` was called while another flow is still active.
    #[error("flow '{active}' is already active for {owner_id}")]
    FlowAlreadyActive { owner_id: String, active: String },

    /// A flow cannot start before a handler owns the user.
    #[error("no agent assigned to {owner_id}")]
    NoAgentAssigned { owner_id: String },

    /// Accumulated data does not fit the flow's schema.
    #[error("invalid data for flow '{flow}': {reason}")]
    InvalidFlowData { flow: String, reason: String },

    /// The persisted state changed since it was read.
    #[error("conversation state for {owner_id} changed concurrently")]
    StaleState { owner_id: String },

    /// Unknown agent or flow name read back from storage.
    #[error("unknown {what} '{name}'")]
    Unknown { what: &'static str, name: String },
}
