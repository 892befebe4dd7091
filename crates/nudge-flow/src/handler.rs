use crate::session::FlowSession;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nudge_core::{
    conversation::{AgentKind, Intent},
    error::NudgeError,
    message::OutgoingMessage,
    owner::Owner,
};

/// Everything a handler sees for one inbound message.
pub struct Turn<'a> {
    /// The sender. Handlers that change the owner record update this copy too.
    pub owner: Owner,
    pub text: &'a str,
    /// Classified intent; `None` when the message continued a flow or went to
    /// setup without classification.
    pub intent: Option<Intent>,
    pub now: DateTime<Utc>,
    pub session: FlowSession<'a>,
}

/// A logical agent that can own a user's conversation.
#[async_trait]
pub trait Handler: Send + Sync {
    fn agent(&self) -> AgentKind;

    /// Whether this agent serves `intent` when no flow is active.
    fn can_handle(&self, intent: Intent) -> bool;

    /// One-line summary for help text.
    fn describe(&self) -> &'static str;

    async fn handle(&self, turn: &mut Turn<'_>) -> Result<OutgoingMessage, NudgeError>;
}
