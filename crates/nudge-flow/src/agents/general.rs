use crate::handler::{Handler, Turn};
use async_trait::async_trait;
use nudge_core::{
    conversation::{AgentKind, Intent},
    error::NudgeError,
    message::OutgoingMessage,
};

const GREETINGS: &[&str] = &["hi", "hello", "hey", "hola", "good morning", "good evening"];
const THANKS: &[&str] = &["thanks", "thank you", "thx", "cheers"];

/// Small talk and help. Lists what the other agents can do.
pub struct GeneralAgent {
    capabilities: Vec<&'static str>,
}

impl GeneralAgent {
    pub fn new(capabilities: Vec<&'static str>) -> Self {
        Self { capabilities }
    }

    fn help(&self) -> String {
        let mut lines = vec!["Here's what I can do:".to_string()];
        lines.extend(self.capabilities.iter().map(|c| format!("- {c}")));
        lines.push("Try \"remind me to stretch in 30 minutes\".".to_string());
        lines.join("\n")
    }
}

#[async_trait]
impl Handler for GeneralAgent {
    fn agent(&self) -> AgentKind {
        AgentKind::General
    }

    fn can_handle(&self, intent: Intent) -> bool {
        intent == Intent::SmallTalk
    }

    fn describe(&self) -> &'static str {
        "chats and explains what I can do"
    }

    async fn handle(&self, turn: &mut Turn<'_>) -> Result<OutgoingMessage, NudgeError> {
        let text = turn
            .text
            .trim()
            .trim_end_matches(|c: char| matches!(c, '.' | '!' | '?'))
            .to_lowercase();
        let name = turn.owner.display_name.as_deref().unwrap_or("there");

        let reply = if THANKS.iter().any(|t| text.starts_with(t)) {
            "You're welcome!".to_string()
        } else if GREETINGS.iter().any(|g| text == *g || text.starts_with(&format!("{g} "))) {
            format!("Hi {name}! {}", self.help())
        } else {
            format!("I'm not sure what you mean. {}", self.help())
        };
        Ok(OutgoingMessage::text(reply))
    }
}
