//! One-time onboarding: learn the owner's name and UTC offset.

use crate::handler::{Handler, Turn};
use async_trait::async_trait;
use nudge_core::{
    conversation::{AgentKind, Intent},
    error::NudgeError,
    flow::{FlowData, FlowKind},
    message::OutgoingMessage,
};
use nudge_store::Store;
use serde_json::json;
use tracing::info;

pub struct SetupAgent {
    store: Store,
}

impl SetupAgent {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Handler for SetupAgent {
    fn agent(&self) -> AgentKind {
        AgentKind::Setup
    }

    fn can_handle(&self, _intent: Intent) -> bool {
        false
    }

    fn describe(&self) -> &'static str {
        "gets you set up with a name and time zone"
    }

    async fn handle(&self, turn: &mut Turn<'_>) -> Result<OutgoingMessage, NudgeError> {
        if turn.owner.setup_complete {
            turn.session.switch_agent(AgentKind::Reminder, None)?;
            return Ok(OutgoingMessage::text("You're already set up."));
        }

        let existing = match turn.session.flow_data() {
            Some(FlowData::Setup(data)) => Some(data.clone()),
            _ => None,
        };
        let Some(data) = existing else {
            turn.session
                .switch_agent(AgentKind::Setup, Some((FlowKind::Setup, json!({}))))?;
            return Ok(OutgoingMessage::text(
                "Hi! I'm Nudge. I'll send you reminders right here. What should I call you?",
            ));
        };

        let Some(name) = data.name else {
            let name = turn.text.trim();
            if name.is_empty() {
                return Ok(OutgoingMessage::text("What should I call you?"));
            }
            turn.session.update_flow_data(json!({ "name": name }))?;
            return Ok(OutgoingMessage::text(format!(
                "Nice to meet you, {name}. What's your UTC offset? (e.g. +2, -5, +5:30 or 0)"
            )));
        };

        let Some(offset) = parse_utc_offset(turn.text) else {
            return Ok(OutgoingMessage::text(
                "I couldn't read that offset. Try something like +2, -5, +5:30 or 0.",
            ));
        };
        self.store
            .complete_setup(&turn.owner.id, &name, offset)
            .await?;
        turn.owner.display_name = Some(name.clone());
        turn.owner.utc_offset_minutes = offset;
        turn.owner.setup_complete = true;
        turn.session.switch_agent(AgentKind::Reminder, None)?;
        info!("flow: {} finished setup (offset {offset}m)", turn.owner.id);

        Ok(OutgoingMessage::text(format!(
            "All set, {name}! Try \"remind me to call mom in 2 hours\"."
        )))
    }
}

/// `+2`, `-5`, `+5:30`, `0`, `utc+1`, `GMT-3` to minutes east of UTC.
pub fn parse_utc_offset(text: &str) -> Option<i32> {
    let lower = text.trim().to_lowercase();
    let body = lower
        .strip_prefix("utc")
        .or_else(|| lower.strip_prefix("gmt"))
        .map(str::trim)
        .unwrap_or(&lower);
    if body.is_empty() {
        return (lower != body).then_some(0);
    }

    let (sign, rest) = match body.chars().next()? {
        '+' => (1, &body[1..]),
        '-' => (-1, &body[1..]),
        _ => (1, body),
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h.parse::<i32>().ok()?, m.parse::<i32>().ok()?),
        None => (rest.parse::<i32>().ok()?, 0),
    };
    if !(0..60).contains(&minutes) || hours < 0 {
        return None;
    }
    let total = sign * (hours * 60 + minutes);
    (-720..=840).contains(&total).then_some(total)
}
