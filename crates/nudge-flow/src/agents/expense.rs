//! Splitting a bill between a number of people.

use super::{is_no, numbers};
use crate::handler::{Handler, Turn};
use async_trait::async_trait;
use nudge_core::{
    conversation::{AgentKind, Intent},
    error::NudgeError,
    flow::{FlowData, FlowKind, SplitExpenseData},
    message::OutgoingMessage,
};
use serde_json::json;

const MAX_PARTICIPANTS: f64 = 1000.0;

#[derive(Debug, Default)]
pub struct ExpenseAgent;

impl ExpenseAgent {
    pub fn new() -> Self {
        Self
    }
}

fn as_count(n: f64) -> Option<u32> {
    (n.fract() == 0.0 && (1.0..=MAX_PARTICIPANTS).contains(&n)).then_some(n as u32)
}

#[async_trait]
impl Handler for ExpenseAgent {
    fn agent(&self) -> AgentKind {
        AgentKind::Expense
    }

    fn can_handle(&self, intent: Intent) -> bool {
        intent == Intent::SplitExpense
    }

    fn describe(&self) -> &'static str {
        "splits a bill evenly between people"
    }

    async fn handle(&self, turn: &mut Turn<'_>) -> Result<OutgoingMessage, NudgeError> {
        let existing = match turn.session.flow_data() {
            Some(FlowData::SplitExpense(data)) => Some(data.clone()),
            _ => None,
        };
        let mut data = match existing {
            Some(data) => {
                if is_no(turn.text) {
                    turn.session.complete_flow();
                    return Ok(OutgoingMessage::text("Okay, forget the split."));
                }
                data
            }
            None => {
                turn.session.start_flow(FlowKind::SplitExpense, json!({}))?;
                SplitExpenseData::default()
            }
        };

        // The first number fills whichever field is still missing, in order.
        let mut found = numbers(turn.text).into_iter();
        if data.amount.is_none() {
            if let Some(amount) = found.next().filter(|n| *n > 0.0) {
                turn.session.update_flow_data(json!({ "amount": amount }))?;
                data.amount = Some(amount);
            }
        }
        if data.amount.is_some() && data.participant_count.is_none() {
            if let Some(count) = found.next().and_then(as_count) {
                turn.session
                    .update_flow_data(json!({ "participantCount": count }))?;
                data.participant_count = Some(count);
            }
        }

        let reply = match (data.amount, data.participant_count) {
            (None, _) => "How much was the total?".to_string(),
            (Some(amount), None) => {
                format!("Splitting {amount:.2}. How many people, including you?")
            }
            (Some(amount), Some(count)) => {
                turn.session.complete_flow();
                let share = amount / f64::from(count);
                format!("{amount:.2} split {count} ways is {share:.2} each.")
            }
        };
        Ok(OutgoingMessage::text(reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_count() {
        assert_eq!(as_count(3.0), Some(3));
        assert_eq!(as_count(2.5), None);
        assert_eq!(as_count(0.0), None);
        assert_eq!(as_count(-2.0), None);
    }
}
