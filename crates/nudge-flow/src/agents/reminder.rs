//! Creating, listing, and cancelling reminders.

use super::{is_no, is_yes, numbers};
use crate::handler::{Handler, Turn};
use crate::when::{self, When};
use async_trait::async_trait;
use nudge_core::{
    conversation::{AgentKind, Intent},
    error::NudgeError,
    flow::{CancelReminderData, CreateReminderData, FlowData, FlowKind},
    message::OutgoingMessage,
    reminder::{NewReminder, ReminderStatus},
};
use nudge_scheduler::ReminderScheduler;
use nudge_store::CancelOutcome;
use std::collections::BTreeMap;

const SUBJECT_PREFIXES: &[&str] = &[
    "please ",
    "remind me to ",
    "remind me about ",
    "remind me ",
    "reminder to ",
    "reminder: ",
    "reminder ",
    "to ",
];

const ASK_TIME: &str = "When should I remind you? (e.g. in 2 hours, at 17:30, tomorrow at 9)";

/// Recent non-pending reminders shown by "list".
const RECENT_LIMIT: i64 = 10;

pub struct ReminderAgent {
    scheduler: ReminderScheduler,
}

impl ReminderAgent {
    pub fn new(scheduler: ReminderScheduler) -> Self {
        Self { scheduler }
    }

    async fn begin_create(&self, turn: &mut Turn<'_>) -> Result<OutgoingMessage, NudgeError> {
        let found = when::parse(turn.text, turn.now, turn.owner.offset());
        let subject = extract_subject(turn.text, found.as_ref());
        let data = CreateReminderData {
            text: (!subject.is_empty()).then_some(subject),
            scheduled_at: found.map(|w| w.at),
            original_text: Some(turn.text.trim().to_string()),
            confirming: false,
        };
        turn.session
            .start_flow(FlowKind::CreateReminder, serde_json::to_value(&data)?)?;
        self.advance(turn, data)
    }

    async fn continue_create(
        &self,
        turn: &mut Turn<'_>,
        mut data: CreateReminderData,
    ) -> Result<OutgoingMessage, NudgeError> {
        let found = when::parse(turn.text, turn.now, turn.owner.offset());

        if data.confirming {
            if is_yes(turn.text) {
                return self.create(turn, data).await;
            }
            if is_no(turn.text) {
                turn.session.complete_flow();
                return Ok(OutgoingMessage::text("Okay, I won't set that reminder."));
            }
            return match found {
                Some(w) => {
                    data.scheduled_at = Some(w.at);
                    self.advance(turn, data)
                }
                None => Ok(OutgoingMessage::text("Please answer yes or no.")),
            };
        }

        if data.text.is_none() {
            let subject = extract_subject(turn.text, found.as_ref());
            if !subject.is_empty() {
                data.text = Some(subject);
            }
        }
        if let Some(w) = found {
            data.scheduled_at = Some(w.at);
        } else if data.text.is_some() && data.scheduled_at.is_none() {
            turn.session
                .set_flow_data(FlowData::CreateReminder(data))?;
            return Ok(OutgoingMessage::text(format!("I didn't catch a time. {ASK_TIME}")));
        }
        self.advance(turn, data)
    }

    /// Ask for whatever is still missing, or for confirmation.
    fn advance(
        &self,
        turn: &mut Turn<'_>,
        mut data: CreateReminderData,
    ) -> Result<OutgoingMessage, NudgeError> {
        let reply = match (&data.text, data.scheduled_at) {
            (None, _) => "What should I remind you about?".to_string(),
            (Some(_), None) => ASK_TIME.to_string(),
            (Some(_), Some(at)) if at <= turn.now => {
                data.scheduled_at = None;
                format!("That time has already passed. {ASK_TIME}")
            }
            (Some(text), Some(at)) => {
                data.confirming = true;
                format!(
                    "Remind you to \"{text}\" on {}? (yes/no)",
                    turn.owner.local_time(at)
                )
            }
        };
        turn.session
            .set_flow_data(FlowData::CreateReminder(data))?;
        Ok(OutgoingMessage::text(reply))
    }

    async fn create(
        &self,
        turn: &mut Turn<'_>,
        data: CreateReminderData,
    ) -> Result<OutgoingMessage, NudgeError> {
        let (Some(text), Some(scheduled_at)) = (data.text, data.scheduled_at) else {
            turn.session.complete_flow();
            return Ok(OutgoingMessage::text(
                "Something was missing from that reminder. Let's start over.",
            ));
        };
        if scheduled_at <= turn.now {
            turn.session.set_flow_data(FlowData::CreateReminder(CreateReminderData {
                text: Some(text),
                scheduled_at: None,
                original_text: data.original_text,
                confirming: false,
            }))?;
            return Ok(OutgoingMessage::text(format!(
                "That time has already passed. {ASK_TIME}"
            )));
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("source".to_string(), "chat".to_string());
        if let Some(original) = data.original_text {
            metadata.insert("original_text".to_string(), original);
        }
        let reminder = self
            .scheduler
            .create(
                &turn.owner,
                NewReminder {
                    owner_id: turn.owner.id.clone(),
                    text,
                    scheduled_at,
                    metadata,
                },
            )
            .await?;
        turn.session.complete_flow();

        Ok(OutgoingMessage::text(format!(
            "Done! I'll remind you to \"{}\" on {}.",
            reminder.text,
            turn.owner.local_time(reminder.scheduled_at)
        ))
        .with_reminder(&reminder.id))
    }

    async fn list(&self, turn: &Turn<'_>) -> Result<OutgoingMessage, NudgeError> {
        let store = self.scheduler.store();
        let upcoming = store.pending_for_owner(&turn.owner.id).await?;
        let recent: Vec<_> = store
            .reminders_for_owner(&turn.owner.id, RECENT_LIMIT)
            .await?
            .into_iter()
            .filter(|r| r.status != ReminderStatus::Pending)
            .collect();

        if upcoming.is_empty() && recent.is_empty() {
            return Ok(OutgoingMessage::text("You have no reminders yet."));
        }

        let mut lines = Vec::new();
        if upcoming.is_empty() {
            lines.push("Nothing upcoming.".to_string());
        } else {
            lines.push("Upcoming:".to_string());
            for (i, r) in upcoming.iter().enumerate() {
                lines.push(format!(
                    "{}. {} ({})",
                    i + 1,
                    r.text,
                    turn.owner.local_time(r.scheduled_at)
                ));
            }
        }
        if !recent.is_empty() {
            lines.push(String::new());
            lines.push("Recent:".to_string());
            for r in &recent {
                let detail = match (&r.status, &r.failure_reason) {
                    (ReminderStatus::Failed, Some(reason)) => format!("failed, {reason}"),
                    (status, _) => status.to_string(),
                };
                lines.push(format!("- {} ({detail})", r.text));
            }
        }
        Ok(OutgoingMessage::text(lines.join("\n")))
    }

    async fn begin_cancel(&self, turn: &mut Turn<'_>) -> Result<OutgoingMessage, NudgeError> {
        let upcoming = self
            .scheduler
            .store()
            .pending_for_owner(&turn.owner.id)
            .await?;
        if upcoming.is_empty() {
            return Ok(OutgoingMessage::text(
                "You have no upcoming reminders to cancel.",
            ));
        }

        let data = CancelReminderData {
            candidates: upcoming.iter().map(|r| r.id.clone()).collect(),
        };
        turn.session
            .start_flow(FlowKind::CancelReminder, serde_json::to_value(&data)?)?;

        let mut lines = vec!["Which one should I cancel?".to_string()];
        for (i, r) in upcoming.iter().enumerate() {
            lines.push(format!(
                "{}. {} ({})",
                i + 1,
                r.text,
                turn.owner.local_time(r.scheduled_at)
            ));
        }
        lines.push("Reply with the number, or \"no\" to keep them all.".to_string());
        Ok(OutgoingMessage::text(lines.join("\n")))
    }

    async fn continue_cancel(
        &self,
        turn: &mut Turn<'_>,
        data: CancelReminderData,
    ) -> Result<OutgoingMessage, NudgeError> {
        if is_no(turn.text) {
            turn.session.complete_flow();
            return Ok(OutgoingMessage::text("Okay, nothing cancelled."));
        }

        let count = data.candidates.len();
        let picked = numbers(turn.text)
            .first()
            .filter(|n| n.fract() == 0.0 && **n >= 1.0 && **n <= count as f64)
            .map(|n| *n as usize - 1)
            .and_then(|i| data.candidates.get(i));
        let Some(id) = picked else {
            return Ok(OutgoingMessage::text(format!(
                "Please reply with a number between 1 and {count}, or \"no\"."
            )));
        };

        let text = self
            .scheduler
            .store()
            .get_reminder(id)
            .await?
            .map(|r| r.text)
            .unwrap_or_default();
        let outcome = self.scheduler.cancel(id, Some(turn.owner.id.as_str())).await?;
        turn.session.complete_flow();

        let reply = match outcome {
            CancelOutcome::Cancelled => {
                OutgoingMessage::text(format!("Cancelled \"{text}\".")).with_reminder(id)
            }
            CancelOutcome::AlreadyFinal(status) => {
                OutgoingMessage::text(format!("That reminder was already {status}."))
                    .with_reminder(id)
            }
            CancelOutcome::NotFound => OutgoingMessage::text("I couldn't find that reminder."),
        };
        Ok(reply)
    }
}

#[async_trait]
impl Handler for ReminderAgent {
    fn agent(&self) -> AgentKind {
        AgentKind::Reminder
    }

    fn can_handle(&self, intent: Intent) -> bool {
        matches!(
            intent,
            Intent::CreateReminder | Intent::ListReminders | Intent::CancelReminder
        )
    }

    fn describe(&self) -> &'static str {
        "sets, lists, and cancels reminders"
    }

    async fn handle(&self, turn: &mut Turn<'_>) -> Result<OutgoingMessage, NudgeError> {
        match turn.session.flow_data().cloned() {
            Some(FlowData::CreateReminder(data)) => self.continue_create(turn, data).await,
            Some(FlowData::CancelReminder(data)) => self.continue_cancel(turn, data).await,
            _ => match turn.intent {
                Some(Intent::ListReminders) => self.list(turn).await,
                Some(Intent::CancelReminder) => self.begin_cancel(turn).await,
                _ => self.begin_create(turn).await,
            },
        }
    }
}

/// What the reminder is about: the message minus the time phrase and the
/// leading "remind me to".
fn extract_subject(text: &str, found: Option<&When>) -> String {
    let mut subject = match found {
        Some(w) => when::strip(text, w),
        None => text.split_whitespace().collect::<Vec<_>>().join(" "),
    };
    loop {
        let before = subject.len();
        for prefix in SUBJECT_PREFIXES {
            if subject
                .get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
            {
                subject = subject[prefix.len()..].to_string();
            }
        }
        if subject.len() == before {
            break;
        }
    }
    subject
        .trim()
        .trim_end_matches(|c: char| matches!(c, '.' | '!' | '?' | ','))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_extract_subject() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();
        let utc = chrono::FixedOffset::east_opt(0).unwrap();
        let text = "Remind me to call mom in 2 hours";
        let found = when::parse(text, now, utc);
        assert_eq!(extract_subject(text, found.as_ref()), "call mom");

        let text = "please remind me tomorrow to pay rent!";
        let found = when::parse(text, now, utc);
        assert_eq!(extract_subject(text, found.as_ref()), "pay rent");

        assert_eq!(extract_subject("remind me", None), "");
        assert_eq!(extract_subject("water the plants", None), "water the plants");
    }
}
