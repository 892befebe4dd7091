//! Rendering for the administrative CLI commands.

#[cfg(test)]
mod tests;

use nudge_core::{
    conversation::ConversationState,
    owner::Owner,
    reminder::{Reminder, ReminderStatus},
};
use nudge_scheduler::queue::{DeadLetter, QueueStats};
use nudge_store::CancelOutcome;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M UTC";

pub fn format_status(counts: &[(String, i64)], stats: &QueueStats) -> String {
    let mut lines = vec!["Reminders:".to_string()];
    if counts.is_empty() {
        lines.push("  (none)".to_string());
    }
    for (status, n) in counts {
        lines.push(format!("  {status:<10} {n}"));
    }
    lines.push(String::new());
    lines.push("Queue:".to_string());
    lines.push(format!("  {:<10} {}", "waiting", stats.waiting));
    lines.push(format!("  {:<10} {}", "active", stats.active));
    lines.push(format!("  {:<10} {}", "dead", stats.failed));
    lines.join("\n")
}

pub fn format_cancel(id: &str, outcome: CancelOutcome) -> String {
    match outcome {
        CancelOutcome::Cancelled => format!("Reminder {id} cancelled."),
        CancelOutcome::AlreadyFinal(status) => {
            format!("Reminder {id} is already {status}; nothing to cancel.")
        }
        CancelOutcome::NotFound => format!("No reminder with id {id}."),
    }
}

pub fn format_reminders(owner_id: &str, owner: Option<&Owner>, reminders: &[Reminder]) -> String {
    let header = match owner {
        Some(o) => format!(
            "{} ({owner_id}, UTC{:+}m){}",
            o.display_name.as_deref().unwrap_or("unnamed"),
            o.utc_offset_minutes,
            if o.setup_complete { "" } else { " [setup pending]" }
        ),
        None => format!("{owner_id} (unknown owner)"),
    };
    if reminders.is_empty() {
        return format!("{header}\n  no reminders");
    }

    let mut lines = vec![header];
    for r in reminders {
        let mut line = format!(
            "  {} {:<9} {} {}",
            r.id,
            r.status.as_str(),
            r.scheduled_at.format(TIME_FORMAT),
            r.text
        );
        match r.status {
            ReminderStatus::Failed => {
                let reason = r.failure_reason.as_deref().unwrap_or("unknown failure");
                line.push_str(&format!(" (failed: {reason})"));
            }
            ReminderStatus::Sent | ReminderStatus::Delivered => {
                if let Some(ext) = &r.external_message_id {
                    line.push_str(&format!(" [msg {ext}]"));
                }
            }
            ReminderStatus::Pending | ReminderStatus::Cancelled => {}
        }
        lines.push(line);
    }
    lines.join("\n")
}

pub fn format_flow(state: &ConversationState) -> String {
    let mut lines = vec![
        format!("Owner:   {}", state.owner_id()),
        format!(
            "Agent:   {}",
            state.current_agent().map_or("none", |a| a.as_str())
        ),
        format!(
            "Flow:    {}",
            state.active_flow().map_or("none", |f| f.as_str())
        ),
    ];
    if let Some(data) = state.flow_data() {
        let rendered = data
            .to_value()
            .map(|v| v.to_string())
            .unwrap_or_else(|e| format!("<unrenderable: {e}>"));
        lines.push(format!("Data:    {rendered}"));
    }
    lines.push(format!("Version: {}", state.version()));
    if state.version() > 0 {
        lines.push(format!(
            "Updated: {}",
            state.last_updated().format(TIME_FORMAT)
        ));
    }
    lines.join("\n")
}

pub fn format_dead(letters: &[DeadLetter]) -> String {
    if letters.is_empty() {
        return "No dead tasks.".to_string();
    }
    let mut lines = vec![format!("{} dead task(s):", letters.len())];
    for d in letters {
        lines.push(format!(
            "  {} owner={} attempts={} at {}: {}",
            d.key,
            d.payload.owner_id,
            d.attempts,
            d.failed_at.format(TIME_FORMAT),
            d.last_error.as_deref().unwrap_or("no error recorded")
        ));
    }
    lines.join("\n")
}
