use super::*;
use chrono::{TimeZone, Utc};
use nudge_core::{
    conversation::AgentKind,
    flow::{FlowData, FlowKind},
    reminder::ReminderTask,
};
use serde_json::json;
use std::collections::BTreeMap;

fn reminder(id: &str, status: ReminderStatus) -> Reminder {
    let at = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();
    Reminder {
        id: id.into(),
        owner_id: "u1".into(),
        text: "call mom".into(),
        scheduled_at: at,
        status,
        sent_at: None,
        delivered_at: None,
        failure_reason: None,
        external_message_id: None,
        metadata: BTreeMap::new(),
        created_at: at,
    }
}

#[test]
fn test_format_status() {
    let counts = vec![("pending".to_string(), 3), ("sent".to_string(), 1)];
    let stats = QueueStats {
        waiting: 2,
        active: 1,
        failed: 4,
    };
    let out = format_status(&counts, &stats);
    assert!(out.contains("pending    3"));
    assert!(out.contains("waiting    2"));
    assert!(out.contains("dead       4"));
}

#[test]
fn test_format_cancel() {
    assert_eq!(
        format_cancel("r1", CancelOutcome::Cancelled),
        "Reminder r1 cancelled."
    );
    assert!(format_cancel("r1", CancelOutcome::AlreadyFinal(ReminderStatus::Delivered))
        .contains("already delivered"));
    assert_eq!(
        format_cancel("r9", CancelOutcome::NotFound),
        "No reminder with id r9."
    );
}

#[test]
fn test_format_reminders_shows_failure_reason() {
    let mut failed = reminder("r2", ReminderStatus::Failed);
    failed.failure_reason = Some("gave up after 3 attempts: 503".into());
    let mut sent = reminder("r3", ReminderStatus::Sent);
    sent.external_message_id = Some("wamid.1".into());

    let out = format_reminders("u1", None, &[reminder("r1", ReminderStatus::Pending), failed, sent]);
    assert!(out.starts_with("u1 (unknown owner)"));
    assert!(out.contains("r1 pending   2026-03-02 10:00 UTC call mom"));
    assert!(out.contains("(failed: gave up after 3 attempts: 503)"));
    assert!(out.contains("[msg wamid.1]"));
}

#[test]
fn test_format_reminders_empty() {
    let owner = Owner {
        id: "u1".into(),
        destination_address: "1555".into(),
        display_name: Some("Ana".into()),
        utc_offset_minutes: 120,
        setup_complete: true,
    };
    assert_eq!(
        format_reminders("u1", Some(&owner), &[]),
        "Ana (u1, UTC+120m)\n  no reminders"
    );
}

#[test]
fn test_format_flow() {
    let data = FlowData::from_parts(FlowKind::SplitExpense, json!({"amount": 500})).unwrap();
    let at = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();
    let state =
        ConversationState::restore("u1".into(), Some(AgentKind::Expense), Some(data), 4, at)
            .unwrap();
    let out = format_flow(&state);
    assert!(out.contains("Agent:   expense"));
    assert!(out.contains("Flow:    split_expense"));
    assert!(out.contains(r#"Data:    {"amount":500.0}"#));
    assert!(out.contains("Version: 4"));

    let fresh = format_flow(&ConversationState::new("u2"));
    assert!(fresh.contains("Agent:   none"));
    assert!(!fresh.contains("Updated"));
}

#[test]
fn test_format_dead() {
    assert_eq!(format_dead(&[]), "No dead tasks.");
    let letter = DeadLetter {
        key: "r1".into(),
        payload: ReminderTask {
            reminder_id: "r1".into(),
            owner_id: "u1".into(),
            destination_address: "1555".into(),
            text: "call mom".into(),
        },
        attempts: 3,
        last_error: Some("whatsapp 503".into()),
        failed_at: Utc.with_ymd_and_hms(2026, 3, 2, 10, 5, 0).unwrap(),
    };
    let out = format_dead(&[letter]);
    assert!(out.contains("r1 owner=u1 attempts=3 at 2026-03-02 10:05 UTC: whatsapp 503"));
}
