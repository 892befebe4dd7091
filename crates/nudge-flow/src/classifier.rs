//! Keyword-based intent classifier.

use crate::when;
use async_trait::async_trait;
use chrono::{Offset, Utc};
use nudge_core::{
    conversation::{ConversationMessage, Direction, Intent},
    traits::Classifier,
};

const LIST_WORDS: &[&str] = &["list", "show", "what are", "upcoming", "my reminders"];
const CANCEL_WORDS: &[&str] = &["cancel", "delete", "remove", "forget"];
const EXPENSE_WORDS: &[&str] = &["split", "expense", "bill", "owe", "share the cost"];
const REPEAT_WORDS: &[&str] = &["another", "again", "one more"];

/// Matches a fixed keyword list. When nothing matches, a message that asks
/// for "another"/"again" repeats the last classified intent in the history,
/// and a message containing a time phrase is taken as a reminder request.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordClassifier;

/// Phrases match as substrings, single keywords only as whole words.
fn contains_any(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| {
        if w.contains(' ') {
            text.contains(w)
        } else {
            text.split(|c: char| !c.is_alphanumeric()).any(|t| t == *w)
        }
    })
}

#[async_trait]
impl Classifier for KeywordClassifier {
    fn name(&self) -> &str {
        "keywords"
    }

    async fn classify(&self, message: &str, recent_history: &[ConversationMessage]) -> Intent {
        let text = message.to_lowercase();

        if text.contains("remind") {
            if contains_any(&text, CANCEL_WORDS) {
                return Intent::CancelReminder;
            }
            if contains_any(&text, LIST_WORDS) {
                return Intent::ListReminders;
            }
            return Intent::CreateReminder;
        }
        if contains_any(&text, EXPENSE_WORDS) {
            return Intent::SplitExpense;
        }

        if contains_any(&text, REPEAT_WORDS) {
            let previous = recent_history
                .iter()
                .rev()
                .filter(|m| m.direction == Direction::Inbound)
                .find_map(|m| m.detected_intent.as_deref().and_then(parse_intent));
            if let Some(intent) = previous {
                return intent;
            }
        }

        if when::parse(message, Utc::now(), Utc.fix()).is_some() {
            return Intent::CreateReminder;
        }
        Intent::SmallTalk
    }
}

fn parse_intent(name: &str) -> Option<Intent> {
    match name {
        "create_reminder" => Some(Intent::CreateReminder),
        "list_reminders" => Some(Intent::ListReminders),
        "cancel_reminder" => Some(Intent::CancelReminder),
        "split_expense" => Some(Intent::SplitExpense),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn classify(text: &str) -> Intent {
        KeywordClassifier.classify(text, &[]).await
    }

    #[tokio::test]
    async fn test_reminder_intents() {
        assert_eq!(
            classify("Remind me to call mom in 2 hours").await,
            Intent::CreateReminder
        );
        assert_eq!(classify("show my reminders").await, Intent::ListReminders);
        assert_eq!(
            classify("cancel my dentist reminder").await,
            Intent::CancelReminder
        );
    }

    #[tokio::test]
    async fn test_expense_and_small_talk() {
        assert_eq!(classify("let's split the bill").await, Intent::SplitExpense);
        assert_eq!(classify("hello there").await, Intent::SmallTalk);
    }

    #[tokio::test]
    async fn test_keywords_match_whole_words() {
        assert_eq!(classify("more power to you").await, Intent::SmallTalk);
    }

    #[tokio::test]
    async fn test_time_phrase_means_reminder() {
        assert_eq!(classify("water plants at 18:00").await, Intent::CreateReminder);
    }

    #[tokio::test]
    async fn test_out_of_range_phrase_is_small_talk() {
        assert_eq!(
            classify("water plants in 9999999999 weeks").await,
            Intent::SmallTalk
        );
    }

    #[tokio::test]
    async fn test_repeat_uses_history() {
        let history = vec![
            ConversationMessage::inbound("u1", "split 30 between 3").with_intent("split_expense"),
            ConversationMessage::outbound("u1", "Each owes 10.00"),
        ];
        let intent = KeywordClassifier.classify("and another one", &history).await;
        assert_eq!(intent, Intent::SplitExpense);

        let intent = KeywordClassifier.classify("and another one", &[]).await;
        assert_eq!(intent, Intent::SmallTalk);
    }
}
