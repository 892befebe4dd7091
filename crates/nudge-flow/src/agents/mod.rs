//! The agents a conversation can be handed to.

pub mod expense;
pub mod general;
pub mod reminder;
pub mod setup;

pub use expense::ExpenseAgent;
pub use general::GeneralAgent;
pub use reminder::ReminderAgent;
pub use setup::SetupAgent;

/// `yes`, `y`, `ok`, `sure`...
pub(crate) fn is_yes(text: &str) -> bool {
    matches!(
        normalize(text).as_str(),
        "yes" | "y" | "yeah" | "yep" | "ok" | "okay" | "sure" | "confirm"
    )
}

pub(crate) fn is_no(text: &str) -> bool {
    matches!(normalize(text).as_str(), "no" | "n" | "nope" | "nah")
}

fn normalize(text: &str) -> String {
    text.trim()
        .trim_end_matches(|c: char| matches!(c, '.' | '!' | '?'))
        .to_lowercase()
}

/// Numbers in `text`, ignoring currency signs and thousands separators.
pub(crate) fn numbers(text: &str) -> Vec<f64> {
    text.split_whitespace()
        .filter_map(|word| {
            let cleaned: String = word
                .trim_matches(|c: char| !c.is_ascii_digit() && c != '.' && c != '-')
                .chars()
                .filter(|c| *c != ',')
                .collect();
            cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
        })
        .collect()
}
