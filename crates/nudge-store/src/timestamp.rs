//! Fixed-width UTC timestamp text used in every table.
//!
//! `YYYY-MM-DD HH:MM:SS.mmm` sorts lexicographically in time order, so range
//! predicates can compare columns as plain text.

use chrono::{DateTime, NaiveDateTime, Utc};
use nudge_core::error::NudgeError;

const FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

pub fn format_ts(at: DateTime<Utc>) -> String {
    at.format(FORMAT).to_string()
}

pub fn parse_ts(text: &str) -> Result<DateTime<Utc>, NudgeError> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| NudgeError::Store(format!("bad timestamp '{text}': {e}")))
}

pub fn parse_opt_ts(text: Option<&str>) -> Result<Option<DateTime<Utc>>, NudgeError> {
    text.map(parse_ts).transpose()
}
