//! Small parser for the time phrases people put in reminder requests.
//!
//! Recognized, case-insensitively, anywhere in the text:
//! - `in 10 minutes`, `in 2 hours`, `in a day`
//! - `at 17:30`, `at 5pm`, `at 9:15am` (today, or tomorrow once passed)
//! - `tomorrow`, `tomorrow at 8`, `tomorrow 8am`
//! - `2026-03-01 09:00`
//!
//! Wall-clock times are read in the owner's fixed offset.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use std::ops::Range;

/// Hour used for a bare `tomorrow`.
const DEFAULT_HOUR: u32 = 9;

/// A resolved time phrase and where it sat in the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct When {
    pub at: DateTime<Utc>,
    /// Byte range of the phrase in the input.
    pub span: Range<usize>,
}

struct Token<'a> {
    text: &'a str,
    span: Range<usize>,
}

fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                push_token(&mut tokens, text, s, i);
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        push_token(&mut tokens, text, s, text.len());
    }
    tokens
}

fn push_token<'a>(tokens: &mut Vec<Token<'a>>, text: &'a str, start: usize, end: usize) {
    let raw = &text[start..end];
    let trimmed = raw.trim_end_matches(|c: char| matches!(c, ',' | '.' | '!' | '?' | ';'));
    if !trimmed.is_empty() {
        tokens.push(Token {
            text: trimmed,
            span: start..start + trimmed.len(),
        });
    }
}

/// Find the first time phrase in `text`.
pub fn parse(text: &str, now: DateTime<Utc>, offset: FixedOffset) -> Option<When> {
    let lower = text.to_ascii_lowercase();
    let tokens = tokenize(&lower);
    let word = |i: usize| tokens.get(i).map(|t| t.text);
    let local_today = now.with_timezone(&offset).date_naive();

    for i in 0..tokens.len() {
        let found = match tokens[i].text {
            "in" => relative(word(i + 1), word(i + 2))
                .and_then(|d| now.checked_add_signed(d))
                .map(|at| (at, i + 2)),
            "tomorrow" => {
                let date = local_today.succ_opt()?;
                match clock_after(&tokens, i + 1) {
                    Some((time, last)) => Some((local(offset, date, time)?, last)),
                    None => {
                        let time = NaiveTime::from_hms_opt(DEFAULT_HOUR, 0, 0)?;
                        Some((local(offset, date, time)?, i))
                    }
                }
            }
            "at" => clock_at(&tokens, i + 1).and_then(|(time, last)| {
                let today = local(offset, local_today, time)?;
                let at = if today <= now {
                    local(offset, local_today.succ_opt()?, time)?
                } else {
                    today
                };
                Some((at, last))
            }),
            candidate => NaiveDate::parse_from_str(candidate, "%Y-%m-%d")
                .ok()
                .and_then(|date| {
                    let time = word(i + 1).and_then(parse_clock)?;
                    Some((local(offset, date, time)?, i + 1))
                }),
        };

        if let Some((at, last)) = found {
            let span = tokens[i].span.start..tokens[last].span.end;
            return Some(When { at, span });
        }
    }
    None
}

/// Remove the phrase at `when.span` from `text`, collapsing whitespace.
pub fn strip(text: &str, when: &When) -> String {
    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..when.span.start]);
    out.push(' ');
    out.push_str(&text[when.span.end..]);
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn relative(amount: Option<&str>, unit: Option<&str>) -> Option<Duration> {
    let n: i64 = match amount? {
        "a" | "an" | "one" => 1,
        n => n.parse().ok().filter(|n| *n > 0)?,
    };
    let d = match unit? {
        "min" | "mins" | "minute" | "minutes" => Duration::try_minutes(n),
        "h" | "hr" | "hrs" | "hour" | "hours" => Duration::try_hours(n),
        "day" | "days" => Duration::try_days(n),
        "week" | "weeks" => Duration::try_weeks(n),
        _ => None,
    }?;
    Some(d)
}

/// `at` followed by a clock, where a bare hour (`at 8`) is allowed.
fn clock_at(tokens: &[Token<'_>], i: usize) -> Option<(NaiveTime, usize)> {
    clock_after(tokens, i).or_else(|| {
        let hour: u32 = tokens.get(i)?.text.parse().ok()?;
        Some((NaiveTime::from_hms_opt(hour, 0, 0)?, i))
    })
}

/// A clock at `tokens[i]`, optionally introduced by `at`, optionally followed
/// by a separate `am`/`pm`.
fn clock_after(tokens: &[Token<'_>], mut i: usize) -> Option<(NaiveTime, usize)> {
    if tokens.get(i).map(|t| t.text) == Some("at") {
        return clock_at(tokens, i + 1);
    }
    let first = tokens.get(i)?.text;
    if let Some(suffix) = tokens.get(i + 1).map(|t| t.text) {
        if matches!(suffix, "am" | "pm") {
            let time = parse_clock(&format!("{first}{suffix}"))?;
            i += 1;
            return Some((time, i));
        }
    }
    parse_clock(first).map(|t| (t, i))
}

/// `17:30`, `5pm`, `5:30pm`, `12am`. A bare number is not a clock.
fn parse_clock(text: &str) -> Option<NaiveTime> {
    let (body, meridiem) = if let Some(b) = text.strip_suffix("am") {
        (b, Some(false))
    } else if let Some(b) = text.strip_suffix("pm") {
        (b, Some(true))
    } else {
        (text, None)
    };

    let (hour, minute) = match body.split_once(':') {
        Some((h, m)) if m.len() == 2 => (h.parse::<u32>().ok()?, m.parse::<u32>().ok()?),
        Some(_) => return None,
        None if meridiem.is_some() => (body.parse::<u32>().ok()?, 0),
        None => return None,
    };

    let hour = match meridiem {
        Some(pm) => {
            if !(1..=12).contains(&hour) {
                return None;
            }
            match (hour, pm) {
                (12, false) => 0,
                (12, true) => 12,
                (h, true) => h + 12,
                (h, false) => h,
            }
        }
        None => hour,
    };
    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn local(offset: FixedOffset, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    offset
        .from_local_datetime(&date.and_time(time))
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        // Monday 2026-03-02 10:00 UTC
        Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap()
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn test_relative_phrases() {
        let w = parse("remind me to call mom in 2 hours", now(), utc()).unwrap();
        assert_eq!(w.at, now() + Duration::hours(2));
        assert_eq!(
            &"remind me to call mom in 2 hours"[w.span.clone()],
            "in 2 hours"
        );

        let w = parse("stretch in a minute!", now(), utc()).unwrap();
        assert_eq!(w.at, now() + Duration::minutes(1));
        assert_eq!(parse("in 3 days", now(), utc()).unwrap().at, now() + Duration::days(3));
    }

    #[test]
    fn test_at_clock_today_or_tomorrow() {
        let later = parse("at 17:30", now(), utc()).unwrap();
        assert_eq!(later.at, Utc.with_ymd_and_hms(2026, 3, 2, 17, 30, 0).unwrap());

        let passed = parse("at 9am", now(), utc()).unwrap();
        assert_eq!(passed.at, Utc.with_ymd_and_hms(2026, 3, 3, 9, 0, 0).unwrap());

        let spaced = parse("at 5 pm", now(), utc()).unwrap();
        assert_eq!(spaced.at, Utc.with_ymd_and_hms(2026, 3, 2, 17, 0, 0).unwrap());

        let bare = parse("at 23", now(), utc()).unwrap();
        assert_eq!(bare.at, Utc.with_ymd_and_hms(2026, 3, 2, 23, 0, 0).unwrap());
    }

    #[test]
    fn test_tomorrow() {
        let w = parse("pay rent tomorrow at 8", now(), utc()).unwrap();
        assert_eq!(w.at, Utc.with_ymd_and_hms(2026, 3, 3, 8, 0, 0).unwrap());
        assert_eq!(strip("pay rent tomorrow at 8", &w), "pay rent");

        let bare = parse("Tomorrow", now(), utc()).unwrap();
        assert_eq!(bare.at, Utc.with_ymd_and_hms(2026, 3, 3, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_absolute_date() {
        let w = parse("dentist 2026-04-01 14:15", now(), utc()).unwrap();
        assert_eq!(w.at, Utc.with_ymd_and_hms(2026, 4, 1, 14, 15, 0).unwrap());
    }

    #[test]
    fn test_owner_offset_applies_to_wall_clock() {
        // 17:00 at UTC+2 is 15:00 UTC.
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        let w = parse("at 17:00", now(), plus_two).unwrap();
        assert_eq!(w.at, Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap());

        // Relative phrases ignore the offset.
        let w = parse("in 5 minutes", now(), plus_two).unwrap();
        assert_eq!(w.at, now() + Duration::minutes(5));
    }

    #[test]
    fn test_no_time_phrase() {
        assert!(parse("call mom", now(), utc()).is_none());
        assert!(parse("in the morning", now(), utc()).is_none());
        assert!(parse("at home", now(), utc()).is_none());
        assert!(parse("at 25:00", now(), utc()).is_none());
    }

    #[test]
    fn test_out_of_range_relative_is_not_a_time() {
        assert!(parse("remind me in 99999999999 days", now(), utc()).is_none());
        assert!(parse("water plants in 9999999999 weeks", now(), utc()).is_none());
        assert!(parse("in 9223372036854775807 minutes", now(), utc()).is_none());
    }

    #[test]
    fn test_clock_formats() {
        assert_eq!(parse_clock("12am"), NaiveTime::from_hms_opt(0, 0, 0));
        assert_eq!(parse_clock("12pm"), NaiveTime::from_hms_opt(12, 0, 0));
        assert_eq!(parse_clock("5:30pm"), NaiveTime::from_hms_opt(17, 30, 0));
        assert_eq!(parse_clock("7:5"), None);
        assert_eq!(parse_clock("13pm"), None);
        assert_eq!(parse_clock("8"), None);
    }
}
