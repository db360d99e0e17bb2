//! Small helpers shared across the crate.
//!
//! - Character-budget truncation for payloads sent to the completion endpoint
//! - Log-friendly truncation of long generated texts
//! - Human duration parsing for configuration values (`"10 seconds"`, `"3m"`)
//! - Date validation and the `today` default used by the CLI and server

use crate::error::{Error, Result};
use chrono::{NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Approximate characters per token used to size content sections.
pub const CHARS_PER_TOKEN: usize = 4;

/// Keep at most `max` characters of `s`.
///
/// Counts Unicode scalar values, not bytes, so multi-byte text is never cut
/// in the middle of a character.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Truncate a string for logging purposes.
///
/// Long strings are cut to `max` characters and suffixed with the number of
/// bytes that were dropped.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    let kept = truncate_chars(s, max);
    if kept.len() == s.len() {
        s.to_string()
    } else {
        format!("{}…(+{} bytes)", kept, s.len() - kept.len())
    }
}

static DURATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(\d+)\s*(ms|millis|milliseconds?|s|secs?|seconds?|m|mins?|minutes?|h|hours?|d|days?)?\s*$",
    )
    .expect("duration pattern is valid")
});

/// Parse a human duration such as `"10 seconds"`, `"3 minutes"`, `"500ms"`
/// or `"2h"`. A bare number is read as seconds.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let caps = DURATION_RE
        .captures(input)
        .ok_or_else(|| Error::Config(format!("invalid duration: {input:?}")))?;

    let value: u64 = caps[1]
        .parse()
        .map_err(|_| Error::Config(format!("invalid duration: {input:?}")))?;
    let unit = caps
        .get(2)
        .map(|m| m.as_str().to_ascii_lowercase())
        .unwrap_or_else(|| "s".to_string());

    let secs = |per_unit: u64| {
        value
            .checked_mul(per_unit)
            .map(Duration::from_secs)
            .ok_or_else(|| Error::Config(format!("duration out of range: {input:?}")))
    };
    match unit.as_str() {
        "ms" | "millis" | "millisecond" | "milliseconds" => Ok(Duration::from_millis(value)),
        "s" | "sec" | "secs" | "second" | "seconds" => secs(1),
        "m" | "min" | "mins" | "minute" | "minutes" => secs(60),
        "h" | "hour" | "hours" => secs(3_600),
        _ => secs(86_400),
    }
}

/// Serde adapter for duration fields written as human strings in YAML.
pub fn de_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}

/// Like [`de_duration`] for optional fields.
pub fn de_opt_duration<'de, D>(deserializer: D) -> std::result::Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    raw.map(|s| parse_duration(&s).map_err(serde::de::Error::custom))
        .transpose()
}

/// Check that `date` is a calendar date in `YYYY-MM-DD` form.
pub fn validate_date(date: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|e| Error::Config(format!("invalid date {date:?}: {e}")))
}

/// Today's date in UTC as `YYYY-MM-DD`.
///
/// Only the entry points (CLI, server, scheduler) call this; the workflow
/// always receives an explicit date.
pub fn today() -> String {
    Utc::now().date_naive().format("%Y-%m-%d").to_string()
}

/// The `days` dates ending at `from`, newest first.
pub fn past_days(from: NaiveDate, days: u32) -> Vec<String> {
    (0..days)
        .filter_map(|offset| from.checked_sub_days(chrono::Days::new(offset as u64)))
        .map(|d| d.format("%Y-%m-%d").to_string())
        .collect()
}
