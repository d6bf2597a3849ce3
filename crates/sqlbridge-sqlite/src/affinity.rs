//! Value affinity detection for text columns.
//!
//! SQLite stores booleans, timestamps and JSON as text. When affinity
//! conversion is enabled the codec uses these predicates to turn such text
//! back into typed values.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use sqlbridge_core::Value;
use std::sync::OnceLock;

const ISO8601_PATTERN: &str =
    r"^\d{4}-\d{2}-\d{2}(?:T\d{2}:\d{2}:\d{2}(?:\.\d{1,3})?(?:Z|[+-]\d{2}:\d{2})?)?$";

fn iso8601_regex() -> Option<&'static Regex> {
    static REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    REGEX
        .get_or_init(|| match Regex::new(ISO8601_PATTERN) {
            Ok(regex) => Some(regex),
            Err(e) => {
                tracing::warn!(error = %e, "invalid ISO-8601 pattern, timestamp detection disabled");
                None
            }
        })
        .as_ref()
}

/// Exactly `"true"` or `"false"`.
pub fn is_string_boolean(s: &str) -> bool {
    s == "true" || s == "false"
}

/// Has the shape of an ISO-8601 date or date-time.
///
/// Only the shape is checked; `2024-13-45` matches.
pub fn is_string_iso8601(s: &str) -> bool {
    iso8601_regex().is_some_and(|re| re.is_match(s))
}

/// Looks like a JSON object or array.
pub fn is_string_json(s: &str) -> bool {
    let t = s.trim();
    (t.starts_with('{') && t.ends_with('}')) || (t.starts_with('[') && t.ends_with(']'))
}

/// Parse JSON, falling back to the original text.
pub fn safe_parse(s: &str) -> Value {
    match serde_json::from_str::<serde_json::Value>(s) {
        Ok(json) => Value::Json(json),
        Err(_) => Value::Text(s.to_string()),
    }
}

/// Parse an ISO-8601 string already known to have the right shape.
///
/// A bare date is midnight UTC and a date-time without an offset is read as
/// UTC. Returns `None` when the fields do not form a real date.
pub fn parse_iso8601(s: &str) -> Option<DateTime<Utc>> {
    if s.len() == 10 {
        let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    if s.ends_with('Z') || has_offset(s) {
        return DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn has_offset(s: &str) -> bool {
    // "+hh:mm" or "-hh:mm" at the end, after the time part
    s.len() > 19 && matches!(s.as_bytes()[s.len() - 6], b'+' | b'-')
}

/// Decode text according to its apparent affinity.
///
/// Checked in order: boolean, ISO-8601 timestamp, JSON. Anything else, and
/// any timestamp that fails to parse, stays text.
pub fn decode_text(s: String) -> Value {
    if is_string_boolean(&s) {
        return Value::Bool(s == "true");
    }
    if is_string_iso8601(&s) {
        return match parse_iso8601(&s) {
            Some(ts) => Value::Timestamp(ts),
            None => Value::Text(s),
        };
    }
    if is_string_json(&s) {
        return safe_parse(&s);
    }
    Value::Text(s)
}
