//! Time-of-day parsing for upstream course slots.
//!
//! Upstream sends start/end either as minutes from midnight (the normal case)
//! or, on older endpoints, as date/time strings or small objects wrapping one.
//! Everything is reduced to integer minutes since midnight, UTC.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use serde_json::Value as JsonValue;

/// Duration substituted when an item carries neither an end time nor a
/// duration. Overridable through `EDT_DEFAULT_DURATION_MIN`.
pub const DEFAULT_COURSE_DURATION_MIN: i32 = 90;

/// Keys tried, in order, when a time arrives as an object.
const NESTED_KEYS: [&str; 7] = ["iso", "start", "begin", "date", "datetime", "value", "text"];

#[derive(Debug, Clone, PartialEq)]
pub enum TimeValue {
    Number(f64),
    Text(String),
    Nested(Vec<TimeValue>),
}

impl TimeValue {
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Number(n) => n.as_f64().map(TimeValue::Number),
            JsonValue::String(s) if !s.trim().is_empty() => Some(TimeValue::Text(s.clone())),
            JsonValue::Object(map) => {
                let candidates = NESTED_KEYS
                    .iter()
                    .filter_map(|key| map.get(*key))
                    .filter_map(TimeValue::from_json)
                    .collect::<Vec<_>>();
                if candidates.is_empty() {
                    None
                } else {
                    Some(TimeValue::Nested(candidates))
                }
            }
            _ => None,
        }
    }
}

/// Minutes since midnight for `value`.
///
/// A bare number is already minutes and is used as-is. Strings and nested
/// objects go through [`parse_instant`]. When `value` is absent and this is an
/// end time, `start_minutes + duration` is returned instead.
pub fn parse_minutes(
    value: Option<&TimeValue>,
    is_end_time: bool,
    start_minutes: Option<i32>,
    duration: i32,
) -> Option<i32> {
    let Some(value) = value else {
        return match (is_end_time, start_minutes) {
            (true, Some(start)) => start.checked_add(duration),
            _ => None,
        };
    };

    match value {
        TimeValue::Number(n) => {
            if !n.is_finite() || *n < i32::MIN as f64 || *n > i32::MAX as f64 {
                return None;
            }
            Some(n.trunc() as i32)
        }
        other => parse_instant(other).map(minutes_of),
    }
}

pub fn minutes_of(instant: DateTime<Utc>) -> i32 {
    (instant.hour() * 60 + instant.minute()) as i32
}

/// Interpret `value` as a UTC instant. Numbers are epoch milliseconds here.
pub fn parse_instant(value: &TimeValue) -> Option<DateTime<Utc>> {
    match value {
        TimeValue::Number(n) if n.is_finite() => Utc.timestamp_millis_opt(*n as i64).single(),
        TimeValue::Number(_) => None,
        TimeValue::Text(s) => parse_datetime_str(s),
        TimeValue::Nested(candidates) => candidates.iter().find_map(parse_instant),
    }
}

fn parse_datetime_str(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    let iso = iso_with_t_separator(s);
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%dT%H:%M:%S%z", "%Y-%m-%dT%H:%M%z"] {
        if let Ok(dt) = DateTime::parse_from_str(&iso, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    // No offset means UTC.
    let naive = iso.trim_end_matches(['Z', 'z']);
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, fmt) {
            return Some(Utc.from_utc_datetime(&dt));
        }
    }

    for fmt in ["%H:%M:%S", "%H:%M"] {
        if let Ok(time) = NaiveTime::parse_from_str(s, fmt) {
            let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
            return Some(Utc.from_utc_datetime(&epoch.and_time(time)));
        }
    }

    for fmt in [
        "%d/%m/%Y %H:%M:%S",
        "%d/%m/%Y %H:%M",
        "%d/%m/%YT%H:%M:%S",
        "%d/%m/%YT%H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&dt));
        }
    }

    None
}

/// `2025-03-04 09:00` -> `2025-03-04T09:00`; other shapes are returned untouched.
fn iso_with_t_separator(s: &str) -> String {
    let bytes = s.as_bytes();
    if bytes.len() > 10 && bytes[4] == b'-' && bytes[7] == b'-' && bytes[10] == b' ' {
        let mut out = s.to_string();
        out.replace_range(10..11, "T");
        out
    } else {
        s.to_string()
    }
}
