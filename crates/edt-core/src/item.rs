//! Upstream wire shapes and the validated [`CourseItem`] built from them.
//!
//! The scheduling API is loosely typed: ids come as numbers or strings, rooms
//! and tutors as plain strings or small objects, times in several encodings.
//! `Raw*` types mirror the JSON with every field optional; [`CourseItem`] is
//! the single place where those shapes are interpreted.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::day::{normalize_day, Day};
use crate::error::ParseError;
use crate::model::{GroupRef, ModuleRef};
use crate::time::{parse_instant, parse_minutes, TimeValue};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawScheduledCourse {
    #[serde(default)]
    pub id: Option<JsonValue>,
    #[serde(default)]
    pub day: Option<JsonValue>,
    #[serde(default)]
    pub start_time: Option<JsonValue>,
    #[serde(default)]
    pub end_time: Option<JsonValue>,
    #[serde(default)]
    pub duration: Option<JsonValue>,
    #[serde(default)]
    pub room: Option<JsonValue>,
    #[serde(default)]
    pub course: Option<RawCourse>,
    #[serde(default)]
    pub tutor: Option<JsonValue>,
    #[serde(default)]
    pub group_ids: Option<Vec<JsonValue>>,
    #[serde(default)]
    pub groups: Option<Vec<JsonValue>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCourse {
    #[serde(rename = "type", default)]
    pub course_type: Option<JsonValue>,
    #[serde(default)]
    pub module: Option<RawModule>,
    #[serde(default)]
    pub groups: Option<Vec<RawGroup>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawModule {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub abbrev: Option<String>,
    #[serde(default)]
    pub display: Option<RawDisplay>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDisplay {
    #[serde(default)]
    pub color_bg: Option<String>,
    #[serde(default)]
    pub color_txt: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawGroup {
    #[serde(default)]
    pub id: Option<JsonValue>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub train_prog: Option<String>,
}

/// Node of `groups/structural/tree/`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupNode {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub children: Option<Vec<GroupNode>>,
}

impl GroupNode {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn children(&self) -> &[GroupNode] {
        self.children.as_deref().unwrap_or(&[])
    }
}

/// Entry of `groups/transversal/`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransversalGroup {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub conflicting_groups: Option<Vec<JsonValue>>,
}

impl TransversalGroup {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// Names of the conflicting groups; entries are `{name}` objects or bare strings.
    pub fn conflict_names(&self) -> Vec<String> {
        self.conflicting_groups
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .filter_map(|g| match g {
                JsonValue::String(s) => non_empty(s),
                JsonValue::Object(map) => {
                    map.get("name").and_then(JsonValue::as_str).and_then(non_empty)
                }
                _ => None,
            })
            .collect()
    }
}

/// Entry of `user/tutor/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TutorProfile {
    pub username: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub departments: Option<Vec<JsonValue>>,
}

/// A scheduled course as fetched, with every optional field interpreted once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CourseItem {
    /// Upstream primary key; `None` when absent, empty or zero.
    pub upstream_id: Option<String>,
    /// Training program of the query that returned this item.
    pub fetched_program: Option<String>,
    pub day: Option<String>,
    pub start: Option<TimeValue>,
    pub end: Option<TimeValue>,
    pub duration: Option<i32>,
    pub room: Option<String>,
    pub module: Option<ModuleRef>,
    pub course_type: Option<String>,
    pub tutor: Option<String>,
    pub groups: Vec<GroupRef>,
    pub group_ids: Vec<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSlot {
    pub day: Day,
    pub start: i32,
    pub end: i32,
}

impl CourseItem {
    pub fn from_raw(raw: RawScheduledCourse, fetched_program: Option<&str>) -> Self {
        let course = raw.course.unwrap_or_default();

        let module = course.module.and_then(|m| {
            let name = m.name.as_deref().and_then(non_empty);
            let abbrev = m.abbrev.as_deref().and_then(non_empty);
            let display = m.display.unwrap_or_default();
            name.or_else(|| abbrev.clone()).map(|name| ModuleRef {
                name,
                abbrev: abbrev.unwrap_or_default(),
                color_bg: display.color_bg.as_deref().and_then(non_empty),
                color_txt: display.color_txt.as_deref().and_then(non_empty),
            })
        });

        let groups = course
            .groups
            .unwrap_or_default()
            .into_iter()
            .filter_map(|g| {
                let name = g.name.as_deref().and_then(non_empty)?;
                Some(GroupRef {
                    name,
                    train_prog: g.train_prog.as_deref().and_then(non_empty),
                })
            })
            .collect();

        let group_ids = raw
            .group_ids
            .or(raw.groups)
            .unwrap_or_default()
            .iter()
            .filter_map(group_id_of)
            .collect();

        Self {
            upstream_id: raw.id.as_ref().and_then(upstream_id_of),
            fetched_program: fetched_program.and_then(non_empty),
            day: raw.day.as_ref().and_then(scalar_text),
            start: raw.start_time.as_ref().and_then(TimeValue::from_json),
            end: raw.end_time.as_ref().and_then(TimeValue::from_json),
            duration: raw.duration.as_ref().and_then(minutes_value),
            room: raw.room.as_ref().and_then(|v| named_text(v, &["name"])),
            module,
            course_type: course.course_type.as_ref().and_then(|v| named_text(v, &["name"])),
            tutor: raw.tutor.as_ref().and_then(|v| named_text(v, &["username", "name"])),
            groups,
            group_ids,
        }
    }

    /// Identifier used in log lines.
    pub fn label(&self) -> &str {
        self.upstream_id.as_deref().unwrap_or("unknown")
    }

    /// Directly attached group names, de-duplicated, in upstream order.
    pub fn group_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.groups
            .iter()
            .filter(|g| seen.insert(g.name.as_str()))
            .map(|g| g.name.clone())
            .collect()
    }

    /// Resolve the canonical day and `[start, end)` minutes of this course.
    ///
    /// The end falls back to `start + duration` (the item's own duration, else
    /// `default_duration`) when missing or unparseable.
    pub fn resolve_slot(&self, default_duration: i32) -> Result<TimeSlot, ParseError> {
        let start =
            parse_minutes(self.start.as_ref(), false, None, 0).ok_or(ParseError::MissingStart)?;
        let duration = self.duration.unwrap_or(default_duration);
        let end = parse_minutes(self.end.as_ref(), true, Some(start), duration)
            .or_else(|| start.checked_add(duration))
            .ok_or(ParseError::MissingEnd)?;

        let day = match self.day.as_deref() {
            Some(token) => match normalize_day(token).day() {
                Some(day) => day,
                None => return Err(ParseError::UnknownDay(token.trim().to_lowercase())),
            },
            None => self
                .day_from_start()
                .ok_or_else(|| ParseError::UnknownDay(String::new()))?,
        };

        if start >= end {
            return Err(ParseError::EmptySpan { start, end });
        }
        Ok(TimeSlot { day, start, end })
    }

    /// Weekday of the start instant, only when the start carries a real date.
    fn day_from_start(&self) -> Option<Day> {
        let start = self.start.as_ref()?;
        if matches!(start, TimeValue::Number(_)) {
            return None;
        }
        let instant = parse_instant(start)?;
        if instant.timestamp() < 86_400 && instant.timestamp() >= 0 {
            return None;
        }
        Some(Day::from_weekday(chrono::Datelike::weekday(&instant)))
    }
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn scalar_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => non_empty(s),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A plain string, or the first non-empty string under one of `keys`.
fn named_text(value: &JsonValue, keys: &[&str]) -> Option<String> {
    match value {
        JsonValue::String(s) => non_empty(s),
        JsonValue::Object(map) => keys
            .iter()
            .filter_map(|k| map.get(*k))
            .find_map(|v| v.as_str().and_then(non_empty)),
        _ => None,
    }
}

fn upstream_id_of(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Number(n) => {
            if n.as_f64() == Some(0.0) {
                None
            } else {
                Some(n.to_string())
            }
        }
        JsonValue::String(s) => non_empty(s).filter(|s| s != "0"),
        _ => None,
    }
}

fn group_id_of(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::Object(map) => map
            .get("id")
            .or_else(|| map.get("group_id"))
            .and_then(JsonValue::as_i64),
        _ => None,
    }
}

fn minutes_value(value: &JsonValue) -> Option<i32> {
    match value {
        JsonValue::Number(n) => n
            .as_f64()
            .filter(|f| f.is_finite() && *f >= 0.0 && *f <= i32::MAX as f64)
            .map(|f| f.trunc() as i32),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(value: JsonValue, program: Option<&str>) -> CourseItem {
        let raw: RawScheduledCourse = serde_json::from_value(value).expect("raw item");
        CourseItem::from_raw(raw, program)
    }

    #[test]
    fn full_item_is_interpreted_once() {
        let it = item(
            json!({
                "id": 501,
                "day": "tu",
                "start_time": 540,
                "end_time": 630,
                "room": {"name": "B101"},
                "course": {
                    "type": "CM",
                    "module": {
                        "name": "Algo",
                        "abbrev": "ALG",
                        "display": {"color_bg": "#fff", "color_txt": "#000"}
                    },
                    "groups": [
                        {"name": "1A", "train_prog": "BUT1"},
                        {"name": "1A", "train_prog": "BUT1"}
                    ]
                },
                "tutor": "jdoe"
            }),
            Some("BUT1"),
        );

        assert_eq!(it.upstream_id.as_deref(), Some("501"));
        assert_eq!(it.fetched_program.as_deref(), Some("BUT1"));
        assert_eq!(it.room.as_deref(), Some("B101"));
        assert_eq!(it.tutor.as_deref(), Some("jdoe"));
        assert_eq!(it.course_type.as_deref(), Some("CM"));
        let module = it.module.clone().expect("module");
        assert_eq!((module.name.as_str(), module.abbrev.as_str()), ("Algo", "ALG"));
        assert_eq!(module.color_bg.as_deref(), Some("#fff"));
        assert_eq!(it.group_names(), vec!["1A".to_string()]);

        let slot = it.resolve_slot(90).expect("slot");
        assert_eq!(slot, TimeSlot { day: Day::Tuesday, start: 540, end: 630 });
    }

    #[test]
    fn zero_or_blank_ids_are_not_upstream_ids() {
        assert_eq!(item(json!({"id": 0}), None).upstream_id, None);
        assert_eq!(item(json!({"id": ""}), None).upstream_id, None);
        assert_eq!(item(json!({"id": "0"}), None).upstream_id, None);
        assert_eq!(item(json!({"id": null}), None).upstream_id, None);
        assert_eq!(item(json!({"id": "abc"}), None).upstream_id.as_deref(), Some("abc"));
    }

    #[test]
    fn rooms_tutors_and_group_ids_accept_both_shapes() {
        let it = item(
            json!({
                "room": "B101-B102",
                "tutor": {"username": "asmith"},
                "groups": [12, {"id": 13}, {"group_id": 14}, "x"]
            }),
            None,
        );
        assert_eq!(it.room.as_deref(), Some("B101-B102"));
        assert_eq!(it.tutor.as_deref(), Some("asmith"));
        assert_eq!(it.group_ids, vec![12, 13, 14]);
    }

    #[test]
    fn equal_start_and_end_is_rejected() {
        let it = item(json!({"day": "mo", "start_time": 600, "end_time": 600}), None);
        assert_eq!(it.resolve_slot(90), Err(ParseError::EmptySpan { start: 600, end: 600 }));
    }

    #[test]
    fn missing_end_uses_item_duration_then_default() {
        let with_duration = item(json!({"day": "mo", "start_time": 600, "duration": 120}), None);
        assert_eq!(with_duration.resolve_slot(90).expect("slot").end, 720);

        let without = item(json!({"day": "mo", "start_time": 600}), None);
        assert_eq!(without.resolve_slot(90).expect("slot").end, 690);
    }

    #[test]
    fn unknown_day_and_missing_start_are_rejected() {
        let bad_day = item(json!({"day": "xx", "start_time": 600, "end_time": 660}), None);
        assert_eq!(bad_day.resolve_slot(90), Err(ParseError::UnknownDay("xx".into())));

        let no_start = item(json!({"day": "mo", "end_time": 660}), None);
        assert_eq!(no_start.resolve_slot(90), Err(ParseError::MissingStart));
    }

    #[test]
    fn day_is_derived_from_a_dated_start() {
        let it = item(
            json!({"start_time": "2025-01-08T09:00:00Z", "end_time": "2025-01-08T10:30:00Z"}),
            None,
        );
        let slot = it.resolve_slot(90).expect("slot");
        assert_eq!(slot, TimeSlot { day: Day::Wednesday, start: 540, end: 630 });

        let undated = item(json!({"start_time": "09:00"}), None);
        assert_eq!(undated.resolve_slot(90), Err(ParseError::UnknownDay(String::new())));
    }

    #[test]
    fn transversal_conflicts_accept_objects_and_strings() {
        let group: TransversalGroup = serde_json::from_value(json!({
            "id": 7,
            "name": "OPT-IA",
            "conflicting_groups": [{"name": "2A"}, "2B", {"id": 3}]
        }))
        .expect("transversal");
        assert_eq!(group.conflict_names(), vec!["2A".to_string(), "2B".to_string()]);
    }
}
