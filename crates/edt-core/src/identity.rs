//! Stable external ids for scheduled courses.
//!
//! Upstream ids win when present. Items without one get `gen-<hash>` over a
//! composite key that names every field distinguishing two courses in the
//! same week.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

pub const UPSTREAM_PREFIX: &str = "flopedt-";
pub const GENERATED_PREFIX: &str = "gen-";

/// Whether generated ids carry a time-based salt.
///
/// `Salted` reproduces the legacy ids (unique per run, so un-keyed items are
/// re-inserted on every sync). `Deterministic` drops the salt so re-syncing
/// the same data updates rows in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityMode {
    #[default]
    Deterministic,
    Salted,
}

impl FromStr for IdentityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deterministic" => Ok(IdentityMode::Deterministic),
            "salted" => Ok(IdentityMode::Salted),
            other => Err(format!(
                "unknown identity mode {other:?} (expected deterministic|salted)"
            )),
        }
    }
}

impl fmt::Display for IdentityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityMode::Deterministic => f.write_str("deterministic"),
            IdentityMode::Salted => f.write_str("salted"),
        }
    }
}

/// Fields that identify a course when upstream gives no id.
#[derive(Debug, Clone, Copy)]
pub struct CourseKey<'a> {
    pub upstream_id: Option<&'a str>,
    pub dept: &'a str,
    pub year: i32,
    pub week: i32,
    pub program: Option<&'a str>,
    pub day: Option<&'a str>,
    pub start: Option<i32>,
    pub end: Option<i32>,
    pub room: Option<&'a str>,
    pub module: Option<&'a str>,
    pub tutor: Option<&'a str>,
    pub groups: &'a [String],
}

pub fn compute_external_id(key: &CourseKey<'_>, mode: IdentityMode) -> String {
    if let Some(id) = key.upstream_id.map(str::trim).filter(|id| !id.is_empty() && *id != "0") {
        return format!("{UPSTREAM_PREFIX}{id}");
    }

    let hash = (rolling_hash(&composite_key(key)) as i64).abs();
    match mode {
        IdentityMode::Deterministic => format!("{GENERATED_PREFIX}{hash}"),
        IdentityMode::Salted => {
            let salt = Utc::now().timestamp_millis().rem_euclid(1_000_000);
            format!("{GENERATED_PREFIX}{hash}-{salt}")
        }
    }
}

/// `DEPT|YEAR|W<week>|PROG|DAY|SSSS-EEEE|ROOM|MODULE|TUTOR|G1-G2`, with
/// placeholders for missing parts so the key is always fully formed.
pub fn composite_key(key: &CourseKey<'_>) -> String {
    let mut groups = key.groups.to_vec();
    groups.sort();
    let groups = if groups.is_empty() {
        "NOGRP".to_string()
    } else {
        groups.join("-")
    };

    format!(
        "{}|{}|W{}|{}|{}|{:04}-{:04}|{}|{}|{}|{}",
        key.dept,
        key.year,
        key.week,
        key.program.unwrap_or("UNK"),
        key.day.unwrap_or("XX"),
        key.start.unwrap_or(0),
        key.end.unwrap_or(0),
        sanitize(key.room, "NOROOM"),
        sanitize(key.module, "NOMOD"),
        sanitize(key.tutor, "NOTUT"),
        groups,
    )
}

/// 32-bit `h = h * 31 + c` over UTF-16 code units, wrapping on overflow.
pub fn rolling_hash(input: &str) -> i32 {
    input
        .encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

fn sanitize(value: Option<&str>, placeholder: &str) -> String {
    match value.filter(|v| !v.is_empty()) {
        Some(v) => v
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect(),
        None => placeholder.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key<'a>(room: Option<&'a str>, groups: &'a [String]) -> CourseKey<'a> {
        CourseKey {
            upstream_id: None,
            dept: "INFO",
            year: 2025,
            week: 10,
            program: Some("BUT1"),
            day: Some("tu"),
            start: Some(540),
            end: Some(630),
            room,
            module: Some("Algo"),
            tutor: Some("jdoe"),
            groups,
        }
    }

    #[test]
    fn upstream_id_takes_priority() {
        let groups = vec!["1A".to_string()];
        let mut k = key(Some("B101"), &groups);
        k.upstream_id = Some("501");
        assert_eq!(compute_external_id(&k, IdentityMode::Salted), "flopedt-501");
    }

    #[test]
    fn rolling_hash_matches_reference_values() {
        assert_eq!(rolling_hash(""), 0);
        assert_eq!(rolling_hash("a"), 97);
        assert_eq!(rolling_hash("hello"), 99_162_322);
        // Wraps past i32::MAX like a 32-bit integer.
        assert_eq!(rolling_hash("hello world"), 1_794_106_052);
    }

    #[test]
    fn composite_key_is_fully_formed() {
        let groups = vec!["1B".to_string(), "1A".to_string()];
        let k = key(Some("B 101"), &groups);
        assert_eq!(
            composite_key(&k),
            "INFO|2025|W10|BUT1|tu|0540-0630|B_101|Algo|jdoe|1A-1B"
        );

        let empty = CourseKey {
            program: None,
            day: None,
            start: None,
            end: None,
            room: None,
            module: None,
            tutor: None,
            ..key(None, &[])
        };
        assert_eq!(
            composite_key(&empty),
            "INFO|2025|W10|UNK|XX|0000-0000|NOROOM|NOMOD|NOTUT|NOGRP"
        );
    }

    #[test]
    fn rooms_alone_distinguish_generated_ids() {
        let groups = vec!["1A".to_string()];
        let a = compute_external_id(&key(Some("B101"), &groups), IdentityMode::Deterministic);
        let b = compute_external_id(&key(Some("B102"), &groups), IdentityMode::Deterministic);
        assert!(a.starts_with(GENERATED_PREFIX));
        assert_ne!(a, b);
    }

    #[test]
    fn deterministic_ids_are_stable_and_salted_ids_carry_a_suffix() {
        let groups = vec!["1A".to_string()];
        let k = key(Some("B101"), &groups);
        assert_eq!(
            compute_external_id(&k, IdentityMode::Deterministic),
            compute_external_id(&k, IdentityMode::Deterministic)
        );
        let salted = compute_external_id(&k, IdentityMode::Salted);
        assert_eq!(salted.matches('-').count(), 2);
    }

    #[test]
    fn identity_mode_parses_from_cli_strings() {
        assert_eq!("Salted".parse::<IdentityMode>(), Ok(IdentityMode::Salted));
        assert!("random".parse::<IdentityMode>().is_err());
    }
}
