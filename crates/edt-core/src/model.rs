//! Normalized records handed from the sync pipeline to the store.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::day::Day;

/// Module reference as found on a course; colors only matter on first insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRef {
    pub name: String,
    /// Empty when upstream sends no abbreviation; part of the natural key.
    pub abbrev: String,
    pub color_bg: Option<String>,
    pub color_txt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupRef {
    pub name: String,
    pub train_prog: Option<String>,
}

/// How a course's training program was determined, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramSource {
    /// The program of the fetch call that returned the item.
    Fetched,
    /// The `train_prog` field of the first attached group.
    GroupField,
    /// The first group name was listed in that program's group tree.
    Directory,
    /// Guessed from digits in the group name.
    Inferred,
    Unknown,
}

impl ProgramSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ProgramSource::Fetched => "fetched",
            ProgramSource::GroupField => "group_field",
            ProgramSource::Directory => "directory",
            ProgramSource::Inferred => "inferred",
            ProgramSource::Unknown => "unknown",
        }
    }

    /// True when the program came from upstream data rather than a guess.
    pub fn is_known(self) -> bool {
        matches!(
            self,
            ProgramSource::Fetched | ProgramSource::GroupField | ProgramSource::Directory
        )
    }
}

impl fmt::Display for ProgramSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramAssignment {
    pub program: Option<String>,
    pub source: ProgramSource,
}

impl ProgramAssignment {
    pub fn unknown() -> Self {
        Self {
            program: None,
            source: ProgramSource::Unknown,
        }
    }
}

/// One `scheduled_courses` row, ready for upsert on `external_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseRecord {
    pub external_id: String,
    pub dept: String,
    pub train_prog: Option<String>,
    pub program_source: ProgramSource,
    pub year: i32,
    pub week: i32,
    pub week_id: i64,
    pub day: Day,
    pub start_time: i32,
    pub end_time: i32,
    pub course_type: Option<String>,
    pub module_id: Option<i64>,
    pub room_id: Option<i64>,
    pub tutor_id: Option<i64>,
}
