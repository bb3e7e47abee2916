use thiserror::Error;

/// Why a fetched course item could not be turned into a timetable slot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unrecognized day token {0:?}")]
    UnknownDay(String),
    #[error("missing or unparseable start time")]
    MissingStart,
    #[error("missing or unparseable end time")]
    MissingEnd,
    #[error("empty course span: start {start} >= end {end}")]
    EmptySpan { start: i32, end: i32 },
}
