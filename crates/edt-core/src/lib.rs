//! Core domain model for the timetable sync: upstream wire shapes, day/time
//! normalization and course identity.

pub mod day;
pub mod error;
pub mod identity;
pub mod item;
pub mod model;
pub mod time;

pub use day::{normalize_day, Day, NormalizedDay};
pub use error::ParseError;
pub use identity::{compute_external_id, composite_key, rolling_hash, CourseKey, IdentityMode};
pub use item::{
    CourseItem, GroupNode, RawCourse, RawGroup, RawModule, RawScheduledCourse, TimeSlot,
    TransversalGroup, TutorProfile,
};
pub use model::{CourseRecord, GroupRef, ModuleRef, ProgramAssignment, ProgramSource};
pub use time::{minutes_of, parse_instant, parse_minutes, TimeValue, DEFAULT_COURSE_DURATION_MIN};

pub const CRATE_NAME: &str = "edt-core";
