//! Timetable synchronization: department registry and run options, group
//! hierarchy, program classification, week reconciliation and the run
//! pipeline with its optional cron scheduler.

mod config;
mod error;
mod hierarchy;
mod pipeline;
mod program;
mod reconcile;
mod tutors;

pub use config::{
    default_programs, parse_departments, parse_weeks, upcoming_weeks, DepartmentConfig,
    DepartmentRegistry, SyncConfig, SyncOptions, ALL_WEEKS, DEFAULT_DEPARTMENTS,
    DEFAULT_SOURCE_BASE, DEFAULT_UPCOMING_WEEKS,
};
pub use error::SyncError;
pub use hierarchy::{build_hierarchy, GroupDirectory, Hierarchy, HierarchyOutcome};
pub use pipeline::{
    maybe_build_scheduler, DepartmentReport, DepartmentStatus, SyncPipeline, SyncRunSummary,
    SyncTotals,
};
pub use program::{classify_program, infer_program};
pub use reconcile::{reconcile_week, WeekContext, WeekReport};
pub use tutors::TutorDirectory;

pub const CRATE_NAME: &str = "edt-sync";
