//! Upstream access for the timetable sync: the [`ScheduleSource`] contract,
//! its HTTP and fixture-directory implementations, and a department-keyed
//! TTL cache for slow-changing listings.

mod cache;
mod decode;
mod error;
mod fixtures;
mod http;
mod source;

pub use cache::{CacheLookup, DepartmentCache, Freshness};
pub use decode::{as_list, decode_course_items, decode_entries, paginate, Page};
pub use error::FetchError;
pub use fixtures::FixtureSource;
pub use http::{HttpClientConfig, HttpFetcher, Throttle};
pub use source::{HttpScheduleSource, ScheduleSource};

pub const CRATE_NAME: &str = "edt-fetch";
