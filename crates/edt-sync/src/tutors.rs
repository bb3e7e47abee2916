use std::sync::Arc;
use std::time::Duration;

use edt_core::TutorProfile;
use edt_fetch::{CacheLookup, DepartmentCache, FetchError, ScheduleSource};
use tracing::debug;

/// Tutor listings per department, fetched on demand and cached.
pub struct TutorDirectory<S: ?Sized> {
    source: Arc<S>,
    cache: DepartmentCache<Vec<TutorProfile>>,
}

impl<S: ScheduleSource + ?Sized> TutorDirectory<S> {
    pub fn new(source: Arc<S>, ttl: Duration) -> Self {
        Self {
            source,
            cache: DepartmentCache::new(ttl),
        }
    }

    pub async fn tutors(&self, dept: &str) -> Result<CacheLookup<Vec<TutorProfile>>, FetchError> {
        let lookup = self
            .cache
            .get_or_refresh(dept, || self.source.fetch_tutors(dept))
            .await?;
        debug!(dept, count = lookup.value.len(), freshness = ?lookup.freshness, "tutor listing");
        Ok(lookup)
    }

    pub async fn invalidate(&self, dept: &str) -> bool {
        self.cache.invalidate(dept).await
    }
}
