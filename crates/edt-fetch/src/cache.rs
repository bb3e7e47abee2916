//! Department-keyed cache with per-entry expiry.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Served from a live entry.
    Fresh,
    /// Fetched just now.
    Refreshed,
    /// Refresh failed; an expired entry was served instead.
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheLookup<V> {
    pub value: V,
    pub freshness: Freshness,
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    fetched_at: Instant,
}

#[derive(Debug)]
pub struct DepartmentCache<V> {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
}

impl<V: Clone> DepartmentCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the live entry for `dept`, or run `refresh` and store its value.
    ///
    /// If `refresh` fails and an expired entry exists, the expired value is
    /// returned as [`Freshness::Stale`].
    pub async fn get_or_refresh<F, Fut, E>(
        &self,
        dept: &str,
        refresh: F,
    ) -> Result<CacheLookup<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: std::fmt::Display,
    {
        {
            let entries = self.entries.lock().await;
            if let Some(entry) = entries.get(dept) {
                if entry.fetched_at.elapsed() < self.ttl {
                    return Ok(CacheLookup {
                        value: entry.value.clone(),
                        freshness: Freshness::Fresh,
                    });
                }
            }
        }

        match refresh().await {
            Ok(value) => {
                let mut entries = self.entries.lock().await;
                entries.insert(
                    dept.to_string(),
                    CacheEntry {
                        value: value.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                Ok(CacheLookup {
                    value,
                    freshness: Freshness::Refreshed,
                })
            }
            Err(err) => {
                let entries = self.entries.lock().await;
                match entries.get(dept) {
                    Some(entry) => {
                        warn!(dept, error = %err, "refresh failed; serving stale entry");
                        Ok(CacheLookup {
                            value: entry.value.clone(),
                            freshness: Freshness::Stale,
                        })
                    }
                    None => Err(err),
                }
            }
        }
    }

    /// Drop the entry for `dept`; returns whether one existed.
    pub async fn invalidate(&self, dept: &str) -> bool {
        self.entries.lock().await.remove(dept).is_some()
    }
}
