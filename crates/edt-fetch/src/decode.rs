//! Response-shape handling shared by the HTTP and fixture sources.

use std::collections::HashSet;
use std::future::Future;

use edt_core::{CourseItem, RawScheduledCourse};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::error::FetchError;

/// One response body of a possibly paginated listing.
#[derive(Debug, Clone, PartialEq)]
pub enum Page {
    /// A bare array: the whole listing.
    Complete(Vec<JsonValue>),
    /// `{results, next}`: a page, with the next page's URL if any.
    Partial {
        results: Vec<JsonValue>,
        next: Option<String>,
    },
    Unrecognized,
}

impl Page {
    pub fn classify(body: JsonValue) -> Self {
        match body {
            JsonValue::Array(items) => Page::Complete(items),
            JsonValue::Object(mut map) => match map.remove("results") {
                Some(JsonValue::Array(results)) => {
                    let next = map
                        .get("next")
                        .and_then(JsonValue::as_str)
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string);
                    Page::Partial { results, next }
                }
                _ => Page::Unrecognized,
            },
            _ => Page::Unrecognized,
        }
    }
}

/// Follow `next` links from `first_url`, concatenating results.
///
/// A URL seen twice ends the walk instead of looping forever.
pub async fn paginate<F, Fut>(first_url: String, mut get: F) -> Result<Vec<JsonValue>, FetchError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<JsonValue, FetchError>>,
{
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let mut next = Some(first_url);

    while let Some(url) = next.take() {
        if !seen.insert(url.clone()) {
            warn!(%url, "pagination loop detected; stopping");
            break;
        }
        let body = get(url.clone()).await?;
        match Page::classify(body) {
            Page::Complete(items) => {
                debug!(%url, count = items.len(), "fetched complete listing");
                out.extend(items);
            }
            Page::Partial { results, next: following } => {
                debug!(%url, count = results.len(), has_next = following.is_some(), "fetched page");
                out.extend(results);
                next = following;
            }
            Page::Unrecognized => {
                debug!(%url, "unrecognized listing shape; treating as empty");
            }
        }
    }

    Ok(out)
}

/// Loose list reading for non-paginated endpoints: arrays as-is, `{results}`
/// unwrapped, a lone object as a one-element list, anything else empty.
pub fn as_list(body: JsonValue) -> Vec<JsonValue> {
    match body {
        JsonValue::Array(items) => items,
        JsonValue::Null => Vec::new(),
        JsonValue::Object(mut map) => match map.remove("results") {
            Some(JsonValue::Array(results)) => results,
            Some(other) => {
                map.insert("results".to_string(), other);
                vec![JsonValue::Object(map)]
            }
            None => vec![JsonValue::Object(map)],
        },
        _ => Vec::new(),
    }
}

/// Deserialize scheduled-course entries and tag each with `program`.
/// Entries that do not match the wire shape are logged and dropped.
pub fn decode_course_items(values: Vec<JsonValue>, program: &str) -> Vec<CourseItem> {
    values
        .into_iter()
        .enumerate()
        .filter_map(|(idx, value)| match serde_json::from_value::<RawScheduledCourse>(value) {
            Ok(raw) => Some(CourseItem::from_raw(raw, Some(program))),
            Err(err) => {
                warn!(program, index = idx, error = %err, "skipping malformed scheduled course");
                None
            }
        })
        .collect()
}

pub fn decode_entries<T: DeserializeOwned>(values: Vec<JsonValue>, what: &str) -> Vec<T> {
    values
        .into_iter()
        .enumerate()
        .filter_map(|(idx, value)| match serde_json::from_value::<T>(value) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(what, index = idx, error = %err, "skipping malformed entry");
                None
            }
        })
        .collect()
}
