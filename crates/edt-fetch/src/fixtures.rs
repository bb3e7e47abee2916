//! Directory-backed [`ScheduleSource`] for offline runs and tests.
//!
//! Layout, using the API's own JSON shapes:
//!
//! ```text
//! <root>/<DEPT>/tutors.json
//! <root>/<DEPT>/<PROG>/tree.json
//! <root>/<DEPT>/<PROG>/transversal.json
//! <root>/<DEPT>/<PROG>/scheduled-<year>-W<ww>.json
//! ```
//!
//! A missing file is an empty listing.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use edt_core::{CourseItem, GroupNode, TransversalGroup, TutorProfile};
use serde_json::Value as JsonValue;
use tokio::fs;

use crate::decode::{as_list, decode_course_items, decode_entries};
use crate::error::FetchError;
use crate::source::ScheduleSource;

#[derive(Debug, Clone)]
pub struct FixtureSource {
    root: PathBuf,
}

impl FixtureSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scheduled_path(&self, dept: &str, program: &str, week: i32, year: i32) -> PathBuf {
        self.root
            .join(dept)
            .join(program)
            .join(format!("scheduled-{year}-W{week:02}.json"))
    }

    async fn read_json(&self, path: &Path) -> Result<Option<JsonValue>, FetchError> {
        let text = match fs::read_to_string(path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(FetchError::Fixture {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| FetchError::Decode {
                url: path.display().to_string(),
                source,
            })
    }

    async fn read_list(&self, path: PathBuf) -> Result<Vec<JsonValue>, FetchError> {
        Ok(self.read_json(&path).await?.map(as_list).unwrap_or_default())
    }
}

#[async_trait]
impl ScheduleSource for FixtureSource {
    fn source_id(&self) -> &str {
        "fixtures"
    }

    async fn fetch_scheduled(
        &self,
        dept: &str,
        program: &str,
        week: i32,
        year: i32,
    ) -> Result<Vec<CourseItem>, FetchError> {
        let values = self.read_list(self.scheduled_path(dept, program, week, year)).await?;
        Ok(decode_course_items(values, program))
    }

    async fn fetch_group_tree(
        &self,
        dept: &str,
        program: &str,
    ) -> Result<Vec<GroupNode>, FetchError> {
        let values = self.read_list(self.root.join(dept).join(program).join("tree.json")).await?;
        Ok(decode_entries(values, "structural group tree"))
    }

    async fn fetch_transversal_groups(
        &self,
        dept: &str,
        program: &str,
    ) -> Result<Vec<TransversalGroup>, FetchError> {
        let values = self
            .read_list(self.root.join(dept).join(program).join("transversal.json"))
            .await?;
        Ok(decode_entries(values, "transversal group"))
    }

    async fn fetch_tutors(&self, dept: &str) -> Result<Vec<TutorProfile>, FetchError> {
        let values = self.read_list(self.root.join(dept).join("tutors.json")).await?;
        Ok(decode_entries(values, "tutor"))
    }
}
