use async_trait::async_trait;
use edt_core::{CourseItem, GroupNode, TransversalGroup, TutorProfile};
use reqwest::Url;

use crate::decode::{as_list, decode_course_items, decode_entries};
use crate::error::FetchError;
use crate::http::HttpFetcher;

/// Where scheduling data comes from.
///
/// Every method is one logical upstream request; failures are reported, never
/// retried.
#[async_trait]
pub trait ScheduleSource: Send + Sync {
    fn source_id(&self) -> &str;

    /// Scheduled courses of one program and week, each tagged with `program`.
    async fn fetch_scheduled(
        &self,
        dept: &str,
        program: &str,
        week: i32,
        year: i32,
    ) -> Result<Vec<CourseItem>, FetchError>;

    /// Roots of the structural group tree of `program`.
    async fn fetch_group_tree(
        &self,
        dept: &str,
        program: &str,
    ) -> Result<Vec<GroupNode>, FetchError>;

    async fn fetch_transversal_groups(
        &self,
        dept: &str,
        program: &str,
    ) -> Result<Vec<TransversalGroup>, FetchError>;

    async fn fetch_tutors(&self, dept: &str) -> Result<Vec<TutorProfile>, FetchError>;
}

/// The flOpEDT REST API.
#[derive(Debug)]
pub struct HttpScheduleSource {
    http: HttpFetcher,
    api_root: String,
}

impl HttpScheduleSource {
    /// `base` is the site root, e.g. `https://flopedt.example.org`; the API
    /// lives under `<base>/fr/api`.
    pub fn new(http: HttpFetcher, base: &str) -> Self {
        Self {
            http,
            api_root: format!("{}/fr/api", base.trim_end_matches('/')),
        }
    }

    pub fn api_root(&self) -> &str {
        &self.api_root
    }

    pub fn endpoint(&self, path: &str, params: &[(&str, String)]) -> Result<String, FetchError> {
        let raw = format!("{}{}", self.api_root, path);
        let params = params.iter().filter(|(_, v)| !v.is_empty());
        Url::parse_with_params(&raw, params)
            .map(String::from)
            .map_err(|err| FetchError::Url {
                url: raw,
                message: err.to_string(),
            })
    }
}

#[async_trait]
impl ScheduleSource for HttpScheduleSource {
    fn source_id(&self) -> &str {
        "flopedt-http"
    }

    async fn fetch_scheduled(
        &self,
        dept: &str,
        program: &str,
        week: i32,
        year: i32,
    ) -> Result<Vec<CourseItem>, FetchError> {
        let url = self.endpoint(
            "/fetch/scheduledcourses/",
            &[
                ("dept", dept.to_string()),
                ("train_prog", program.to_string()),
                ("week", week.to_string()),
                ("year", year.to_string()),
                ("work_copy", "0".to_string()),
            ],
        )?;
        let values = self.http.get_paginated(&url).await?;
        Ok(decode_course_items(values, program))
    }

    async fn fetch_group_tree(
        &self,
        dept: &str,
        program: &str,
    ) -> Result<Vec<GroupNode>, FetchError> {
        let url = self.endpoint(
            "/groups/structural/tree/",
            &[("dept", dept.to_string()), ("train_prog", program.to_string())],
        )?;
        let body = self.http.get_json(&url).await?;
        Ok(decode_entries(as_list(body), "structural group tree"))
    }

    async fn fetch_transversal_groups(
        &self,
        dept: &str,
        program: &str,
    ) -> Result<Vec<TransversalGroup>, FetchError> {
        let url = self.endpoint(
            "/groups/transversal/",
            &[("dept", dept.to_string()), ("train_prog", program.to_string())],
        )?;
        let body = self.http.get_json(&url).await?;
        Ok(decode_entries(as_list(body), "transversal group"))
    }

    async fn fetch_tutors(&self, dept: &str) -> Result<Vec<TutorProfile>, FetchError> {
        let url = self.endpoint("/user/tutor/", &[("dept", dept.to_string())])?;
        let body = self.http.get_json(&url).await?;
        Ok(decode_entries(as_list(body), "tutor"))
    }
}
