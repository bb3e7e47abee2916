//! HTTP client wrapper: one GET per call, a minimum delay between calls, no retries.

use std::time::Duration;

use anyhow::Context;
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info_span, Instrument};

use crate::decode::paginate;
use crate::error::FetchError;

const ERROR_BODY_LIMIT: usize = 512;

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    /// Minimum spacing between two upstream calls.
    pub throttle: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            throttle: Duration::from_millis(100),
        }
    }
}

/// Enforces a minimum interval between consecutive calls.
#[derive(Debug)]
pub struct Throttle {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    pub async fn wait(&self) {
        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last_call = Some(Instant::now());
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    throttle: Throttle,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            throttle: Throttle::new(config.throttle),
        })
    }

    /// GET `url` and parse the body as JSON. Non-2xx responses become
    /// [`FetchError::HttpStatus`] carrying the (truncated) body.
    pub async fn get_json(&self, url: &str) -> Result<JsonValue, FetchError> {
        self.throttle.wait().await;

        let span = info_span!("http_fetch", url);
        async {
            let resp = self
                .client
                .get(url)
                .header(reqwest::header::ACCEPT, "application/json")
                .send()
                .await?;
            let status = resp.status();
            let final_url = resp.url().to_string();
            let body = resp.text().await?;

            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                    body: truncate(&body, ERROR_BODY_LIMIT),
                });
            }

            debug!(status = status.as_u16(), bytes = body.len(), "upstream response");
            serde_json::from_str(&body).map_err(|source| FetchError::Decode {
                url: final_url,
                source,
            })
        }
        .instrument(span)
        .await
    }

    pub async fn get_paginated(&self, url: &str) -> Result<Vec<JsonValue>, FetchError> {
        paginate(url.to_string(), |next| async move { self.get_json(&next).await }).await
    }
}

fn truncate(body: &str, limit: usize) -> String {
    if body.len() <= limit {
        return body.to_string();
    }
    let mut end = limit;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}
