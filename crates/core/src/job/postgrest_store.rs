//! Job store backed by a PostgREST endpoint.
//!
//! Rows mirror the [`Job`] serde shape. Compare-and-set is a conditional
//! `PATCH ?id=eq.<id>&version=eq.<n>`: an empty representation means the
//! row moved on or never existed.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use tracing::debug;

use super::{Job, JobFilter, JobStore, JobStoreError, PostgrestConfig};

pub struct PostgrestJobStore {
    client: Client,
    endpoint: String,
    api_key: String,
}

fn http_error(e: reqwest::Error) -> JobStoreError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        JobStoreError::Unavailable(e.to_string())
    } else if e.is_decode() {
        JobStoreError::Serialization(e.to_string())
    } else {
        JobStoreError::Database(e.to_string())
    }
}

async fn status_error(response: Response) -> JobStoreError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(300).collect();
    let message = format!("HTTP {}: {}", status, body);
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        JobStoreError::Unavailable(message)
    } else {
        JobStoreError::Database(message)
    }
}

impl PostgrestJobStore {
    pub fn new(config: &PostgrestConfig) -> Result<Self, JobStoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| JobStoreError::Database(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/rest/v1/{}",
                config.url.trim_end_matches('/'),
                config.table
            ),
            api_key: config.api_key.clone(),
        })
    }

    fn request(&self, method: Method) -> RequestBuilder {
        self.client
            .request(method, &self.endpoint)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    fn filter_params(filter: &JobFilter) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(status) = filter.status {
            params.push(("status", format!("eq.{}", status.as_str())));
        }
        if let Some(ref client_ref) = filter.client_ref {
            params.push(("client_ref", format!("eq.{}", client_ref)));
        }
        params
    }

    async fn rows(response: Response) -> Result<Vec<Job>, JobStoreError> {
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        response.json::<Vec<Job>>().await.map_err(http_error)
    }
}

#[async_trait]
impl JobStore for PostgrestJobStore {
    fn name(&self) -> &str {
        "postgrest"
    }

    async fn create(&self, job: &Job) -> Result<Job, JobStoreError> {
        let response = self
            .request(Method::POST)
            .header("Prefer", "return=representation")
            .json(job)
            .send()
            .await
            .map_err(http_error)?;

        if response.status() == StatusCode::CONFLICT {
            return Err(JobStoreError::AlreadyExists(job.id.clone()));
        }

        Self::rows(response)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| JobStoreError::Database("insert returned no row".to_string()))
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, JobStoreError> {
        let response = self
            .request(Method::GET)
            .query(&[("id", format!("eq.{}", id)), ("select", "*".to_string())])
            .send()
            .await
            .map_err(http_error)?;

        Ok(Self::rows(response).await?.into_iter().next())
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobStoreError> {
        let mut params = Self::filter_params(filter);
        params.push(("select", "*".to_string()));
        params.push(("order", "priority.desc,created_at.asc".to_string()));
        params.push(("limit", filter.limit.to_string()));
        params.push(("offset", filter.offset.to_string()));

        let response = self
            .request(Method::GET)
            .query(&params)
            .send()
            .await
            .map_err(http_error)?;

        Self::rows(response).await
    }

    async fn count(&self, filter: &JobFilter) -> Result<i64, JobStoreError> {
        let response = self
            .request(Method::HEAD)
            .header("Prefer", "count=exact")
            .query(&Self::filter_params(filter))
            .send()
            .await
            .map_err(http_error)?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        // Content-Range: 0-24/3573 or */0
        response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.rsplit('/').next())
            .and_then(|total| total.parse::<i64>().ok())
            .ok_or_else(|| JobStoreError::Database("missing Content-Range total".to_string()))
    }

    async fn compare_and_set(&self, next: &Job) -> Result<Job, JobStoreError> {
        let stored = Job {
            version: next.version + 1,
            updated_at: Utc::now(),
            ..next.clone()
        };

        let response = self
            .request(Method::PATCH)
            .header("Prefer", "return=representation")
            .query(&[
                ("id", format!("eq.{}", next.id)),
                ("version", format!("eq.{}", next.version)),
            ])
            .json(&stored)
            .send()
            .await
            .map_err(http_error)?;

        if let Some(job) = Self::rows(response).await?.into_iter().next() {
            return Ok(job);
        }

        debug!("Conditional update of job {} matched no row", next.id);
        match self.get(&next.id).await? {
            Some(_) => Err(JobStoreError::Conflict {
                job_id: next.id.clone(),
                expected_version: next.version,
            }),
            None => Err(JobStoreError::NotFound(next.id.clone())),
        }
    }
}
