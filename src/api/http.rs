//! `reqwest`-backed [`JobApi`] implementation.
//!
//! | Operation    | Request                   |
//! |--------------|---------------------------|
//! | create-job   | `POST {base}/jobs`        |
//! | get-status   | `GET {base}/jobs/{id}`    |
//! | cancel       | `POST {base}/jobs/{id}/cancel` |
//! | fetch-result | `GET {base}/jobs/{id}/result`  |
//!
//! Job ids are appended as a single percent-encoded path segment, so an id
//! can never escape the `/jobs/` prefix.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument};
use url::Url;

use super::{CreateJobRequest, Job, JobApi};
use crate::config::ClientConfig;
use crate::error::JobError;

/// User-Agent sent with every request.
fn default_user_agent() -> String {
    format!("jobdl/{}", env!("CARGO_PKG_VERSION"))
}

/// HTTP client for the job API.
///
/// Create once and reuse; the inner `reqwest::Client` pools connections.
///
/// # Example
///
/// ```no_run
/// use jobdl_core::api::{HttpJobClient, JobApi};
/// use jobdl_core::config::ClientConfig;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpJobClient::new(&ClientConfig::default())?;
/// let job = client.get_status("job-42").await?;
/// println!("{}: {}", job.id, job.status);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpJobClient {
    client: Client,
    base_url: Url,
}

impl HttpJobClient {
    /// Builds a client from the connection settings in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::InvalidRequest`] for an unusable base URL or token,
    /// and [`JobError::Network`] if the HTTP client cannot be built.
    #[instrument(level = "debug", skip(config), fields(base_url = %config.base_url))]
    pub fn new(config: &ClientConfig) -> Result<Self, JobError> {
        let base_url = parse_base_url(&config.base_url)?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(token) = config.api_token.as_deref() {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| JobError::invalid_request("api token contains invalid characters"))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .gzip(true)
            .user_agent(default_user_agent())
            .default_headers(headers)
            .build()
            .map_err(|e| JobError::network("build_client", e))?;

        debug!(authenticated = config.api_token.is_some(), "job API client ready");
        Ok(Self { client, base_url })
    }

    /// Base URL requests are resolved against.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Builds `{base}/jobs[/{id}][/{action}]`.
    fn jobs_url(&self, job_id: Option<&str>, action: Option<&str>) -> Result<Url, JobError> {
        if let Some(id) = job_id
            && id.trim().is_empty()
        {
            return Err(JobError::invalid_request("job id must not be empty"));
        }

        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| JobError::invalid_request("base URL cannot carry a path"))?;
            segments.pop_if_empty().push("jobs");
            if let Some(id) = job_id {
                segments.push(id);
            }
            if let Some(action) = action {
                segments.push(action);
            }
        }
        Ok(url)
    }

    async fn send(&self, operation: &str, request: RequestBuilder) -> Result<Response, JobError> {
        let response = request
            .send()
            .await
            .map_err(|e| JobError::network(operation, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        debug!(operation, status = status.as_u16(), "job API returned error status");
        Err(JobError::http_status_with_body(
            operation,
            status.as_u16(),
            body,
        ))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<T, JobError> {
        let response = self.send(operation, request).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| JobError::network(operation, e))?;
        serde_json::from_slice(&bytes).map_err(|e| JobError::decode(operation, e))
    }
}

#[async_trait]
impl JobApi for HttpJobClient {
    #[instrument(skip(self, request), fields(account = %request.account, target = %request.target))]
    async fn create_job(&self, request: &CreateJobRequest) -> Result<Job, JobError> {
        request.validate()?;
        let url = self.jobs_url(None, None)?;
        let job: Job = self
            .send_json("create_job", self.client.post(url).json(request))
            .await?;
        info!(job_id = %job.id, status = %job.status, "job created");
        Ok(job)
    }

    #[instrument(skip(self))]
    async fn get_status(&self, job_id: &str) -> Result<Job, JobError> {
        let url = self.jobs_url(Some(job_id), None)?;
        self.send_json("get_status", self.client.get(url)).await
    }

    #[instrument(skip(self))]
    async fn cancel_job(&self, job_id: &str) -> Result<Job, JobError> {
        let url = self.jobs_url(Some(job_id), Some("cancel"))?;
        let job: Job = self
            .send_json("cancel_job", self.client.post(url))
            .await?;
        info!(job_id = %job.id, status = %job.status, "job cancel requested");
        Ok(job)
    }

    #[instrument(skip(self))]
    async fn fetch_result(&self, job_id: &str) -> Result<Vec<u8>, JobError> {
        let url = self.jobs_url(Some(job_id), Some("result"))?;
        let response = self
            .send("fetch_result", self.client.get(url).header(ACCEPT, "*/*"))
            .await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| JobError::network("fetch_result", e))?;
        debug!(bytes = bytes.len(), "fetched job result");
        Ok(bytes.to_vec())
    }
}

fn parse_base_url(raw: &str) -> Result<Url, JobError> {
    let url = Url::parse(raw)
        .map_err(|e| JobError::invalid_request(format!("invalid base URL `{raw}`: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(JobError::invalid_request(format!(
            "unsupported base URL scheme `{other}`"
        ))),
    }
}
