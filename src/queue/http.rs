//! HTTP client for the submission platform.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use tracing::{debug, info};

use super::models::{ExecutionMetrics, PendingSubmission, SubmitResultsRequest};
use super::{ExecutionResult, Job, JobSource};
use crate::config::QueueConfig;
use crate::error::QueueError;

const PENDING_PATH: &str = "/api/submissions/pending";
const RESULTS_PATH: &str = "/api/submissions/results";

/// [`JobSource`] backed by the platform's REST endpoints.
#[derive(Debug, Clone)]
pub struct HttpJobSource {
    client: Client,
    config: QueueConfig,
}

impl HttpJobSource {
    pub fn new(config: QueueConfig) -> Result<Self, QueueError> {
        let client = Client::builder()
            .user_agent(concat!("bounty-judge/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl JobSource for HttpJobSource {
    async fn fetch_job(&self, scope: Option<&str>) -> Result<Job, QueueError> {
        let mut request = self.client.get(self.config.endpoint(PENDING_PATH));
        if let Some(problem_id) = scope {
            request = request.query(&[("problem_id", problem_id)]);
        }
        debug!(scope = ?scope, "Requesting pending submission");

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(QueueError::Empty);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QueueError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes().await?;
        let pending: PendingSubmission = serde_json::from_slice(&body)?;
        let job = pending.into_job(scope);
        info!(submission_id = %job.submission_id, image = %job.image, "Fetched submission");
        Ok(job)
    }

    async fn submit_result(&self, job: &Job, result: &ExecutionResult) -> Result<(), QueueError> {
        let payload = SubmitResultsRequest {
            submission_id: job.submission_id.clone(),
            judge_api_key: self.config.judge_key.expose_secret().to_string(),
            metrics: ExecutionMetrics::from(result),
        };

        let response = self
            .client
            .post(self.config.endpoint(RESULTS_PATH))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QueueError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
