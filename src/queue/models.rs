//! JSON payloads exchanged with the submission platform.

use serde::{Deserialize, Deserializer, Serialize};

use super::{ExecutionResult, Job};

/// Body of `GET /api/submissions/pending`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingSubmission {
    #[serde(deserialize_with = "opaque_id")]
    pub submission_id: String,
    pub docker_image_tag: String,
    /// Null when the platform has no key configured
    #[serde(default)]
    pub api_key: Option<String>,
}

impl PendingSubmission {
    pub fn into_job(self, scope: Option<&str>) -> Job {
        Job::new(
            self.submission_id,
            self.docker_image_tag,
            self.api_key.unwrap_or_default(),
        )
        .with_scope(scope.map(str::to_string))
    }
}

/// Nested telemetry object in the result report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub passed_tests: bool,
    pub execution_time_seconds: f64,
    pub tokens_used: u64,
}

impl From<&ExecutionResult> for ExecutionMetrics {
    fn from(result: &ExecutionResult) -> Self {
        Self {
            passed_tests: result.passed,
            execution_time_seconds: result.execution_seconds,
            tokens_used: result.tokens_used,
        }
    }
}

/// Body of `POST /api/submissions/results`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResultsRequest {
    pub submission_id: String,
    pub judge_api_key: String,
    pub metrics: ExecutionMetrics,
}

/// Submission ids are opaque; the platform may hand out strings or integers.
fn opaque_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}
