//! Submission queue: the jobs we run and the results we hand back.

use async_trait::async_trait;
use secrecy::SecretString;
use std::fmt;

use crate::error::QueueError;

pub mod http;
pub mod models;

pub use http::HttpJobSource;

/// One submission to execute. The credential is injected into the sandbox and
/// nowhere else, so `Debug` never prints it.
#[derive(Clone)]
pub struct Job {
    pub submission_id: String,
    pub image: String,
    /// Problem filter the job was requested with, if any
    pub scope: Option<String>,
    credential: SecretString,
}

impl Job {
    pub fn new(
        submission_id: impl Into<String>,
        image: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            submission_id: submission_id.into(),
            image: image.into(),
            scope: None,
            credential: SecretString::from(credential.into()),
        }
    }

    pub fn with_scope(mut self, scope: Option<String>) -> Self {
        self.scope = scope;
        self
    }

    pub fn credential(&self) -> &SecretString {
        &self.credential
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("submission_id", &self.submission_id)
            .field("image", &self.image)
            .field("scope", &self.scope)
            .field("credential", &"[REDACTED]")
            .finish()
    }
}

/// Outcome reported for exactly one job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionResult {
    pub passed: bool,
    pub execution_seconds: f64,
    pub tokens_used: u64,
}

impl ExecutionResult {
    /// An agent that never ran to completion gets no credit for correctness
    /// or token usage.
    pub fn agent_failed(execution_seconds: f64) -> Self {
        Self {
            passed: false,
            execution_seconds,
            tokens_used: 0,
        }
    }
}

/// Source of pending jobs and sink for their results.
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Fetch the next pending job, optionally restricted to one problem.
    /// Returns [`QueueError::Empty`] when nothing is pending.
    async fn fetch_job(&self, scope: Option<&str>) -> Result<Job, QueueError>;

    async fn submit_result(&self, job: &Job, result: &ExecutionResult) -> Result<(), QueueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_credential() {
        let job = Job::new("sub-1", "agent:latest", "super-secret-key");
        let printed = format!("{:?}", job);
        assert!(printed.contains("sub-1"));
        assert!(printed.contains("[REDACTED]"));
        assert!(!printed.contains("super-secret-key"));
    }

    #[test]
    fn test_agent_failed_result_has_no_credit() {
        let result = ExecutionResult::agent_failed(12.5);
        assert!(!result.passed);
        assert_eq!(result.tokens_used, 0);
        assert_eq!(result.execution_seconds, 12.5);
    }
}
