//! Sequences fetch, sandbox, evaluation, report and revert for each job.
//!
//! Jobs run strictly one at a time. The workspace is reverted once before the
//! first job and after every job, so no job sees another's residue.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::error::{JudgeError, RevertError};
use crate::evaluator::{read_metrics, TestOutcome, TestSuite};
use crate::git::WorkspaceReverter;
use crate::queue::{ExecutionResult, Job, JobSource};
use crate::sandbox::SandboxExecutor;

/// Where a job is in its trip through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Fetched,
    Executing,
    Completed,
    AgentFailed,
    Evaluated,
    Skipped,
    Reported,
    Reverted,
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Fetched => "fetched",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::AgentFailed => "agent_failed",
            Self::Evaluated => "evaluated",
            Self::Skipped => "skipped",
            Self::Reported => "reported",
            Self::Reverted => "reverted",
        };
        f.write_str(s)
    }
}

/// What happened to one job.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub submission_id: String,
    pub result: ExecutionResult,
    /// Why the sandbox did not complete, if it did not
    pub agent_error: Option<String>,
    /// Whether the queue accepted the result
    pub reported: bool,
    pub stages: Vec<JobStage>,
}

impl JobReport {
    fn new(submission_id: &str) -> Self {
        Self {
            submission_id: submission_id.to_string(),
            result: ExecutionResult::agent_failed(0.0),
            agent_error: None,
            reported: false,
            stages: vec![JobStage::Fetched],
        }
    }

    fn enter(&mut self, stage: JobStage) {
        debug!(submission_id = %self.submission_id, stage = %stage, "Job stage");
        self.stages.push(stage);
    }
}

/// Totals for a batch invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: usize,
    pub passed: usize,
    pub agent_failures: usize,
    pub report_failures: usize,
}

impl BatchSummary {
    fn record(&mut self, report: &JobReport) {
        self.processed += 1;
        if report.result.passed {
            self.passed += 1;
        }
        if report.agent_error.is_some() {
            self.agent_failures += 1;
        }
        if !report.reported {
            self.report_failures += 1;
        }
    }
}

/// The worker's controller.
pub struct Pipeline {
    source: Arc<dyn JobSource>,
    executor: SandboxExecutor,
    suite: TestSuite,
    reverter: Arc<dyn WorkspaceReverter>,
    workspace: PathBuf,
    agent_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn JobSource>,
        executor: SandboxExecutor,
        suite: TestSuite,
        reverter: Arc<dyn WorkspaceReverter>,
        workspace: impl Into<PathBuf>,
    ) -> Self {
        let agent_timeout = executor.limits().agent_timeout;
        Self {
            source,
            executor,
            suite,
            reverter,
            workspace: workspace.into(),
            agent_timeout,
        }
    }

    pub fn with_agent_timeout(mut self, timeout: Duration) -> Self {
        self.agent_timeout = timeout;
        self
    }

    /// Fetch one job (optionally scoped to a problem), run it once, report
    /// once and revert once. Any fetch error, including an empty queue, is
    /// fatal here. With `tolerate_revert_failure` a failed revert is logged
    /// instead of returned.
    pub async fn run_single(
        &self,
        scope: Option<&str>,
        tolerate_revert_failure: bool,
    ) -> Result<JobReport, JudgeError> {
        self.revert_or_tolerate(tolerate_revert_failure)?;

        let job = self.source.fetch_job(scope).await?;
        info!(submission_id = %job.submission_id, "Got submission");

        let mut report = self.process_job(&job).await;
        self.revert_or_tolerate(tolerate_revert_failure)?;
        report.enter(JobStage::Reverted);
        Ok(report)
    }

    /// Drain the queue. An empty queue ends the batch; any other fetch error
    /// or a failed revert aborts it.
    pub async fn run_batch(&self) -> Result<BatchSummary, JudgeError> {
        self.revert()?;

        let mut summary = BatchSummary::default();
        loop {
            let job = match self.source.fetch_job(None).await {
                Ok(job) => job,
                Err(e) if e.is_empty() => {
                    info!("Queue is empty, batch processing complete");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Queue error, aborting batch");
                    return Err(e.into());
                }
            };

            info!(
                job = summary.processed + 1,
                submission_id = %job.submission_id,
                image = %job.image,
                "Processing job"
            );
            let mut report = self.process_job(&job).await;
            self.revert()?;
            report.enter(JobStage::Reverted);
            summary.record(&report);
        }

        Ok(summary)
    }

    /// Execute, evaluate and report one job. Never fails: every sandbox or
    /// evaluation problem degrades into a failed result that is still reported.
    pub async fn process_job(&self, job: &Job) -> JobReport {
        let mut report = JobReport::new(&job.submission_id);
        report.enter(JobStage::Executing);

        let started = Instant::now();
        let sandbox = self
            .executor
            .execute(&job.image, &self.workspace, job.credential(), self.agent_timeout)
            .await;
        let execution_seconds = started.elapsed().as_secs_f64();

        let result = match sandbox {
            Ok(run) => {
                report.enter(JobStage::Completed);
                debug!(container_id = %run.container_id, "Sandbox removed");
                let outcome = self.suite.run(&self.workspace).await;
                if let TestOutcome::HarnessFailure(reason) = &outcome {
                    error!(submission_id = %job.submission_id, reason = %reason, "Test harness failure, reporting as failed");
                }
                let metrics = read_metrics(&self.workspace).await;
                report.enter(JobStage::Evaluated);
                ExecutionResult {
                    passed: outcome.passed(),
                    execution_seconds,
                    tokens_used: metrics.tokens_used,
                }
            }
            Err(e) => {
                warn!(submission_id = %job.submission_id, error = %e, "Agent execution failed, skipping tests");
                report.enter(JobStage::AgentFailed);
                report.enter(JobStage::Skipped);
                report.agent_error = Some(e.to_string());
                ExecutionResult::agent_failed(execution_seconds)
            }
        };
        report.result = result;

        match self.source.submit_result(job, &report.result).await {
            Ok(()) => {
                info!(
                    submission_id = %job.submission_id,
                    passed = report.result.passed,
                    tokens_used = report.result.tokens_used,
                    execution_seconds = report.result.execution_seconds,
                    "Results transmitted"
                );
                report.reported = true;
                report.enter(JobStage::Reported);
            }
            Err(e) => {
                error!(submission_id = %job.submission_id, error = %e, "Failed to submit results");
            }
        }

        report
    }

    fn revert(&self) -> Result<(), RevertError> {
        self.reverter.revert(&self.workspace).map_err(|e| {
            error!(workspace = %self.workspace.display(), error = %e, "Failed to revert workspace");
            e
        })
    }

    fn revert_or_tolerate(&self, tolerate: bool) -> Result<(), RevertError> {
        match self.revert() {
            Err(e) if tolerate => {
                warn!(error = %e, "Continuing despite revert failure");
                Ok(())
            }
            other => other,
        }
    }
}
