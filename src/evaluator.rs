//! Post-run evaluation: the private test suite and the agent's token report.

use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// File the agent writes at the workspace root to report token usage.
pub const METRICS_FILE: &str = "metrics.json";

/// Anything larger is not a `{"tokens_used": n}` object.
const MAX_METRICS_BYTES: u64 = 1024 * 1024;

/// Token usage reported by the agent. Missing or corrupt reports read as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct AgentMetrics {
    #[serde(default)]
    pub tokens_used: u64,
}

impl AgentMetrics {
    /// Total: every input yields a value.
    pub fn parse(bytes: &[u8]) -> Self {
        match serde_json::from_slice::<Self>(bytes) {
            Ok(metrics) => {
                info!(tokens_used = metrics.tokens_used, "Agent reported token usage");
                metrics
            }
            Err(e) => {
                warn!(error = %e, "{} is corrupted or invalid, defaulting to 0 tokens", METRICS_FILE);
                Self::default()
            }
        }
    }
}

/// Read [`METRICS_FILE`] from the workspace.
pub async fn read_metrics(workspace: &Path) -> AgentMetrics {
    let path = workspace.join(METRICS_FILE);
    debug!(path = %path.display(), "Extracting agent metrics");

    match tokio::fs::metadata(&path).await {
        Ok(meta) if !meta.is_file() || meta.len() > MAX_METRICS_BYTES => {
            warn!(path = %path.display(), "Metrics file is not a small regular file, defaulting to 0 tokens");
            return AgentMetrics::default();
        }
        Ok(_) => {}
        Err(_) => {
            info!("Agent did not generate {}, defaulting to 0 tokens", METRICS_FILE);
            return AgentMetrics::default();
        }
    }

    match tokio::fs::read(&path).await {
        Ok(bytes) => AgentMetrics::parse(&bytes),
        Err(e) => {
            warn!(error = %e, "Could not read {}, defaulting to 0 tokens", METRICS_FILE);
            AgentMetrics::default()
        }
    }
}

/// Result of one test-suite invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    /// The suite ran and reported failures
    Failed { exit_code: Option<i32> },
    /// The suite could not be run at all
    HarnessFailure(String),
}

impl TestOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, TestOutcome::Passed)
    }
}

/// The fixed test command run against the workspace after the agent exits.
#[derive(Debug, Clone)]
pub struct TestSuite {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl Default for TestSuite {
    fn default() -> Self {
        Self::new("pytest", ["tests/"])
    }
}

impl TestSuite {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            timeout: Duration::from_secs(10 * 60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// True only when the suite exits zero.
    pub async fn run_tests(&self, workspace: &Path) -> bool {
        self.run(workspace).await.passed()
    }

    pub async fn run(&self, workspace: &Path) -> TestOutcome {
        let workspace = match tokio::fs::canonicalize(workspace).await {
            Ok(path) => path,
            Err(e) => {
                let reason = format!("could not resolve repo path {}: {}", workspace.display(), e);
                error!("Fatal execution error: {}", reason);
                return TestOutcome::HarnessFailure(reason);
            }
        };

        info!(command = %self.command_line(), "Executing tests");
        let child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                let reason = format!("failed to spawn `{}`: {}", self.command_line(), e);
                error!("Fatal execution error: {}", reason);
                return TestOutcome::HarnessFailure(reason);
            }
        };

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                let reason = format!("failed to collect test output: {}", e);
                error!("Fatal execution error: {}", reason);
                return TestOutcome::HarnessFailure(reason);
            }
            Err(_) => {
                let reason = format!("test suite exceeded {}s", self.timeout.as_secs());
                error!("Fatal execution error: {}", reason);
                return TestOutcome::HarnessFailure(reason);
            }
        };

        if output.status.success() {
            info!("All tests passed");
            return TestOutcome::Passed;
        }

        let exit_code = output.status.code();
        info!(exit_code = ?exit_code, "Agent failed to fix the bug");
        debug!(
            stdout = %String::from_utf8_lossy(&output.stdout),
            stderr = %String::from_utf8_lossy(&output.stderr),
            "Test output"
        );
        TestOutcome::Failed { exit_code }
    }
}
