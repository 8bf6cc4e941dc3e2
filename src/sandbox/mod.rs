//! Sandboxed execution of one submission's agent container.
//!
//! The container runtime sits behind [`ContainerRuntime`] so the executor's
//! lifecycle rules can be driven by Docker in production and by a scripted
//! double in tests. Every container the executor creates is removed before
//! [`SandboxExecutor::execute`] returns.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SandboxLimits;
use crate::error::SandboxError;

pub mod docker;

pub use docker::DockerRuntime;

/// Everything the runtime needs to create one sandbox container.
#[derive(Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// `KEY=value` pairs; holds the credential, so never printed
    pub env: Vec<String>,
    pub mount_source: PathBuf,
    pub mount_target: String,
    pub memory_bytes: i64,
}

impl fmt::Debug for ContainerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerSpec")
            .field("name", &self.name)
            .field("image", &self.image)
            .field("env", &format_args!("[{} vars, REDACTED]", self.env.len()))
            .field("mount_source", &self.mount_source)
            .field("mount_target", &self.mount_target)
            .field("memory_bytes", &self.memory_bytes)
            .finish()
    }
}

/// Capabilities the executor needs from a container engine.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn pull_image(&self, image: &str) -> Result<()>;
    /// Create a stopped container and return its id.
    async fn create(&self, spec: &ContainerSpec) -> Result<String>;
    async fn start(&self, container_id: &str) -> Result<()>;
    /// Block until the container stops and return its exit code. Cancelled by
    /// dropping the future.
    async fn wait(&self, container_id: &str) -> Result<i64>;
    async fn kill(&self, container_id: &str) -> Result<()>;
    async fn remove(&self, container_id: &str) -> Result<()>;
}

/// How a started container resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxOutcome {
    /// The agent exited on its own; the exit code is informational only
    Completed { exit_code: i64 },
    TimedOut,
    Failed(String),
}

/// Lifecycle position of a [`SandboxRun`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    Created,
    Running,
    Resolved,
    Removed,
}

impl SandboxState {
    fn can_advance_to(self, next: SandboxState) -> bool {
        use SandboxState::*;
        matches!(
            (self, next),
            (Created, Running) | (Created, Resolved) | (Running, Resolved) | (Resolved, Removed)
        )
    }
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Resolved => write!(f, "resolved"),
            Self::Removed => write!(f, "removed"),
        }
    }
}

/// One container's trip from creation to removal.
#[derive(Debug, Clone)]
pub struct SandboxRun {
    pub container_id: String,
    pub started_at: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    state: SandboxState,
    outcome: Option<SandboxOutcome>,
}

impl SandboxRun {
    fn created(container_id: String) -> Self {
        Self {
            container_id,
            started_at: None,
            deadline: None,
            state: SandboxState::Created,
            outcome: None,
        }
    }

    fn advance(&mut self, next: SandboxState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "invalid sandbox transition {} -> {}",
            self.state,
            next
        );
        debug!(container_id = %self.container_id, from = %self.state, to = %next, "Sandbox transition");
        self.state = next;
    }

    fn mark_running(&mut self, limit: Duration) {
        let now = Utc::now();
        self.started_at = Some(now);
        self.deadline = chrono::Duration::from_std(limit).ok().map(|d| now + d);
        self.advance(SandboxState::Running);
    }

    fn resolve(&mut self, outcome: SandboxOutcome) {
        self.outcome = Some(outcome);
        self.advance(SandboxState::Resolved);
    }

    fn mark_removed(&mut self) {
        self.advance(SandboxState::Removed);
    }

    pub fn state(&self) -> SandboxState {
        self.state
    }

    pub fn outcome(&self) -> Option<&SandboxOutcome> {
        self.outcome.as_ref()
    }

    /// Only a completed run is a success; timeouts and runtime failures are
    /// surfaced as errors carrying the container id.
    fn into_result(self, limit: Duration) -> Result<SandboxRun, SandboxError> {
        match self.outcome.clone() {
            Some(SandboxOutcome::Completed { .. }) => Ok(self),
            Some(SandboxOutcome::TimedOut) => Err(SandboxError::TimedOut {
                container_id: self.container_id,
                limit,
            }),
            Some(SandboxOutcome::Failed(reason)) => Err(SandboxError::Runtime {
                container_id: self.container_id,
                reason,
            }),
            None => Err(SandboxError::Runtime {
                container_id: self.container_id,
                reason: "sandbox never resolved".to_string(),
            }),
        }
    }
}

/// Pin untagged references to `:latest`; a bare repository name would
/// otherwise ask the engine for every tag.
pub fn normalize_image_reference(image: &str) -> String {
    if image.contains('@') {
        return image.to_string();
    }
    let last_segment = image.rsplit('/').next().unwrap_or(image);
    if last_segment.contains(':') {
        image.to_string()
    } else {
        format!("{}:latest", image)
    }
}

/// Runs agent images under the configured [`SandboxLimits`].
#[derive(Clone)]
pub struct SandboxExecutor {
    runtime: Arc<dyn ContainerRuntime>,
    limits: SandboxLimits,
}

impl SandboxExecutor {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, limits: SandboxLimits) -> Self {
        Self { runtime, limits }
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    /// Pull `image`, run it against `workspace` with `credential` injected and
    /// wait at most `time_limit` for it to exit.
    pub async fn execute(
        &self,
        image: &str,
        workspace: &Path,
        credential: &SecretString,
        time_limit: Duration,
    ) -> Result<SandboxRun, SandboxError> {
        if credential.expose_secret().is_empty() {
            return Err(SandboxError::MissingCredential);
        }

        let mount_source =
            tokio::fs::canonicalize(workspace)
                .await
                .map_err(|source| SandboxError::Workspace {
                    path: workspace.to_path_buf(),
                    source,
                })?;

        let image = normalize_image_reference(image);
        self.acquire_image(&image).await?;

        let spec = ContainerSpec {
            name: format!("bounty-judge-{}", uuid::Uuid::new_v4().simple()),
            image: image.clone(),
            env: vec![format!(
                "{}={}",
                self.limits.credential_env,
                credential.expose_secret()
            )],
            mount_source,
            mount_target: self.limits.mount_target.clone(),
            memory_bytes: self.limits.memory_bytes,
        };

        info!(image = %image, name = %spec.name, "Creating sandbox container");
        let container_id =
            self.runtime
                .create(&spec)
                .await
                .map_err(|e| SandboxError::Create {
                    image: image.clone(),
                    reason: format!("{:#}", e),
                })?;

        let mut run = SandboxRun::created(container_id);
        let outcome = self.drive(&mut run, time_limit).await;
        run.resolve(outcome);
        self.teardown(&mut run).await;
        run.into_result(time_limit)
    }

    async fn acquire_image(&self, image: &str) -> Result<(), SandboxError> {
        info!(image = %image, "Pulling agent image");
        match tokio::time::timeout(self.limits.pull_timeout, self.runtime.pull_image(image)).await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SandboxError::ImageAcquisition {
                image: image.to_string(),
                reason: format!("{:#}", e),
            }),
            Err(_) => Err(SandboxError::ImageAcquisition {
                image: image.to_string(),
                reason: format!(
                    "pull exceeded {}s",
                    self.limits.pull_timeout.as_secs()
                ),
            }),
        }
    }

    /// Start the container and race its exit against the deadline.
    async fn drive(&self, run: &mut SandboxRun, time_limit: Duration) -> SandboxOutcome {
        if let Err(e) = self.runtime.start(&run.container_id).await {
            return SandboxOutcome::Failed(format!("failed to start container: {:#}", e));
        }
        run.mark_running(time_limit);
        info!(container_id = %run.container_id, limit_secs = time_limit.as_secs(), "Agent started");

        tokio::select! {
            waited = self.runtime.wait(&run.container_id) => match waited {
                Ok(exit_code) => {
                    info!(container_id = %run.container_id, exit_code, "Agent finished execution");
                    SandboxOutcome::Completed { exit_code }
                }
                Err(e) => {
                    warn!(container_id = %run.container_id, error = %e, "Container wait failed");
                    SandboxOutcome::Failed(format!("container wait error: {:#}", e))
                }
            },
            _ = tokio::time::sleep(time_limit) => {
                warn!(container_id = %run.container_id, "Agent execution timed out");
                SandboxOutcome::TimedOut
            }
        }
    }

    /// Kill on timeout, then remove exactly once. Both steps are best-effort.
    async fn teardown(&self, run: &mut SandboxRun) {
        if run.outcome() == Some(&SandboxOutcome::TimedOut) {
            if let Err(e) = self.runtime.kill(&run.container_id).await {
                debug!(container_id = %run.container_id, error = %e, "Kill after timeout failed");
            }
        }
        if let Err(e) = self.runtime.remove(&run.container_id).await {
            warn!(container_id = %run.container_id, error = %e, "Failed to remove container (may require manual cleanup)");
        }
        run.mark_removed();
    }
}
