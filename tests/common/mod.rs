//! Scripted doubles for the container runtime, queue and reverter.
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bounty_judge::error::{QueueError, RevertError};
use bounty_judge::git::WorkspaceReverter;
use bounty_judge::queue::{ExecutionResult, Job, JobSource};
use bounty_judge::sandbox::{ContainerRuntime, ContainerSpec};

/// How the scripted container behaves once started.
#[derive(Debug, Clone)]
pub enum AgentBehavior {
    /// Write `metrics` (if any) into the mounted workspace, then exit
    Exit { code: i64, metrics: Option<String> },
    /// Never exit
    Hang,
    /// The wait call itself errors
    WaitError(String),
}

#[derive(Debug, Default)]
pub struct RuntimeState {
    pub calls: Vec<String>,
    pub live: HashSet<String>,
    pub killed: Vec<String>,
    pub removed: Vec<String>,
    pub specs: Vec<ContainerSpec>,
    next_id: usize,
}

/// In-memory container engine. Each created container follows the next
/// queued behavior; once the queue is drained the default applies.
pub struct MockRuntime {
    pub state: Mutex<RuntimeState>,
    behaviors: Mutex<VecDeque<AgentBehavior>>,
    default_behavior: AgentBehavior,
    pub fail_pull: bool,
    pub fail_create: bool,
    pub fail_start: bool,
    pub fail_remove: bool,
}

impl MockRuntime {
    pub fn new(default_behavior: AgentBehavior) -> Self {
        Self {
            state: Mutex::new(RuntimeState::default()),
            behaviors: Mutex::new(VecDeque::new()),
            default_behavior,
            fail_pull: false,
            fail_create: false,
            fail_start: false,
            fail_remove: false,
        }
    }

    pub fn exiting(code: i64, metrics: Option<&str>) -> Self {
        Self::new(AgentBehavior::Exit {
            code,
            metrics: metrics.map(str::to_string),
        })
    }

    pub fn then(self, behavior: AgentBehavior) -> Self {
        self.behaviors.lock().unwrap().push_back(behavior);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn live_containers(&self) -> usize {
        self.state.lock().unwrap().live.len()
    }

    pub fn removed_count(&self) -> usize {
        self.state.lock().unwrap().removed.len()
    }

    pub fn killed_count(&self) -> usize {
        self.state.lock().unwrap().killed.len()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn mount_of(&self, container_id: &str) -> Option<PathBuf> {
        let state = self.state.lock().unwrap();
        let index: usize = container_id.trim_start_matches("ctr-").parse().ok()?;
        state.specs.get(index).map(|s| s.mount_source.clone())
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn pull_image(&self, image: &str) -> Result<()> {
        self.record(format!("pull {}", image));
        if self.fail_pull {
            return Err(anyhow!("manifest for {} not found", image));
        }
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        self.record("create".to_string());
        if self.fail_create {
            return Err(anyhow!("no space left on device"));
        }
        let mut state = self.state.lock().unwrap();
        let id = format!("ctr-{}", state.next_id);
        state.next_id += 1;
        state.specs.push(spec.clone());
        state.live.insert(id.clone());
        Ok(id)
    }

    async fn start(&self, container_id: &str) -> Result<()> {
        self.record(format!("start {}", container_id));
        if self.fail_start {
            return Err(anyhow!("OCI runtime create failed"));
        }
        Ok(())
    }

    async fn wait(&self, container_id: &str) -> Result<i64> {
        self.record(format!("wait {}", container_id));
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_behavior.clone());
        match behavior {
            AgentBehavior::Exit { code, metrics } => {
                tokio::time::sleep(Duration::from_millis(5)).await;
                if let (Some(body), Some(mount)) = (metrics, self.mount_of(container_id)) {
                    std::fs::write(mount.join("metrics.json"), body)?;
                }
                Ok(code)
            }
            AgentBehavior::Hang => std::future::pending().await,
            AgentBehavior::WaitError(msg) => Err(anyhow!(msg)),
        }
    }

    async fn kill(&self, container_id: &str) -> Result<()> {
        self.record(format!("kill {}", container_id));
        self.state
            .lock()
            .unwrap()
            .killed
            .push(container_id.to_string());
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> Result<()> {
        self.record(format!("remove {}", container_id));
        let mut state = self.state.lock().unwrap();
        state.removed.push(container_id.to_string());
        if self.fail_remove {
            return Err(anyhow!("removal of container {} is already in progress", container_id));
        }
        state.live.remove(container_id);
        Ok(())
    }
}

/// Hands out queued jobs, then reports the queue empty (or `terminal`).
pub struct ScriptedSource {
    jobs: Mutex<VecDeque<Job>>,
    pub submitted: Mutex<Vec<(String, ExecutionResult)>>,
    pub fetches: Mutex<Vec<Option<String>>>,
    pub fail_submit: bool,
    terminal: Mutex<Option<QueueError>>,
}

impl ScriptedSource {
    pub fn new(jobs: Vec<Job>) -> Self {
        Self {
            jobs: Mutex::new(jobs.into()),
            submitted: Mutex::new(Vec::new()),
            fetches: Mutex::new(Vec::new()),
            fail_submit: false,
            terminal: Mutex::new(None),
        }
    }

    /// Return this error instead of `Empty` once the jobs run out.
    pub fn ending_with(self, err: QueueError) -> Self {
        *self.terminal.lock().unwrap() = Some(err);
        self
    }

    pub fn submitted(&self) -> Vec<(String, ExecutionResult)> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }
}

#[async_trait]
impl JobSource for ScriptedSource {
    async fn fetch_job(&self, scope: Option<&str>) -> Result<Job, QueueError> {
        self.fetches.lock().unwrap().push(scope.map(str::to_string));
        if let Some(job) = self.jobs.lock().unwrap().pop_front() {
            return Ok(job.with_scope(scope.map(str::to_string)));
        }
        Err(self.terminal.lock().unwrap().take().unwrap_or(QueueError::Empty))
    }

    async fn submit_result(&self, job: &Job, result: &ExecutionResult) -> Result<(), QueueError> {
        self.submitted
            .lock()
            .unwrap()
            .push((job.submission_id.clone(), *result));
        if self.fail_submit {
            return Err(QueueError::Status {
                status: 500,
                body: "Failed to save results to database".to_string(),
            });
        }
        Ok(())
    }
}

/// Counts reverts and deletes the metrics file so the next job starts clean.
#[derive(Default)]
pub struct RecordingReverter {
    pub reverts: Mutex<usize>,
    pub fail: bool,
}

impl RecordingReverter {
    pub fn failing() -> Self {
        Self {
            reverts: Mutex::new(0),
            fail: true,
        }
    }

    pub fn count(&self) -> usize {
        *self.reverts.lock().unwrap()
    }
}

impl WorkspaceReverter for RecordingReverter {
    fn revert(&self, workspace: &Path) -> Result<(), RevertError> {
        *self.reverts.lock().unwrap() += 1;
        if self.fail {
            return Err(RevertError::NotARepository {
                path: workspace.to_path_buf(),
            });
        }
        let _ = std::fs::remove_file(workspace.join("metrics.json"));
        Ok(())
    }
}

pub fn job(id: &str) -> Job {
    Job::new(id, "student/agent:v1", "gem-test-key")
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
