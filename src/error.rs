//! Error types for the judge worker.
//!
//! Each component owns one enum. Sandbox errors are job-scoped and never leave
//! the pipeline; queue and revert errors abort the process and travel up
//! through [`JudgeError`].

use std::path::PathBuf;
use std::time::Duration;

/// Failures while running one submission's container.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The job carried no secret to inject
    #[error("job did not provide a sandbox credential")]
    MissingCredential,
    /// The workspace path could not be resolved for the bind mount
    #[error("cannot resolve workspace {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Image pull failed or exceeded its bound; no container was created
    #[error("failed to acquire image {image}: {reason}")]
    ImageAcquisition { image: String, reason: String },
    /// The runtime refused to create the container
    #[error("failed to create container from {image}: {reason}")]
    Create { image: String, reason: String },
    /// Start or wait failed after the container existed
    #[error("container {container_id} failed: {reason}")]
    Runtime { container_id: String, reason: String },
    /// The agent did not exit before the deadline and was killed
    #[error("agent execution exceeded {}s timeout", .limit.as_secs())]
    TimedOut {
        container_id: String,
        limit: Duration,
    },
}

impl SandboxError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, SandboxError::TimedOut { .. })
    }
}

/// Failures talking to the remote submission queue.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The queue has no pending submission (HTTP 404)
    #[error("no pending submissions in the queue")]
    Empty,
    #[error("network error talking to the queue: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("queue returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to parse queue response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl QueueError {
    pub fn is_empty(&self) -> bool {
        matches!(self, QueueError::Empty)
    }
}

/// Failures restoring the shared workspace.
#[derive(Debug, thiserror::Error)]
pub enum RevertError {
    #[error("{} is not a git repository", .path.display())]
    NotARepository { path: PathBuf },
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {}: {stderr}", .code.map_or_else(|| "signal".to_string(), |c| c.to_string()))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

/// Errors that end a `run` or `batch` invocation.
#[derive(Debug, thiserror::Error)]
pub enum JudgeError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("workspace revert failed, refusing to continue: {0}")]
    Revert(#[from] RevertError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display_uses_seconds() {
        let err = SandboxError::TimedOut {
            container_id: "abc".to_string(),
            limit: Duration::from_secs(180),
        };
        assert_eq!(err.to_string(), "agent execution exceeded 180s timeout");
        assert!(err.is_timeout());
        assert!(!SandboxError::MissingCredential.is_timeout());
    }

    #[test]
    fn test_queue_empty_detection() {
        assert!(QueueError::Empty.is_empty());
        let status = QueueError::Status {
            status: 500,
            body: "boom".to_string(),
        };
        assert!(!status.is_empty());
        assert!(status.to_string().contains("500"));
    }

    #[test]
    fn test_revert_error_wraps_into_judge_error() {
        let err: JudgeError = RevertError::CommandFailed {
            command: "git clean -ffd".to_string(),
            code: Some(128),
            stderr: "fatal".to_string(),
        }
        .into();
        let msg = err.to_string();
        assert!(msg.contains("refusing to continue"));
        assert!(msg.contains("128"));
    }
}
