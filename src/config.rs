//! Worker configuration.
//!
//! Only the queue location and judge key come from the environment. Resource
//! limits and the agent deadline are fixed here.

use secrecy::SecretString;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";
/// Matches the platform's fallback when `JUDGE_API_KEY` is unset on its side.
pub const DEFAULT_JUDGE_KEY: &str = "DEMO_BYPASS_KEY_123";
pub const DEFAULT_REPO_PATH: &str = "./execution-environment/company-private-repo";

/// Connection settings for the submission queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub base_url: String,
    pub judge_key: SecretString,
    pub request_timeout: Duration,
}

impl QueueConfig {
    pub fn new(base_url: impl Into<String>, judge_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            judge_key: SecretString::from(judge_key.into()),
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Reads `API_BASE_URL` and `JUDGE_API_KEY`, falling back to the defaults.
    pub fn from_env() -> Self {
        let base_url = std::env::var("API_BASE_URL")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let judge_key = std::env::var("JUDGE_API_KEY")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_JUDGE_KEY.to_string());
        Self::new(base_url, judge_key)
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL, DEFAULT_JUDGE_KEY)
    }
}

/// Constraints applied to every sandbox container.
#[derive(Debug, Clone)]
pub struct SandboxLimits {
    /// Hard memory ceiling in bytes
    pub memory_bytes: i64,
    /// Wall-clock budget for the agent once started
    pub agent_timeout: Duration,
    /// Upper bound on image acquisition
    pub pull_timeout: Duration,
    /// Where the workspace appears inside the container
    pub mount_target: String,
    /// Environment variable carrying the job credential
    pub credential_env: String,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            memory_bytes: 1024 * 1024 * 1024,
            agent_timeout: Duration::from_secs(3 * 60),
            pull_timeout: Duration::from_secs(10 * 60),
            mount_target: "/workspace".to_string(),
            credential_env: "GEMINI_API_KEY".to_string(),
        }
    }
}
