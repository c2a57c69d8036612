pub mod docker;
pub mod orchestrator;
pub mod pool;
pub mod workdir;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

pub use orchestrator::{SandboxLease, SandboxOrchestrator, SandboxSettings};
pub use workdir::WorkDir;

/// Mount point of the work directory (or shared root) inside containers.
pub const WORKSPACE_MOUNT: &str = "/workspace";
/// Exit status of `timeout(1)` when the limit is hit.
pub const TIMEOUT_EXIT_CODE: i64 = 124;
/// 128 + SIGKILL, what an OOM kill looks like from the outside.
pub const OOM_EXIT_CODE: i64 = 137;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Image pull failed for {image}: {message}")]
    ImagePull { image: String, message: String },

    #[error("Container runtime error: {0}")]
    Runtime(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything needed to create one container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub working_dir: String,
    /// `host_path:container_path` bind mounts.
    pub binds: Vec<String>,
    pub memory_bytes: i64,
    pub cpu_count: i64,
}

/// Raw process result reported by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawExit {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub oom_killed: bool,
}

impl RawExit {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    pub fn failed(exit_code: i64, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stderr: stderr.into(),
            ..Default::default()
        }
    }
}

/// Outcome of one sandboxed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    pub success: bool,
    pub exit_code: i64,
    pub output: String,
    pub error: String,
    pub execute_time_ms: u64,
    pub memory_used_bytes: u64,
    /// The outer deadline expired before the runtime answered.
    pub timed_out: bool,
    pub oom_killed: bool,
}

impl ExecOutcome {
    pub fn from_exit(raw: RawExit, execute_time_ms: u64, memory_used_bytes: u64) -> Self {
        Self {
            success: raw.exit_code == 0,
            exit_code: raw.exit_code,
            output: raw.stdout,
            error: raw.stderr,
            execute_time_ms,
            memory_used_bytes,
            timed_out: false,
            oom_killed: raw.oom_killed || raw.exit_code == OOM_EXIT_CODE,
        }
    }

    pub fn deadline_expired(execute_time_ms: u64, memory_used_bytes: u64) -> Self {
        Self {
            success: false,
            exit_code: -1,
            output: String::new(),
            error: "execution timed out".to_string(),
            execute_time_ms,
            memory_used_bytes,
            timed_out: true,
            oom_killed: false,
        }
    }

    /// Killed by the in-sandbox `timeout` wrapper or by the outer deadline.
    pub fn is_timeout(&self) -> bool {
        self.timed_out || self.exit_code == TIMEOUT_EXIT_CODE
    }
}

/// Container engine operations the orchestrator needs.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn image_exists(&self, image: &str) -> Result<bool, SandboxError>;

    async fn pull_image(&self, image: &str) -> Result<(), SandboxError>;

    /// Create (but do not start) a container, returning its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, SandboxError>;

    async fn start_container(&self, id: &str) -> Result<(), SandboxError>;

    /// Start a created container and wait for its command to exit.
    async fn run_container(&self, id: &str) -> Result<RawExit, SandboxError>;

    /// Run a command inside a running container.
    async fn exec(&self, id: &str, cmd: &[String], working_dir: &str) -> Result<RawExit, SandboxError>;

    /// Current memory usage of a container, when the runtime reports it.
    async fn memory_usage(&self, id: &str) -> Result<Option<u64>, SandboxError>;

    /// Force-remove a container, stopping it first if needed.
    async fn remove_container(&self, id: &str) -> Result<(), SandboxError>;
}

/// Make `image` available locally, pulling it within `pull_timeout`.
pub async fn ensure_image(
    runtime: &dyn ContainerRuntime,
    image: &str,
    pull_timeout: Duration,
) -> Result<(), SandboxError> {
    if runtime.image_exists(image).await? {
        return Ok(());
    }

    info!(image, "Pulling image");
    match tokio::time::timeout(pull_timeout, runtime.pull_image(image)).await {
        Ok(Ok(())) => {
            info!(image, "Image pulled");
            Ok(())
        }
        Ok(Err(e)) => Err(SandboxError::ImagePull {
            image: image.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Err(SandboxError::ImagePull {
            image: image.to_string(),
            message: format!("timed out after {}s", pull_timeout.as_secs()),
        }),
    }
}

/// Lowercase `[a-z0-9-]` form of an image reference, for container names.
pub fn sanitize_image_name(image: &str) -> String {
    image
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRuntime;

    #[test]
    fn test_exec_outcome_classification() {
        let timeout = ExecOutcome::from_exit(RawExit::failed(TIMEOUT_EXIT_CODE, ""), 1000, 0);
        assert!(timeout.is_timeout());
        assert!(!timeout.success);

        let oom = ExecOutcome::from_exit(RawExit::failed(OOM_EXIT_CODE, "Killed"), 10, 0);
        assert!(oom.oom_killed);

        let expired = ExecOutcome::deadline_expired(2000, 0);
        assert_eq!(expired.exit_code, -1);
        assert_eq!(expired.error, "execution timed out");
        assert!(expired.is_timeout());
    }

    #[test]
    fn test_sanitize_image_name() {
        assert_eq!(sanitize_image_name("cimg/openjdk:17.0"), "cimg-openjdk-17-0");
        assert_eq!(sanitize_image_name("python:3.13-slim"), "python-3-13-slim");
    }

    #[tokio::test]
    async fn test_ensure_image_pulls_only_when_missing() {
        let runtime = FakeRuntime::new();
        ensure_image(&runtime, "gcc:latest", Duration::from_secs(5)).await.unwrap();
        assert_eq!(runtime.pulls(), 1);

        runtime.add_image("python:3.13-slim");
        ensure_image(&runtime, "python:3.13-slim", Duration::from_secs(5)).await.unwrap();
        assert_eq!(runtime.pulls(), 1);
    }

    #[tokio::test]
    async fn test_ensure_image_reports_pull_failure() {
        let runtime = FakeRuntime::new();
        runtime.fail_pulls();
        let err = ensure_image(&runtime, "gcc:latest", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::ImagePull { ref image, .. } if image == "gcc:latest"));
    }
}
