use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::pool::{ContainerLimits, ContainerPool, PoolLease};
use super::{
    ContainerRuntime, ContainerSpec, ExecOutcome, SandboxError, WORKSPACE_MOUNT, WorkDir,
    ensure_image,
};

const MEMORY_SAMPLE_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct SandboxSettings {
    pub shared_root: PathBuf,
    pub memory_limit_mb: u64,
    pub cpu_count: u64,
    pub pull_timeout: Duration,
}

/// A submission's sandbox: its work directory plus, when available, a pooled
/// container. Dropping the lease removes the directory, never the container.
#[derive(Debug)]
pub struct SandboxLease {
    image: String,
    work_dir: WorkDir,
    container: Option<PoolLease>,
}

impl SandboxLease {
    pub fn work_dir(&self) -> &WorkDir {
        &self.work_dir
    }

    pub fn container_id(&self) -> Option<&str> {
        self.container.as_ref().map(PoolLease::container_id)
    }

    pub fn is_pooled(&self) -> bool {
        self.container.is_some()
    }
}

/// Creates and runs isolated execution environments.
pub struct SandboxOrchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    pool: ContainerPool,
    settings: SandboxSettings,
}

impl SandboxOrchestrator {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settings: SandboxSettings) -> Self {
        let pool = ContainerPool::new(runtime.clone(), settings.shared_root.clone(), Self::limits(&settings));
        Self {
            runtime,
            pool,
            settings,
        }
    }

    fn limits(settings: &SandboxSettings) -> ContainerLimits {
        ContainerLimits {
            memory_bytes: (settings.memory_limit_mb * 1024 * 1024) as i64,
            cpu_count: settings.cpu_count as i64,
            pull_timeout: settings.pull_timeout,
        }
    }

    pub fn pool(&self) -> &ContainerPool {
        &self.pool
    }

    pub async fn ensure_image(&self, image: &str) -> Result<(), SandboxError> {
        ensure_image(self.runtime.as_ref(), image, self.settings.pull_timeout).await
    }

    /// Allocate a work directory and lease the pooled container for `image`,
    /// falling back to transient containers if the pool cannot serve it.
    #[instrument(skip(self))]
    pub async fn lease(&self, image: &str) -> Result<SandboxLease, SandboxError> {
        tokio::fs::create_dir_all(&self.settings.shared_root).await?;
        let work_dir = WorkDir::create(&self.settings.shared_root).await?;

        let container = match self.pool.acquire(image).await {
            Ok(lease) => Some(lease),
            Err(e @ SandboxError::ImagePull { .. }) => return Err(e),
            Err(e) => {
                warn!(image, error = %e, "Pooled container unavailable, using transient containers");
                None
            }
        };

        Ok(SandboxLease {
            image: image.to_string(),
            work_dir,
            container,
        })
    }

    /// Run `command` in the sandbox a lease describes.
    pub async fn run(
        &self,
        lease: &SandboxLease,
        command: &[String],
        timeout_secs: u64,
    ) -> Result<ExecOutcome, SandboxError> {
        match lease.container_id() {
            Some(container_id) => {
                let result = self
                    .execute_in_pooled(container_id, command, lease.work_dir.name(), timeout_secs)
                    .await;
                if let Err(SandboxError::Runtime(_)) = &result {
                    self.pool.evict(&lease.image, container_id).await;
                }
                result
            }
            None => {
                self.execute(&lease.image, command, lease.work_dir.path(), timeout_secs)
                    .await
            }
        }
    }

    /// Run `command` in a fresh container mounted on `work_dir`, then remove it.
    #[instrument(skip(self, command, work_dir))]
    pub async fn execute(
        &self,
        image: &str,
        command: &[String],
        work_dir: &Path,
        timeout_secs: u64,
    ) -> Result<ExecOutcome, SandboxError> {
        self.ensure_image(image).await?;

        let limits = Self::limits(&self.settings);
        let short_id = Uuid::new_v4().simple().to_string();
        let spec = ContainerSpec {
            name: format!("judge-{}", &short_id[..8]),
            image: image.to_string(),
            cmd: command.to_vec(),
            working_dir: WORKSPACE_MOUNT.to_string(),
            binds: vec![format!("{}:{WORKSPACE_MOUNT}", work_dir.display())],
            memory_bytes: limits.memory_bytes,
            cpu_count: limits.cpu_count,
        };

        let container_id = self.runtime.create_container(&spec).await?;
        let started = Instant::now();
        let sampler = MemorySampler::start(self.runtime.clone(), &container_id);
        let outcome = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            self.runtime.run_container(&container_id),
        )
        .await;
        let elapsed = started.elapsed().as_millis() as u64;
        let peak = sampler.finish();

        if let Err(e) = self.runtime.remove_container(&container_id).await {
            warn!(container_id, error = %e, "Failed to remove transient container");
        }

        match outcome {
            Ok(Ok(raw)) => Ok(ExecOutcome::from_exit(raw, elapsed, peak)),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                debug!(container_id, timeout_secs, "Transient container deadline expired");
                Ok(ExecOutcome::deadline_expired(elapsed, peak))
            }
        }
    }

    /// Run `command` in a pooled container, inside `/workspace/<sub_dir>`.
    #[instrument(skip(self, command))]
    pub async fn execute_in_pooled(
        &self,
        container_id: &str,
        command: &[String],
        sub_dir: &str,
        timeout_secs: u64,
    ) -> Result<ExecOutcome, SandboxError> {
        let working_dir = format!("{WORKSPACE_MOUNT}/{sub_dir}");
        let started = Instant::now();
        let sampler = MemorySampler::start(self.runtime.clone(), container_id);
        let outcome = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            self.runtime.exec(container_id, command, &working_dir),
        )
        .await;
        let elapsed = started.elapsed().as_millis() as u64;
        let peak = sampler.finish();

        match outcome {
            Ok(Ok(raw)) => Ok(ExecOutcome::from_exit(raw, elapsed, peak)),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                debug!(container_id, timeout_secs, peak, "Pooled exec deadline expired");
                Ok(ExecOutcome::deadline_expired(elapsed, peak))
            }
        }
    }

    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

/// Polls a container's memory usage in the background and keeps the peak.
/// The poller is aborted when the sampler is finished or dropped.
struct MemorySampler {
    peak: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl MemorySampler {
    fn start(runtime: Arc<dyn ContainerRuntime>, container_id: &str) -> Self {
        let peak = Arc::new(AtomicU64::new(0));
        let task = tokio::spawn({
            let container_id = container_id.to_string();
            let peak = peak.clone();
            async move {
                loop {
                    if let Ok(Some(usage)) = runtime.memory_usage(&container_id).await {
                        peak.fetch_max(usage, Ordering::Relaxed);
                    }
                    tokio::time::sleep(MEMORY_SAMPLE_INTERVAL).await;
                }
            }
        });
        Self { peak, task }
    }

    /// Stop polling and return the highest usage seen.
    fn finish(self) -> u64 {
        self.peak.load(Ordering::Relaxed)
    }
}

impl Drop for MemorySampler {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::RawExit;
    use crate::testing::{FakeRuntime, Scripted};
    use tempfile::TempDir;

    fn orchestrator(runtime: Arc<FakeRuntime>, root: &Path) -> SandboxOrchestrator {
        SandboxOrchestrator::new(
            runtime,
            SandboxSettings {
                shared_root: root.to_path_buf(),
                memory_limit_mb: 256,
                cpu_count: 1,
                pull_timeout: Duration::from_secs(5),
            },
        )
    }

    fn sh(cmd: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), cmd.into()]
    }

    #[tokio::test]
    async fn test_pooled_exec_runs_in_job_subdir() {
        let root = TempDir::new().unwrap();
        let runtime = Arc::new(FakeRuntime::new().with_script(|call| {
            assert!(call.host_dir.join("input.txt").exists());
            Scripted::Exit(RawExit::ok("42\n"))
        }));
        runtime.set_memory_usage(64 * 1024 * 1024);
        let orchestrator = orchestrator(runtime.clone(), root.path());

        let lease = orchestrator.lease("gcc:latest").await.unwrap();
        assert!(lease.is_pooled());
        lease.work_dir().write_file("input.txt", "40 2").await.unwrap();

        let outcome = orchestrator.run(&lease, &sh("./main < input.txt"), 2).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.output, "42\n");

        let calls = runtime.calls();
        assert_eq!(calls[0].working_dir, lease.work_dir().pooled_dir());

        let dir = lease.work_dir().path().to_path_buf();
        drop(lease);
        assert!(!dir.exists());
        assert_eq!(orchestrator.pool().active_leases("gcc:latest").await, 0);
    }

    #[tokio::test]
    async fn test_transient_execute_applies_caps_and_removes_container() {
        let root = TempDir::new().unwrap();
        let runtime = Arc::new(FakeRuntime::new().with_script(|_| {
            Scripted::Exit(RawExit {
                exit_code: 137,
                oom_killed: true,
                ..Default::default()
            })
        }));
        let orchestrator = orchestrator(runtime.clone(), root.path());

        let outcome = orchestrator
            .execute("python:3.13-slim", &sh("python3 main.py"), root.path(), 2)
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(outcome.oom_killed);

        let spec = &runtime.created()[0];
        assert!(spec.name.starts_with("judge-"));
        assert_eq!(spec.memory_bytes, 256 * 1024 * 1024);
        assert_eq!(spec.cpu_count, 1);
        assert!(runtime.removed().contains(&runtime.container_ids()[0]));
    }

    #[tokio::test]
    async fn test_outer_deadline_reports_timeout() {
        let root = TempDir::new().unwrap();
        let runtime = Arc::new(FakeRuntime::new().with_script(|_| Scripted::Hang));
        runtime.set_memory_usage(96 * 1024 * 1024);
        let orchestrator = orchestrator(runtime.clone(), root.path());

        let lease = orchestrator.lease("gcc:latest").await.unwrap();
        let outcome = orchestrator.run(&lease, &sh("./main"), 1).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, -1);
        assert_eq!(outcome.error, "execution timed out");
        assert!(outcome.is_timeout());
        assert_eq!(outcome.memory_used_bytes, 96 * 1024 * 1024);
        assert_eq!(runtime.calls()[0].container_id, lease.container_id().unwrap());
    }

    #[tokio::test]
    async fn test_runtime_failure_evicts_pooled_container() {
        let root = TempDir::new().unwrap();
        let runtime = Arc::new(FakeRuntime::new().with_script(|_| Scripted::Fail("container gone".into())));
        let orchestrator = orchestrator(runtime.clone(), root.path());

        let lease = orchestrator.lease("gcc:latest").await.unwrap();
        let first = lease.container_id().unwrap().to_string();
        let err = orchestrator.run(&lease, &sh("./main"), 1).await.unwrap_err();
        assert!(matches!(err, SandboxError::Runtime(_)));
        drop(lease);

        let lease = orchestrator.lease("gcc:latest").await.unwrap();
        assert_ne!(lease.container_id().unwrap(), first);
    }

    #[tokio::test]
    async fn test_falls_back_to_transient_when_pool_fails() {
        let root = TempDir::new().unwrap();
        let runtime = Arc::new(FakeRuntime::new().with_script(|_| Scripted::Exit(RawExit::ok("ok"))));
        runtime.fail_starts();
        let orchestrator = orchestrator(runtime.clone(), root.path());

        let lease = orchestrator.lease("gcc:latest").await.unwrap();
        assert!(!lease.is_pooled());
        let outcome = orchestrator.run(&lease, &sh("./main"), 1).await.unwrap();
        assert_eq!(outcome.output, "ok");
    }

    #[tokio::test]
    async fn test_image_pull_failure_is_fatal_for_lease() {
        let root = TempDir::new().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        runtime.fail_pulls();
        let orchestrator = orchestrator(runtime, root.path());

        let err = orchestrator.lease("gcc:latest").await.unwrap_err();
        assert!(matches!(err, SandboxError::ImagePull { .. }));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }
}
