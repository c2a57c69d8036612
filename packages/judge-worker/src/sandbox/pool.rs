use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, OnceCell};
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    ContainerRuntime, ContainerSpec, SandboxError, WORKSPACE_MOUNT, ensure_image,
    sanitize_image_name,
};

/// Resource caps applied to every container the worker creates.
#[derive(Debug, Clone, Copy)]
pub struct ContainerLimits {
    pub memory_bytes: i64,
    pub cpu_count: i64,
    pub pull_timeout: Duration,
}

#[derive(Debug)]
struct PoolEntry {
    container_id: String,
    leases: AtomicUsize,
}

/// Long-lived containers, one per image, mounted on the shared root.
pub struct ContainerPool {
    runtime: Arc<dyn ContainerRuntime>,
    shared_root: PathBuf,
    limits: ContainerLimits,
    /// Per-image slots. The map lock is only held to find a slot; container
    /// startup (and any image pull) runs inside the slot's own cell.
    entries: Mutex<HashMap<String, Arc<OnceCell<Arc<PoolEntry>>>>>,
}

/// A tenant's hold on a pooled container. Released on drop.
#[derive(Debug)]
pub struct PoolLease {
    entry: Arc<PoolEntry>,
}

impl PoolLease {
    pub fn container_id(&self) -> &str {
        &self.entry.container_id
    }
}

impl Drop for PoolLease {
    fn drop(&mut self) {
        self.entry.leases.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ContainerPool {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, shared_root: PathBuf, limits: ContainerLimits) -> Self {
        Self {
            runtime,
            shared_root,
            limits,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Lease the pooled container for `image`, creating it on first use.
    pub async fn acquire(&self, image: &str) -> Result<PoolLease, SandboxError> {
        let slot = self
            .entries
            .lock()
            .await
            .entry(image.to_string())
            .or_default()
            .clone();

        // A failed start leaves the cell empty, so the next caller retries.
        let entry = slot
            .get_or_try_init(|| async {
                Ok::<_, SandboxError>(Arc::new(PoolEntry {
                    container_id: self.start_container(image).await?,
                    leases: AtomicUsize::new(0),
                }))
            })
            .await?
            .clone();

        entry.leases.fetch_add(1, Ordering::AcqRel);
        Ok(PoolLease { entry })
    }

    async fn start_container(&self, image: &str) -> Result<String, SandboxError> {
        ensure_image(self.runtime.as_ref(), image, self.limits.pull_timeout).await?;

        let short_id = Uuid::new_v4().simple().to_string();
        let spec = ContainerSpec {
            name: format!("oj-pool-{}-{}", sanitize_image_name(image), &short_id[..4]),
            image: image.to_string(),
            cmd: vec!["tail".into(), "-f".into(), "/dev/null".into()],
            working_dir: WORKSPACE_MOUNT.to_string(),
            binds: vec![format!("{}:{WORKSPACE_MOUNT}", self.shared_root.display())],
            memory_bytes: self.limits.memory_bytes,
            cpu_count: self.limits.cpu_count,
        };

        let id = self.runtime.create_container(&spec).await?;
        if let Err(e) = self.runtime.start_container(&id).await {
            let _ = self.runtime.remove_container(&id).await;
            return Err(e);
        }
        info!(image, container = %spec.name, "Pooled container started");
        Ok(id)
    }

    /// Drop a broken pooled container so the next `acquire` recreates it.
    pub async fn evict(&self, image: &str, container_id: &str) {
        let removed = {
            let mut entries = self.entries.lock().await;
            let current = entries
                .get(image)
                .and_then(|slot| slot.get())
                .is_some_and(|entry| entry.container_id == container_id);
            if current { entries.remove(image) } else { None }
        };

        if removed.is_some() {
            warn!(image, container_id, "Evicting pooled container");
            if let Err(e) = self.runtime.remove_container(container_id).await {
                warn!(image, container_id, error = %e, "Failed to remove evicted container");
            }
        }
    }

    /// Number of outstanding leases on the container for `image`.
    pub async fn active_leases(&self, image: &str) -> usize {
        self.entries
            .lock()
            .await
            .get(image)
            .and_then(|slot| slot.get())
            .map_or(0, |entry| entry.leases.load(Ordering::Acquire))
    }

    /// Stop and remove every pooled container.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, Arc<OnceCell<Arc<PoolEntry>>>)> =
            self.entries.lock().await.drain().collect();

        for (image, slot) in drained {
            let Some(entry) = slot.get() else { continue };
            match self.runtime.remove_container(&entry.container_id).await {
                Ok(()) => info!(image = %image, "Pooled container removed"),
                Err(e) => warn!(image = %image, error = %e, "Failed to remove pooled container"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRuntime;

    fn pool(runtime: Arc<FakeRuntime>) -> ContainerPool {
        ContainerPool::new(
            runtime,
            PathBuf::from("/tmp/oj-judge-shared"),
            ContainerLimits {
                memory_bytes: 256 * 1024 * 1024,
                cpu_count: 1,
                pull_timeout: Duration::from_secs(5),
            },
        )
    }

    #[tokio::test]
    async fn test_one_container_per_image() {
        let runtime = Arc::new(FakeRuntime::new());
        let pool = pool(runtime.clone());

        let a = pool.acquire("gcc:latest").await.unwrap();
        let b = pool.acquire("gcc:latest").await.unwrap();
        let c = pool.acquire("python:3.13-slim").await.unwrap();

        assert_eq!(a.container_id(), b.container_id());
        assert_ne!(a.container_id(), c.container_id());
        assert_eq!(runtime.created().len(), 2);
        assert_eq!(pool.active_leases("gcc:latest").await, 2);

        let spec = &runtime.created()[0];
        assert!(spec.name.starts_with("oj-pool-gcc-latest-"));
        assert_eq!(spec.binds, vec!["/tmp/oj-judge-shared:/workspace".to_string()]);
        assert_eq!(spec.cmd, vec!["tail", "-f", "/dev/null"]);

        drop(a);
        drop(b);
        assert_eq!(pool.active_leases("gcc:latest").await, 0);
    }

    #[tokio::test]
    async fn test_evict_recreates_on_next_acquire() {
        let runtime = Arc::new(FakeRuntime::new());
        let pool = pool(runtime.clone());

        let first = pool.acquire("gcc:latest").await.unwrap().container_id().to_string();
        pool.evict("gcc:latest", &first).await;
        let second = pool.acquire("gcc:latest").await.unwrap().container_id().to_string();

        assert_ne!(first, second);
        assert!(runtime.removed().contains(&first));
    }

    #[tokio::test]
    async fn test_shutdown_removes_all() {
        let runtime = Arc::new(FakeRuntime::new());
        let pool = pool(runtime.clone());

        let java = pool.acquire("cimg/openjdk:17.0").await.unwrap().container_id().to_string();
        let gcc = pool.acquire("gcc:latest").await.unwrap().container_id().to_string();
        pool.shutdown().await;

        let removed = runtime.removed();
        assert!(removed.contains(&java));
        assert!(removed.contains(&gcc));
        assert_eq!(pool.active_leases("gcc:latest").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cold_pull_does_not_block_other_images() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.add_image("gcc:latest");
        runtime.delay_pull("cimg/openjdk:17.0", Duration::from_secs(3));
        let pool = Arc::new(pool(runtime.clone()));

        let cold = tokio::spawn({
            let pool = pool.clone();
            async move {
                pool.acquire("cimg/openjdk:17.0")
                    .await
                    .map(|lease| lease.container_id().to_string())
            }
        });
        tokio::task::yield_now().await;

        let warm = tokio::time::timeout(Duration::from_millis(100), pool.acquire("gcc:latest"))
            .await
            .expect("acquire waited on another image's pull")
            .unwrap();
        assert!(!cold.is_finished());

        let cold_id = cold.await.unwrap().unwrap();
        assert_ne!(cold_id, warm.container_id());
        assert_eq!(runtime.pulls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_cold_acquires_share_one_container() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.delay_pull("gcc:latest", Duration::from_secs(1));
        let pool = pool(runtime.clone());

        let (a, b) = tokio::join!(pool.acquire("gcc:latest"), pool.acquire("gcc:latest"));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.container_id(), b.container_id());
        assert_eq!(runtime.pulls(), 1);
        assert_eq!(runtime.created().len(), 1);
        assert_eq!(pool.active_leases("gcc:latest").await, 2);
    }

    #[tokio::test]
    async fn test_failed_start_is_retried() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.fail_pulls();
        let pool = pool(runtime.clone());

        assert!(pool.acquire("gcc:latest").await.is_err());
        assert_eq!(pool.active_leases("gcc:latest").await, 0);

        runtime.add_image("gcc:latest");
        assert!(pool.acquire("gcc:latest").await.is_ok());
        assert_eq!(runtime.created().len(), 1);
    }
}
