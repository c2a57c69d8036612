use std::sync::Arc;
use std::time::Duration;

use common::observe::{JudgeMetrics, LoggerObserver, MetricsSnapshot, ObserverSet};
use common::retry::RetryPolicy;
use mq::{BroccoliTaskQueue, MqConfig, TaskQueue};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::collab::{
    FsTestCaseCatalog, QueueProgressUpdater, RedisNotificationSink, RedisSubmissionStore,
};
use crate::config::WorkerAppConfig;
use crate::consumer::{DeadLetterHandler, TaskQueueConsumer};
use crate::error::Result;
use crate::judge::{Collaborators, JudgeEngine, LanguageTable};
use crate::sandbox::docker::DockerRuntime;
use crate::sandbox::{SandboxOrchestrator, SandboxSettings};

/// A fully wired judge worker: consumers, dead-letter handler and the
/// sandbox they share.
pub struct Worker {
    id: String,
    concurrency: usize,
    orchestrator: Arc<SandboxOrchestrator>,
    consumer: Arc<TaskQueueConsumer>,
    dead_letters: Arc<DeadLetterHandler>,
    metrics: Arc<JudgeMetrics>,
}

impl Worker {
    pub async fn connect(config: &WorkerAppConfig) -> Result<Self> {
        let shared_root = config.worker.shared_root();
        tokio::fs::create_dir_all(&shared_root).await?;

        let runtime = Arc::new(DockerRuntime::connect(config.worker.docker_host.as_deref())?);
        let orchestrator = Arc::new(SandboxOrchestrator::new(
            runtime,
            SandboxSettings {
                shared_root,
                memory_limit_mb: config.worker.memory_limit_mb,
                cpu_count: config.worker.cpu_count,
                pull_timeout: Duration::from_secs(config.worker.pull_timeout_secs),
            },
        ));

        let queue: Arc<dyn TaskQueue> = Arc::new(
            BroccoliTaskQueue::connect(&MqConfig {
                url: config.mq.url.clone(),
                pool_size: config.mq.pool_size,
                max_redeliveries: config.mq.dlq.max_retries,
            })
            .await?
            .with_dead_letter(&config.mq.queue_name, &config.mq.dlq_queue_name),
        );
        info!(
            queue_name = %config.mq.queue_name,
            result_queue_name = %config.mq.result_queue_name,
            dlq_queue_name = %config.mq.dlq_queue_name,
            max_retries = config.mq.dlq.max_retries,
            "MQ connected"
        );

        let collab = Collaborators {
            submissions: Arc::new(RedisSubmissionStore::connect(&config.worker.redis_url).await?),
            test_cases: Arc::new(FsTestCaseCatalog::new(&config.worker.testcase_root)),
            notifier: Arc::new(RedisNotificationSink::connect(&config.worker.redis_url).await?),
            progress: Arc::new(QueueProgressUpdater::new(
                queue.clone(),
                &config.mq.result_queue_name,
            )),
        };

        let metrics = Arc::new(JudgeMetrics::new());
        let observers = ObserverSet::new()
            .with(Arc::new(LoggerObserver))
            .with(metrics.clone());

        let engine = Arc::new(
            JudgeEngine::new(orchestrator.clone(), collab)
                .with_languages(LanguageTable::default().with_image_overrides(&config.worker.images))
                .with_anti_cheat(config.worker.anti_cheat)
                .with_compile_timeout_floor(config.worker.compile_timeout_floor_secs)
                .with_observers(observers),
        );

        Ok(Self {
            id: config.worker.id.clone(),
            concurrency: config.worker.concurrency.max(1),
            orchestrator,
            consumer: Arc::new(TaskQueueConsumer::new(
                queue.clone(),
                engine.clone(),
                &config.mq.queue_name,
                RetryPolicy::from(&config.mq.dlq),
            )),
            dead_letters: Arc::new(DeadLetterHandler::new(
                queue,
                engine,
                &config.mq.dlq_queue_name,
            )),
            metrics,
        })
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Run until `shutdown` fires, then let in-flight tasks finish and tear
    /// down pooled containers.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut tasks = JoinSet::new();
        for worker in 0..self.concurrency {
            let consumer = Arc::clone(&self.consumer);
            let shutdown = shutdown.clone();
            tasks.spawn(async move { consumer.run(worker, shutdown).await });
        }
        let dead_letters = Arc::clone(&self.dead_letters);
        let dlq_shutdown = shutdown.clone();
        tasks.spawn(async move { dead_letters.run(dlq_shutdown).await });
        info!(worker_id = %self.id, concurrency = self.concurrency, "Workers running");

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker task failed");
            }
        }
        self.orchestrator.shutdown().await;
        info!(worker_id = %self.id, "Worker stopped");
    }
}
