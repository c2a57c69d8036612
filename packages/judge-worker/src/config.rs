use std::collections::HashMap;
use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub use common::config::MqAppConfig;

use crate::judge::anticheat::AntiCheatPolicy;

/// Worker-specific configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Unique identifier for this worker instance. Default: "judge-worker-1".
    #[serde(default = "default_worker_id")]
    pub id: String,
    /// Messages processed in parallel. Default: 4.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Host directory holding per-submission work dirs. Default: `<tmp>/oj-judge-shared`.
    #[serde(default)]
    pub shared_root: Option<PathBuf>,
    /// Docker endpoint; local defaults (socket or DOCKER_HOST) when unset.
    #[serde(default)]
    pub docker_host: Option<String>,
    /// Container memory ceiling. Default: 256.
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u64,
    /// CPUs per container. Default: 1.
    #[serde(default = "default_cpu_count")]
    pub cpu_count: u64,
    /// Bounded wait for image pulls. Default: 300.
    #[serde(default = "default_pull_timeout_secs")]
    pub pull_timeout_secs: u64,
    /// Lower bound for the compile timeout. Default: 10.
    #[serde(default = "default_compile_timeout_floor_secs")]
    pub compile_timeout_floor_secs: u64,
    #[serde(default)]
    pub anti_cheat: AntiCheatPolicy,
    /// Image overrides keyed by language ("java", "cpp", "c", "python").
    #[serde(default)]
    pub images: HashMap<String, String>,
    /// Root of the filesystem test-case catalog. Default: "data/problems".
    #[serde(default = "default_testcase_root")]
    pub testcase_root: PathBuf,
    /// Redis holding submission records and notification channels.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
}

/// Submission-frequency limits.
#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Default: 5.
    #[serde(default = "default_per_minute")]
    pub per_minute: u64,
    /// Default: 30.
    #[serde(default = "default_per_hour")]
    pub per_hour: u64,
}

fn default_worker_id() -> String {
    "judge-worker-1".into()
}
fn default_concurrency() -> usize {
    4
}
fn default_memory_limit_mb() -> u64 {
    256
}
fn default_cpu_count() -> u64 {
    1
}
fn default_pull_timeout_secs() -> u64 {
    300
}
fn default_compile_timeout_floor_secs() -> u64 {
    10
}
fn default_testcase_root() -> PathBuf {
    PathBuf::from("data/problems")
}
fn default_redis_url() -> String {
    "redis://localhost:6379".into()
}
fn default_per_minute() -> u64 {
    5
}
fn default_per_hour() -> u64 {
    30
}

impl WorkerConfig {
    pub fn shared_root(&self) -> PathBuf {
        self.shared_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("oj-judge-shared"))
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            id: default_worker_id(),
            concurrency: default_concurrency(),
            shared_root: None,
            docker_host: None,
            memory_limit_mb: default_memory_limit_mb(),
            cpu_count: default_cpu_count(),
            pull_timeout_secs: default_pull_timeout_secs(),
            compile_timeout_floor_secs: default_compile_timeout_floor_secs(),
            anti_cheat: AntiCheatPolicy::default(),
            images: HashMap::new(),
            testcase_root: default_testcase_root(),
            redis_url: default_redis_url(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            per_minute: default_per_minute(),
            per_hour: default_per_hour(),
        }
    }
}

/// Worker application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct WorkerAppConfig {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub mq: MqAppConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl WorkerAppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("JUDGE_CONFIG").unwrap_or_else(|_| "config/config".to_string());

        let s = Config::builder()
            .set_default("worker.id", default_worker_id())?
            .set_default("worker.concurrency", default_concurrency() as i64)?
            .set_default("mq.url", "redis://localhost:6379")?
            .set_default("mq.pool_size", 5_i64)?
            .set_default("mq.queue_name", "judge.queue")?
            .set_default("mq.dlq_queue_name", "judge.dead.letter.queue")?
            .set_default("mq.result_queue_name", "judge.result.queue")?
            .add_source(File::with_name(&config_path).required(false))
            .add_source(Environment::with_prefix("JUDGE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
