use serde::Deserialize;

/// App-level MQ configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct MqAppConfig {
    /// Redis connection URL. Default: "redis://localhost:6379".
    #[serde(default = "default_mq_url")]
    pub url: String,
    /// Connection pool size. Default: 5.
    #[serde(default = "default_mq_pool_size")]
    pub pool_size: u8,
    /// Queue the worker consumes judge tasks from. Default: "judge.queue".
    #[serde(default = "default_mq_queue_name")]
    pub queue_name: String,
    /// Dead-letter queue for exhausted or undecodable tasks. Default: "judge.dead.letter.queue".
    #[serde(default = "default_mq_dlq_queue_name")]
    pub dlq_queue_name: String,
    /// Queue for judge outcomes (worker publishes). Default: "judge.result.queue".
    #[serde(default = "default_mq_result_queue_name")]
    pub result_queue_name: String,
    #[serde(default)]
    pub dlq: DlqConfig,
}

/// Retry and dead-letter settings.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct DlqConfig {
    /// Redeliveries allowed before a task is dead-lettered. Default: 3.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff base before requeueing. Default: 500.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Backoff ceiling. Default: 10000.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_mq_url() -> String {
    "redis://localhost:6379".into()
}
fn default_mq_pool_size() -> u8 {
    5
}
fn default_mq_queue_name() -> String {
    "judge.queue".into()
}
fn default_mq_dlq_queue_name() -> String {
    "judge.dead.letter.queue".into()
}
fn default_mq_result_queue_name() -> String {
    "judge.result.queue".into()
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    10_000
}

impl Default for MqAppConfig {
    fn default() -> Self {
        Self {
            url: default_mq_url(),
            pool_size: default_mq_pool_size(),
            queue_name: default_mq_queue_name(),
            dlq_queue_name: default_mq_dlq_queue_name(),
            result_queue_name: default_mq_result_queue_name(),
            dlq: DlqConfig::default(),
        }
    }
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}
