use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::SubmissionStatus;

/// Lifecycle events emitted while judging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JudgeEvent {
    Started {
        submission_id: i64,
        language: String,
    },
    SecurityRejected {
        submission_id: i64,
        category: String,
    },
    CheatFlagged {
        submission_id: i64,
        kind: String,
        enforced: bool,
    },
    Completed {
        submission_id: i64,
        status: SubmissionStatus,
        score: i32,
        elapsed_ms: u64,
    },
    Failed {
        submission_id: i64,
        error: String,
        retryable: bool,
    },
    DeadLettered {
        submission_id: i64,
    },
}

impl JudgeEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Started { .. } => "judge_started",
            Self::SecurityRejected { .. } => "security_rejected",
            Self::CheatFlagged { .. } => "cheat_flagged",
            Self::Completed { .. } => "judge_completed",
            Self::Failed { .. } => "judge_failed",
            Self::DeadLettered { .. } => "dead_lettered",
        }
    }
}

/// Receives judge events. Failures are logged and never affect judging.
#[async_trait]
pub trait JudgeObserver: Send + Sync {
    fn id(&self) -> &str;

    async fn on_event(&self, event: &JudgeEvent) -> Result<()>;
}

/// Fan-out over registered observers.
#[derive(Clone, Default)]
pub struct ObserverSet {
    observers: Vec<Arc<dyn JudgeObserver>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Arc<dyn JudgeObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub async fn emit(&self, event: JudgeEvent) {
        for observer in &self.observers {
            if let Err(e) = observer.on_event(&event).await {
                warn!(
                    observer = observer.id(),
                    topic = event.topic(),
                    error = %e,
                    "Observer failed to handle event"
                );
            }
        }
    }
}

/// Logs every event through `tracing`.
pub struct LoggerObserver;

#[async_trait]
impl JudgeObserver for LoggerObserver {
    fn id(&self) -> &str {
        "logger"
    }

    async fn on_event(&self, event: &JudgeEvent) -> Result<()> {
        match event {
            JudgeEvent::Started {
                submission_id,
                language,
            } => info!(submission_id, language = %language, "Judging started"),
            JudgeEvent::SecurityRejected {
                submission_id,
                category,
            } => warn!(submission_id, category = %category, "Submission rejected by security scan"),
            JudgeEvent::CheatFlagged {
                submission_id,
                kind,
                enforced,
            } => warn!(submission_id, kind = %kind, enforced, "Submission flagged by anti-cheat"),
            JudgeEvent::Completed {
                submission_id,
                status,
                score,
                elapsed_ms,
            } => info!(submission_id, status = %status, score, elapsed_ms, "Judging completed"),
            JudgeEvent::Failed {
                submission_id,
                error,
                retryable,
            } => warn!(submission_id, error = %error, retryable, "Judging failed"),
            JudgeEvent::DeadLettered { submission_id } => {
                warn!(submission_id, "Submission dead-lettered")
            }
        }
        Ok(())
    }
}

/// In-process counters.
#[derive(Debug, Default)]
pub struct JudgeMetrics {
    submissions: AtomicU64,
    failures: AtomicU64,
    dead_lettered: AtomicU64,
    cheat_flags: AtomicU64,
    judge_time_ms: AtomicU64,
    verdicts: [AtomicU64; SubmissionStatus::ALL.len()],
}

/// Point-in-time copy of [`JudgeMetrics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub submissions: u64,
    pub failures: u64,
    pub dead_lettered: u64,
    pub cheat_flags: u64,
    pub judge_time_ms: u64,
    pub verdicts: Vec<(SubmissionStatus, u64)>,
}

impl JudgeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn verdict_count(&self, status: SubmissionStatus) -> u64 {
        self.verdicts[status.index()].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            submissions: self.submissions.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            cheat_flags: self.cheat_flags.load(Ordering::Relaxed),
            judge_time_ms: self.judge_time_ms.load(Ordering::Relaxed),
            verdicts: SubmissionStatus::FINAL
                .iter()
                .map(|s| (*s, self.verdict_count(*s)))
                .collect(),
        }
    }
}

#[async_trait]
impl JudgeObserver for JudgeMetrics {
    fn id(&self) -> &str {
        "metrics"
    }

    async fn on_event(&self, event: &JudgeEvent) -> Result<()> {
        match event {
            JudgeEvent::Started { .. } => {
                self.submissions.fetch_add(1, Ordering::Relaxed);
            }
            JudgeEvent::SecurityRejected { .. } => {}
            JudgeEvent::CheatFlagged { .. } => {
                self.cheat_flags.fetch_add(1, Ordering::Relaxed);
            }
            JudgeEvent::Completed {
                status, elapsed_ms, ..
            } => {
                self.verdicts[status.index()].fetch_add(1, Ordering::Relaxed);
                self.judge_time_ms.fetch_add(*elapsed_ms, Ordering::Relaxed);
            }
            JudgeEvent::Failed { .. } => {
                self.failures.fetch_add(1, Ordering::Relaxed);
            }
            JudgeEvent::DeadLettered { .. } => {
                self.dead_lettered.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingObserver;

    #[async_trait]
    impl JudgeObserver for FailingObserver {
        fn id(&self) -> &str {
            "failing"
        }

        async fn on_event(&self, _event: &JudgeEvent) -> Result<()> {
            anyhow::bail!("sink unavailable")
        }
    }

    #[tokio::test]
    async fn test_metrics_count_verdicts() {
        let metrics = Arc::new(JudgeMetrics::new());
        let observers = ObserverSet::new()
            .with(Arc::new(FailingObserver))
            .with(Arc::new(LoggerObserver))
            .with(metrics.clone());
        assert_eq!(observers.len(), 3);

        observers
            .emit(JudgeEvent::Started {
                submission_id: 1,
                language: "java".into(),
            })
            .await;
        observers
            .emit(JudgeEvent::Completed {
                submission_id: 1,
                status: SubmissionStatus::Accepted,
                score: 100,
                elapsed_ms: 250,
            })
            .await;

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.submissions, 1);
        assert_eq!(snapshot.judge_time_ms, 250);
        assert_eq!(metrics.verdict_count(SubmissionStatus::Accepted), 1);
        assert_eq!(metrics.verdict_count(SubmissionStatus::WrongAnswer), 0);
    }

    #[test]
    fn test_event_tagged_serialization() {
        let event = JudgeEvent::DeadLettered { submission_id: 5 };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "dead_lettered");
        assert_eq!(event.topic(), "dead_lettered");
    }
}
