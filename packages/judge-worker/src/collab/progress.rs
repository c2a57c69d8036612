use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{JudgeResult, Submission, SubmissionStatus};
use mq::{TaskQueue, TaskQueueExt};
use serde::{Deserialize, Serialize};

use super::{CollabResult, ProgressUpdater};

/// Message published to the results queue after every verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeOutcome {
    pub submission_id: i64,
    pub problem_id: i64,
    pub user_id: i64,
    pub status: SubmissionStatus,
    pub score: i32,
    pub accepted: bool,
    pub judged_at: DateTime<Utc>,
}

impl JudgeOutcome {
    pub fn new(submission: &Submission, result: &JudgeResult) -> Self {
        Self {
            submission_id: submission.id,
            problem_id: submission.problem_id,
            user_id: submission.user_id,
            status: result.status,
            score: result.score,
            accepted: result.status.is_accepted(),
            judged_at: Utc::now(),
        }
    }
}

/// Hands progress bookkeeping to downstream services through the queue.
pub struct QueueProgressUpdater {
    queue: Arc<dyn TaskQueue>,
    queue_name: String,
}

impl QueueProgressUpdater {
    pub fn new(queue: Arc<dyn TaskQueue>, queue_name: impl Into<String>) -> Self {
        Self {
            queue,
            queue_name: queue_name.into(),
        }
    }
}

#[async_trait]
impl ProgressUpdater for QueueProgressUpdater {
    async fn record(&self, submission: &Submission, result: &JudgeResult) -> CollabResult<()> {
        let outcome = JudgeOutcome::new(submission, result);
        self.queue
            .publish_json(&self.queue_name, &outcome)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::judge_result::TestCaseResult;
    use mq::MemoryQueue;

    #[tokio::test]
    async fn test_publishes_outcome() {
        let queue = Arc::new(MemoryQueue::new());
        let updater = QueueProgressUpdater::new(queue.clone(), "judge.result.queue");

        let submission = Submission::new(5, 6, 7, "python", "print(1)");
        let result = JudgeResult::from_case_results(
            1,
            vec![TestCaseResult {
                test_case_id: 1,
                passed: true,
                actual_output: "1".into(),
                expected_output: "1".into(),
                time_used_ms: 3,
                memory_used_kb: 0,
                error_message: None,
            }],
            0,
        );
        updater.record(&submission, &result).await.unwrap();

        let delivery = queue.try_consume("judge.result.queue").await.unwrap().unwrap();
        let outcome: JudgeOutcome = delivery.decode().unwrap();
        assert_eq!(outcome.submission_id, 5);
        assert_eq!(outcome.user_id, 7);
        assert_eq!(outcome.status, SubmissionStatus::Accepted);
        assert!(outcome.accepted);
    }
}
