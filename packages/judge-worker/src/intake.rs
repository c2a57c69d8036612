//! Entry point that turns a user's submission into a queued judge task.

use std::sync::Arc;

use common::{JudgeTask, Submission};
use mq::{MqError, TaskQueue, TaskQueueExt};
use thiserror::Error;
use tracing::{info, instrument};

use crate::collab::{CollabError, SubmissionStore};
use crate::ratelimit::RateLimiter;

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("too many submissions, retry in {wait_seconds}s")]
    RateLimited { wait_seconds: u64 },

    #[error("rate limiter unavailable: {0}")]
    Limiter(#[from] redis::RedisError),

    #[error("store error: {0}")]
    Store(#[from] CollabError),

    #[error("queue error: {0}")]
    Queue(#[from] MqError),
}

#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    pub problem_id: i64,
    pub user_id: i64,
    pub language: String,
    pub code: String,
    pub ip_address: Option<String>,
}

/// Rate-limits, persists and enqueues new submissions.
pub struct SubmissionIntake {
    limiter: RateLimiter,
    submissions: Arc<dyn SubmissionStore>,
    queue: Arc<dyn TaskQueue>,
    queue_name: String,
}

impl SubmissionIntake {
    pub fn new(
        limiter: RateLimiter,
        submissions: Arc<dyn SubmissionStore>,
        queue: Arc<dyn TaskQueue>,
        queue_name: impl Into<String>,
    ) -> Self {
        Self {
            limiter,
            submissions,
            queue,
            queue_name: queue_name.into(),
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    #[instrument(skip_all, fields(user_id = request.user_id, problem_id = request.problem_id))]
    pub async fn submit(&self, request: SubmissionRequest) -> Result<Submission, IntakeError> {
        if !self.limiter.can_submit(request.user_id).await? {
            let wait_seconds = self.limiter.wait_seconds(request.user_id).await?;
            return Err(IntakeError::RateLimited { wait_seconds });
        }

        let id = self.submissions.next_id().await?;
        let mut submission = Submission::new(
            id,
            request.problem_id,
            request.user_id,
            request.language,
            request.code,
        );
        submission.ip_address = request.ip_address;
        self.submissions.create(&submission).await?;

        let task = JudgeTask::new(
            submission.id,
            submission.problem_id,
            submission.user_id,
            submission.language.clone(),
            submission.code.clone(),
        );
        self.queue.publish_json(&self.queue_name, &task).await?;
        self.limiter.record_submit(request.user_id).await?;

        info!(submission_id = submission.id, "Submission queued");
        Ok(submission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::ratelimit::MemoryCounterStore;
    use crate::testing::MemorySubmissionStore;
    use common::SubmissionStatus;
    use mq::MemoryQueue;

    fn request(user_id: i64) -> SubmissionRequest {
        SubmissionRequest {
            problem_id: 1,
            user_id,
            language: "python".into(),
            code: "print(1)".into(),
            ip_address: Some("10.0.0.1".into()),
        }
    }

    #[tokio::test]
    async fn test_submit_persists_and_enqueues() {
        let store = Arc::new(MemorySubmissionStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()), &RateLimitConfig::default());
        let intake = SubmissionIntake::new(limiter, store.clone(), queue.clone(), "judge.queue");

        let submission = intake.submit(request(7)).await.unwrap();
        assert_eq!(submission.status, SubmissionStatus::Pending);
        assert_eq!(store.get(submission.id).unwrap().ip_address.as_deref(), Some("10.0.0.1"));

        let delivery = queue.try_consume("judge.queue").await.unwrap().unwrap();
        let task: JudgeTask = delivery.decode().unwrap();
        assert_eq!(task.submission_id, submission.id);
        assert_eq!(task.retry_count, 0);
        assert_eq!(intake.limiter().remaining_submits(7).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_sixth_submission_is_rate_limited() {
        let store = Arc::new(MemorySubmissionStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()), &RateLimitConfig::default());
        let intake = SubmissionIntake::new(limiter, store, queue.clone(), "judge.queue");

        for _ in 0..5 {
            intake.submit(request(8)).await.unwrap();
        }
        let err = intake.submit(request(8)).await.unwrap_err();
        assert!(matches!(err, IntakeError::RateLimited { wait_seconds } if wait_seconds > 0));
        assert_eq!(queue.len("judge.queue"), 5);

        // Other users are unaffected.
        intake.submit(request(9)).await.unwrap();
    }
}
