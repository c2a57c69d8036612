//! Ports the judge engine consumes, plus their shipped adapters.

mod catalog;
mod notify;
mod progress;
mod redis_store;

use async_trait::async_trait;
use common::{JudgeResult, ProblemLimits, Submission, SubmissionStatus, TestCase};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use catalog::FsTestCaseCatalog;
pub use notify::RedisNotificationSink;
pub use progress::{JudgeOutcome, QueueProgressUpdater};
pub use redis_store::RedisSubmissionStore;

#[derive(Debug, Error)]
pub enum CollabError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redis::RedisError> for CollabError {
    fn from(e: redis::RedisError) -> Self {
        CollabError::Backend(e.to_string())
    }
}

impl From<mq::MqError> for CollabError {
    fn from(e: mq::MqError) -> Self {
        CollabError::Backend(e.to_string())
    }
}

pub type CollabResult<T> = Result<T, CollabError>;

#[async_trait]
pub trait TestCaseSource: Send + Sync {
    async fn test_cases(&self, problem_id: i64) -> CollabResult<Vec<TestCase>>;

    /// Falls back to [`ProblemLimits::default`] when the problem has none.
    async fn limits(&self, problem_id: i64) -> CollabResult<ProblemLimits>;
}

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Allocate an id for a new submission.
    async fn next_id(&self) -> CollabResult<i64>;

    async fn create(&self, submission: &Submission) -> CollabResult<()>;

    async fn load(&self, submission_id: i64) -> CollabResult<Option<Submission>>;

    async fn mark_judging(&self, submission_id: i64) -> CollabResult<()>;

    async fn save_result(&self, submission_id: i64, result: &JudgeResult) -> CollabResult<()>;

    async fn mark_system_error(&self, submission_id: i64, message: &str) -> CollabResult<()>;
}

/// Payload pushed to a user when a verdict is ready.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeNotification {
    pub submission_id: i64,
    pub status: SubmissionStatus,
    pub score: i32,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify_result(&self, user_id: i64, notification: &JudgeNotification) -> CollabResult<()>;

    async fn notify_status(
        &self,
        user_id: i64,
        submission_id: i64,
        status: SubmissionStatus,
    ) -> CollabResult<()>;
}

#[async_trait]
pub trait ProgressUpdater: Send + Sync {
    async fn record(&self, submission: &Submission, result: &JudgeResult) -> CollabResult<()>;
}
