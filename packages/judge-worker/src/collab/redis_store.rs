use async_trait::async_trait;
use common::{JudgeResult, Submission};
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tracing::debug;

use super::{CollabError, CollabResult, SubmissionStore};

/// Submission records stored as JSON at `submission:{id}`.
#[derive(Clone)]
pub struct RedisSubmissionStore {
    conn: MultiplexedConnection,
}

const SEQUENCE_KEY: &str = "submission:seq";

pub(crate) fn submission_key(submission_id: i64) -> String {
    format!("submission:{submission_id}")
}

impl RedisSubmissionStore {
    pub async fn connect(url: &str) -> CollabResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }

    async fn put(&self, submission: &Submission) -> CollabResult<()> {
        let payload = serde_json::to_string(submission)?;
        let mut conn = self.conn.clone();
        let _: () = conn.set(submission_key(submission.id), payload).await?;
        Ok(())
    }

    async fn modify(&self, submission_id: i64, f: impl FnOnce(&mut Submission) + Send) -> CollabResult<()> {
        let mut submission = self
            .load(submission_id)
            .await?
            .ok_or_else(|| CollabError::Backend(format!("submission {submission_id} not found")))?;
        f(&mut submission);
        self.put(&submission).await
    }
}

#[async_trait]
impl SubmissionStore for RedisSubmissionStore {
    async fn next_id(&self) -> CollabResult<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.incr(SEQUENCE_KEY, 1i64).await?)
    }

    async fn create(&self, submission: &Submission) -> CollabResult<()> {
        self.put(submission).await
    }

    async fn load(&self, submission_id: i64) -> CollabResult<Option<Submission>> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(submission_key(submission_id)).await?;
        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => {
                debug!(submission_id, "Submission record missing");
                Ok(None)
            }
        }
    }

    async fn mark_judging(&self, submission_id: i64) -> CollabResult<()> {
        self.modify(submission_id, Submission::mark_judging).await
    }

    async fn save_result(&self, submission_id: i64, result: &JudgeResult) -> CollabResult<()> {
        self.modify(submission_id, |s| s.apply_result(result)).await
    }

    async fn mark_system_error(&self, submission_id: i64, message: &str) -> CollabResult<()> {
        self.modify(submission_id, |s| s.mark_system_error(message))
            .await
    }
}
