use async_trait::async_trait;
use common::SubmissionStatus;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use serde_json::json;

use super::{CollabResult, JudgeNotification, NotificationSink};

pub(crate) fn result_channel(user_id: i64) -> String {
    format!("judge-result:{user_id}")
}

pub(crate) fn status_channel(user_id: i64) -> String {
    format!("judge-status:{user_id}")
}

/// Publishes verdicts and status changes on per-user Redis channels.
#[derive(Clone)]
pub struct RedisNotificationSink {
    conn: MultiplexedConnection,
}

impl RedisNotificationSink {
    pub async fn connect(url: &str) -> CollabResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl NotificationSink for RedisNotificationSink {
    async fn notify_result(&self, user_id: i64, notification: &JudgeNotification) -> CollabResult<()> {
        let payload = serde_json::to_string(notification)?;
        let mut conn = self.conn.clone();
        let _: i64 = conn.publish(result_channel(user_id), payload).await?;
        Ok(())
    }

    async fn notify_status(
        &self,
        user_id: i64,
        submission_id: i64,
        status: SubmissionStatus,
    ) -> CollabResult<()> {
        let payload = json!({ "submissionId": submission_id, "status": status }).to_string();
        let mut conn = self.conn.clone();
        let _: i64 = conn.publish(status_channel(user_id), payload).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channels_are_per_user() {
        assert_eq!(result_channel(7), "judge-result:7");
        assert_eq!(status_channel(7), "judge-status:7");
    }

    #[test]
    fn test_notification_wire_format() {
        let notification = JudgeNotification {
            submission_id: 3,
            status: SubmissionStatus::Accepted,
            score: 100,
        };
        assert_eq!(
            serde_json::to_value(&notification).unwrap(),
            json!({ "submissionId": 3, "status": "ACCEPTED", "score": 100 })
        );
    }
}
