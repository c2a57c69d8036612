use std::time::Duration;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::MqError;

/// How long the default `consume` sleeps between empty polls.
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A message handed to a consumer. Must be settled with exactly one of
/// `ack` or `nack`.
#[derive(Debug)]
pub struct Delivery {
    pub id: String,
    pub body: Value,
    /// Times the broker has already redelivered this message.
    pub redeliveries: u32,
    pub(crate) receipt: Receipt,
}

#[derive(Debug)]
pub(crate) enum Receipt {
    Broker(broccoli_queue::brokers::broker::BrokerMessage<Value>),
    Memory,
}

impl Delivery {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, MqError> {
        Ok(serde_json::from_value(self.body.clone())?)
    }
}

/// Durable work queue with explicit settlement.
///
/// `nack` with `requeue = false` routes the message to the dead-letter queue
/// bound to `queue`, if any.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn publish(&self, queue: &str, body: &Value) -> Result<(), MqError>;

    /// Non-blocking receive.
    async fn try_consume(&self, queue: &str) -> Result<Option<Delivery>, MqError>;

    async fn ack(&self, queue: &str, delivery: Delivery) -> Result<(), MqError>;

    async fn nack(&self, queue: &str, delivery: Delivery, requeue: bool) -> Result<(), MqError>;

    /// Wait until a message is available.
    async fn consume(&self, queue: &str) -> Result<Delivery, MqError> {
        loop {
            if let Some(delivery) = self.try_consume(queue).await? {
                return Ok(delivery);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// Typed helpers over [`TaskQueue`].
#[async_trait]
pub trait TaskQueueExt: TaskQueue {
    async fn publish_json<T: Serialize + Sync>(&self, queue: &str, message: &T) -> Result<(), MqError> {
        let body = serde_json::to_value(message)?;
        self.publish(queue, &body).await
    }
}

impl<Q: TaskQueue + ?Sized> TaskQueueExt for Q {}
