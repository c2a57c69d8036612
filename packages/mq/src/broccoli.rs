use std::collections::HashMap;

use async_trait::async_trait;
use broccoli_queue::brokers::broker::BrokerMessage;
use broccoli_queue::queue::{BroccoliQueue, RetryStrategy};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::MqError;
use crate::queue::{Delivery, Receipt, TaskQueue};

pub struct MqConfig {
    pub url: String,
    pub pool_size: u8,
    /// Redeliveries the consumer may request before it dead-letters a message.
    pub max_redeliveries: u32,
}

pub async fn init_mq(config: &MqConfig) -> Result<BroccoliQueue, MqError> {
    // The consumer decides when to dead-letter; the broker must never give up first.
    let broker_attempts = config.max_redeliveries.saturating_add(1).min(u8::MAX as u32) as u8;

    BroccoliQueue::builder(&config.url)
        .pool_connections(config.pool_size)
        .failed_message_retry_strategy(RetryStrategy::new().with_attempts(broker_attempts))
        .build()
        .await
        .map_err(MqError::from)
}

/// [`TaskQueue`] over a Redis-backed broccoli queue.
pub struct BroccoliTaskQueue {
    queue: BroccoliQueue,
    dead_letters: HashMap<String, String>,
}

impl BroccoliTaskQueue {
    pub async fn connect(config: &MqConfig) -> Result<Self, MqError> {
        Ok(Self {
            queue: init_mq(config).await?,
            dead_letters: HashMap::new(),
        })
    }

    /// Route messages nacked without requeue on `queue` to `dead_letter_queue`.
    pub fn with_dead_letter(mut self, queue: impl Into<String>, dead_letter_queue: impl Into<String>) -> Self {
        self.dead_letters.insert(queue.into(), dead_letter_queue.into());
        self
    }

    fn broker_message(delivery: Delivery) -> Result<BrokerMessage<Value>, MqError> {
        match delivery.receipt {
            Receipt::Broker(message) => Ok(message),
            Receipt::Memory => Err(MqError::UnknownDelivery(delivery.id)),
        }
    }
}

#[async_trait]
impl TaskQueue for BroccoliTaskQueue {
    async fn publish(&self, queue: &str, body: &Value) -> Result<(), MqError> {
        self.queue.publish(queue, None, body, None).await?;
        Ok(())
    }

    async fn try_consume(&self, queue: &str) -> Result<Option<Delivery>, MqError> {
        let message = self.queue.try_consume::<Value>(queue, None).await?;
        Ok(message.map(|message| Delivery {
            id: message.task_id.to_string(),
            body: message.payload.clone(),
            redeliveries: message.attempts as u32,
            receipt: Receipt::Broker(message),
        }))
    }

    async fn ack(&self, queue: &str, delivery: Delivery) -> Result<(), MqError> {
        let message = Self::broker_message(delivery)?;
        self.queue.acknowledge(queue, message).await?;
        Ok(())
    }

    async fn nack(&self, queue: &str, delivery: Delivery, requeue: bool) -> Result<(), MqError> {
        let message = Self::broker_message(delivery)?;

        if requeue {
            self.queue.reject(queue, message).await?;
            return Ok(());
        }

        match self.dead_letters.get(queue) {
            Some(dead_letter_queue) => {
                self.queue
                    .publish(dead_letter_queue, None, &message.payload, None)
                    .await?;
                debug!(queue, dead_letter_queue = %dead_letter_queue, "Message dead-lettered");
            }
            None => warn!(queue, task_id = %message.task_id, "No dead-letter queue bound, dropping message"),
        }
        self.queue.acknowledge(queue, message).await?;
        Ok(())
    }
}
