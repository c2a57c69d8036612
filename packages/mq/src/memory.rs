use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::warn;
use uuid::Uuid;

use crate::error::MqError;
use crate::queue::{Delivery, Receipt, TaskQueue};

#[derive(Debug, Clone)]
struct Stored {
    id: String,
    body: Value,
    redeliveries: u32,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, VecDeque<Stored>>,
    in_flight: HashMap<String, Stored>,
    dead_letters: HashMap<String, String>,
    closed: bool,
}

/// In-process [`TaskQueue`] with dead-letter routing and redelivery counts.
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<State>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dead_letter(self, queue: impl Into<String>, dead_letter_queue: impl Into<String>) -> Self {
        self.lock()
            .dead_letters
            .insert(queue.into(), dead_letter_queue.into());
        self
    }

    /// Messages waiting on `queue`, not counting in-flight ones.
    pub fn len(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, VecDeque::len)
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }

    /// Wake blocked consumers; subsequent receives on empty queues fail with `Closed`.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, queue: &str, stored: Stored) {
        self.lock()
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(stored);
        self.notify.notify_waiters();
    }

    fn settle(&self, delivery: &Delivery) -> Result<Stored, MqError> {
        if !matches!(delivery.receipt, Receipt::Memory) {
            return Err(MqError::UnknownDelivery(delivery.id.clone()));
        }
        self.lock()
            .in_flight
            .remove(&delivery.id)
            .ok_or_else(|| MqError::UnknownDelivery(delivery.id.clone()))
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn publish(&self, queue: &str, body: &Value) -> Result<(), MqError> {
        self.push(
            queue,
            Stored {
                id: Uuid::new_v4().to_string(),
                body: body.clone(),
                redeliveries: 0,
            },
        );
        Ok(())
    }

    async fn try_consume(&self, queue: &str) -> Result<Option<Delivery>, MqError> {
        let mut state = self.lock();
        let Some(stored) = state.queues.get_mut(queue).and_then(VecDeque::pop_front) else {
            return if state.closed { Err(MqError::Closed) } else { Ok(None) };
        };
        state.in_flight.insert(stored.id.clone(), stored.clone());
        Ok(Some(Delivery {
            id: stored.id,
            body: stored.body,
            redeliveries: stored.redeliveries,
            receipt: Receipt::Memory,
        }))
    }

    async fn ack(&self, _queue: &str, delivery: Delivery) -> Result<(), MqError> {
        self.settle(&delivery)?;
        Ok(())
    }

    async fn nack(&self, queue: &str, delivery: Delivery, requeue: bool) -> Result<(), MqError> {
        let mut stored = self.settle(&delivery)?;

        if requeue {
            stored.redeliveries += 1;
            self.push(queue, stored);
            return Ok(());
        }

        let dead_letter_queue = self.lock().dead_letters.get(queue).cloned();
        match dead_letter_queue {
            Some(dead_letter_queue) => {
                stored.redeliveries = 0;
                self.push(&dead_letter_queue, stored);
            }
            None => warn!(queue, id = %stored.id, "No dead-letter queue bound, dropping message"),
        }
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<Delivery, MqError> {
        loop {
            let notified = self.notify.notified();
            if let Some(delivery) = self.try_consume(queue).await? {
                return Ok(delivery);
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::TaskQueueExt;
    use common::JudgeTask;
    use std::sync::Arc;
    use std::time::Duration;

    const QUEUE: &str = "judge.queue";
    const DLQ: &str = "judge.dead.letter.queue";

    #[tokio::test]
    async fn test_requeue_increments_redeliveries() {
        let queue = MemoryQueue::new().with_dead_letter(QUEUE, DLQ);
        queue
            .publish_json(QUEUE, &JudgeTask::new(1, 1, 1, "java", ""))
            .await
            .unwrap();

        for expected in 0..3 {
            let delivery = queue.try_consume(QUEUE).await.unwrap().unwrap();
            assert_eq!(delivery.redeliveries, expected);
            queue.nack(QUEUE, delivery, true).await.unwrap();
        }

        assert_eq!(queue.len(QUEUE), 1);
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_nack_without_requeue_routes_to_dead_letter_queue() {
        let queue = MemoryQueue::new().with_dead_letter(QUEUE, DLQ);
        let task = JudgeTask::new(7, 2, 3, "cpp", "int main(){}");
        queue.publish_json(QUEUE, &task).await.unwrap();

        let delivery = queue.try_consume(QUEUE).await.unwrap().unwrap();
        queue.nack(QUEUE, delivery, false).await.unwrap();

        assert_eq!(queue.len(QUEUE), 0);
        assert_eq!(queue.len(DLQ), 1);
        let dead = queue.try_consume(DLQ).await.unwrap().unwrap();
        assert_eq!(dead.decode::<JudgeTask>().unwrap(), task);

        // No binding on the dead-letter queue itself: terminal drop.
        queue.nack(DLQ, dead, false).await.unwrap();
        assert_eq!(queue.len(DLQ), 0);
    }

    #[tokio::test]
    async fn test_double_settle_is_rejected() {
        let queue = MemoryQueue::new();
        queue.publish(QUEUE, &Value::Null).await.unwrap();
        let delivery = queue.try_consume(QUEUE).await.unwrap().unwrap();
        let copy = Delivery {
            id: delivery.id.clone(),
            body: Value::Null,
            redeliveries: 0,
            receipt: Receipt::Memory,
        };
        queue.ack(QUEUE, delivery).await.unwrap();
        assert!(matches!(queue.ack(QUEUE, copy).await, Err(MqError::UnknownDelivery(_))));
    }

    #[tokio::test]
    async fn test_consume_waits_for_publish_and_close() {
        let queue = Arc::new(MemoryQueue::new());

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.consume(QUEUE).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.publish(QUEUE, &serde_json::json!({"k": 1})).await.unwrap();
        let delivery = consumer.await.unwrap().unwrap();
        assert_eq!(delivery.body["k"], 1);

        let blocked = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.consume(QUEUE).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();
        assert!(matches!(blocked.await.unwrap(), Err(MqError::Closed)));
    }
}
