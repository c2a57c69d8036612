use std::sync::Arc;

use common::JudgeTask;
use common::dlq::DlqErrorCode;
use common::retry::{RetryDecision, RetryPolicy};
use mq::{Delivery, MqError, TaskQueue};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::judge::JudgeEngine;

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Requeued { attempt: u32 },
    DeadLettered,
    /// Nacked without requeue from the dead-letter queue itself.
    Dropped,
}

/// Pulls judge tasks and settles each one with ack, requeue or dead-letter.
pub struct TaskQueueConsumer {
    queue: Arc<dyn TaskQueue>,
    engine: Arc<JudgeEngine>,
    queue_name: String,
    retry: RetryPolicy,
}

impl TaskQueueConsumer {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        engine: Arc<JudgeEngine>,
        queue_name: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            queue,
            engine,
            queue_name: queue_name.into(),
            retry,
        }
    }

    pub async fn handle_delivery(&self, delivery: Delivery) -> Result<Settlement, MqError> {
        let task: JudgeTask = match delivery.decode() {
            Ok(task) => task,
            Err(e) => {
                error!(
                    message_id = %delivery.id,
                    error_code = DlqErrorCode::DeserializationError.as_str(),
                    error = %e,
                    "Failed to parse judge task, sending to DLQ"
                );
                self.queue.nack(&self.queue_name, delivery, false).await?;
                return Ok(Settlement::DeadLettered);
            }
        };
        let submission_id = task.submission_id;

        match self.engine.judge_task(&task).await {
            Ok(result) => {
                debug!(submission_id, status = %result.status, "Task judged");
                self.queue.ack(&self.queue_name, delivery).await?;
                Ok(Settlement::Acked)
            }
            Err(e) if e.is_retryable() => match self.retry.decide(delivery.redeliveries) {
                RetryDecision::Requeue { attempt, delay } => {
                    warn!(
                        submission_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying judge task"
                    );
                    tokio::time::sleep(delay).await;
                    self.queue.nack(&self.queue_name, delivery, true).await?;
                    Ok(Settlement::Requeued { attempt })
                }
                RetryDecision::DeadLetter { attempts } => {
                    error!(
                        submission_id,
                        attempts,
                        error_code = DlqErrorCode::MaxRetriesExceeded.as_str(),
                        error = %e,
                        "Max retries exhausted, sending to DLQ"
                    );
                    self.queue.nack(&self.queue_name, delivery, false).await?;
                    Ok(Settlement::DeadLettered)
                }
            },
            Err(e) => {
                warn!(submission_id, error = %e, "Judge task failed permanently");
                self.queue.ack(&self.queue_name, delivery).await?;
                Ok(Settlement::Acked)
            }
        }
    }

    /// Process deliveries one at a time until `shutdown` fires or the queue closes.
    pub async fn run(&self, worker: usize, shutdown: CancellationToken) {
        info!(worker, queue = %self.queue_name, "Consumer started");
        consume_loop(self.queue.as_ref(), &self.queue_name, shutdown, |delivery| {
            self.handle_delivery(delivery)
        })
        .await;
        info!(worker, "Consumer stopped");
    }
}

/// Marks dead-lettered submissions as SYSTEM_ERROR.
pub struct DeadLetterHandler {
    queue: Arc<dyn TaskQueue>,
    engine: Arc<JudgeEngine>,
    queue_name: String,
}

impl DeadLetterHandler {
    pub fn new(queue: Arc<dyn TaskQueue>, engine: Arc<JudgeEngine>, queue_name: impl Into<String>) -> Self {
        Self {
            queue,
            engine,
            queue_name: queue_name.into(),
        }
    }

    pub async fn handle_delivery(&self, delivery: Delivery) -> Result<Settlement, MqError> {
        let Some((submission_id, user_id)) = dead_letter_ids(&delivery.body) else {
            error!(message_id = %delivery.id, "Dead-lettered message has no submission id, dropping");
            self.queue.nack(&self.queue_name, delivery, false).await?;
            return Ok(Settlement::Dropped);
        };

        match self.engine.dead_letter(submission_id, user_id).await {
            Ok(()) => {
                info!(submission_id, "Dead-lettered submission marked as system error");
                self.queue.ack(&self.queue_name, delivery).await?;
                Ok(Settlement::Acked)
            }
            Err(e) => {
                error!(submission_id, error = %e, "Failed to record dead-lettered submission, dropping");
                self.queue.nack(&self.queue_name, delivery, false).await?;
                Ok(Settlement::Dropped)
            }
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        info!(queue = %self.queue_name, "Dead-letter handler started");
        consume_loop(self.queue.as_ref(), &self.queue_name, shutdown, |delivery| {
            self.handle_delivery(delivery)
        })
        .await;
        info!("Dead-letter handler stopped");
    }
}

/// Submission and user ids of a dead-lettered body, tolerating partial payloads.
fn dead_letter_ids(body: &Value) -> Option<(i64, Option<i64>)> {
    if let Ok(task) = serde_json::from_value::<JudgeTask>(body.clone()) {
        return Some((task.submission_id, Some(task.user_id)));
    }
    let submission_id = body.get("submissionId")?.as_i64()?;
    let user_id = body.get("userId").and_then(Value::as_i64);
    Some((submission_id, user_id))
}

async fn consume_loop<'a, F, Fut>(
    queue: &'a dyn TaskQueue,
    queue_name: &'a str,
    shutdown: CancellationToken,
    mut handle: F,
) where
    F: FnMut(Delivery) -> Fut,
    Fut: Future<Output = Result<Settlement, MqError>>,
{
    loop {
        let delivery = tokio::select! {
            _ = shutdown.cancelled() => break,
            delivery = queue.consume(queue_name) => delivery,
        };
        match delivery {
            Ok(delivery) => {
                if let Err(e) = handle(delivery).await {
                    error!(queue = queue_name, error = %e, "Failed to settle delivery");
                }
            }
            Err(MqError::Closed) => break,
            Err(e) => {
                error!(queue = queue_name, error = %e, "Failed to receive delivery");
                tokio::time::sleep(mq::queue::POLL_INTERVAL).await;
            }
        }
    }
}
