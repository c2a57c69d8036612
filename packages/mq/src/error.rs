use thiserror::Error;

#[derive(Debug, Error)]
pub enum MqError {
    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Unknown delivery: {0}")]
    UnknownDelivery(String),

    #[error("Queue closed")]
    Closed,
}

impl From<broccoli_queue::error::BroccoliError> for MqError {
    fn from(e: broccoli_queue::error::BroccoliError) -> Self {
        MqError::Broker(e.to_string())
    }
}
