use thiserror::Error;

use crate::collab::CollabError;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("MQ error: {0}")]
    Mq(#[from] mq::MqError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] crate::sandbox::SandboxError),

    #[error("Collaborator error: {0}")]
    Collab(#[from] CollabError),
}

/// Failure of one judge attempt. Verdicts are values in `JudgeResult`, never errors.
#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("submission {0} not found")]
    SubmissionNotFound(i64),

    #[error("infrastructure failure: {0}")]
    Infrastructure(String),
}

impl JudgeError {
    /// Whether redelivering the same task may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Infrastructure(_))
    }
}

impl From<CollabError> for JudgeError {
    fn from(e: CollabError) -> Self {
        JudgeError::Infrastructure(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WorkerError>;
