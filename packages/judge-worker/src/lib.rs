pub mod collab;
pub mod config;
pub mod consumer;
pub mod error;
pub mod intake;
pub mod judge;
pub mod ratelimit;
pub mod sandbox;
pub mod worker;

#[cfg(test)]
mod testing;

pub use config::{RateLimitConfig, WorkerAppConfig, WorkerConfig};
pub use error::{JudgeError, Result, WorkerError};
