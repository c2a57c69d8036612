pub mod broccoli;
pub mod error;
pub mod memory;
pub mod queue;

pub use broccoli::{BroccoliTaskQueue, MqConfig, init_mq};
pub use error::MqError;
pub use memory::MemoryQueue;
pub use queue::{Delivery, TaskQueue, TaskQueueExt};
