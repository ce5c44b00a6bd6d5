//! Message queue implementations.

pub mod in_process;

pub use in_process::{Delivery, InProcessPublisher, QueueWorker, channel};
