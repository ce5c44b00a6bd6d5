//! Step publication port.
//!
//! The engine publishes a `taskReadyToStart` envelope for every step it
//! schedules. Publication failure after a step row was inserted is a hard
//! error: the row exists but no message is in flight, and redelivery of the
//! triggering message is the recovery path.

use std::future::Future;

use ledgerflow_types::error::PublishError;
use ledgerflow_types::queue::QueueEnvelope;

/// Publishes step envelopes to the message queue.
pub trait StepPublisher: Send + Sync {
    fn publish(
        &self,
        envelope: QueueEnvelope,
    ) -> impl Future<Output = Result<(), PublishError>> + Send;
}
