//! In-process message queue and delivery worker.
//!
//! A bounded mpsc channel stands in for the external broker: the engine
//! publishes step-ready envelopes through [`InProcessPublisher`], and
//! [`QueueWorker`] drives each delivery back through the engine. The worker
//! redelivers messages whose processing failed with a retryable
//! (infrastructure) error, up to the configured redelivery limit, which
//! gives the same at-least-once semantics consumers must already tolerate.

use std::sync::Arc;

use ledgerflow_core::cache::StatusCache;
use ledgerflow_core::engine::{EngineError, WorkflowEngine};
use ledgerflow_core::queue::StepPublisher;
use ledgerflow_core::repository::WorkflowStore;
use ledgerflow_types::error::PublishError;
use ledgerflow_types::queue::QueueEnvelope;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One queued message plus its redelivery count.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub envelope: QueueEnvelope,
    pub attempt: u32,
}

/// Create a bounded in-process queue.
pub fn channel(capacity: usize) -> (InProcessPublisher, mpsc::Receiver<Delivery>) {
    let (tx, rx) = mpsc::channel(capacity);
    (InProcessPublisher { tx }, rx)
}

/// Publisher half of the in-process queue.
#[derive(Clone)]
pub struct InProcessPublisher {
    tx: mpsc::Sender<Delivery>,
}

impl InProcessPublisher {
    /// Raw sender handle, used by the worker for redeliveries.
    pub fn sender(&self) -> mpsc::Sender<Delivery> {
        self.tx.clone()
    }
}

impl StepPublisher for InProcessPublisher {
    async fn publish(&self, envelope: QueueEnvelope) -> Result<(), PublishError> {
        self.tx
            .try_send(Delivery {
                envelope,
                attempt: 0,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => PublishError::Full,
                mpsc::error::TrySendError::Closed(_) => PublishError::Closed,
            })
    }
}

/// Drives queued deliveries through the engine until shutdown.
pub struct QueueWorker<S, C, P> {
    engine: Arc<WorkflowEngine<S, C, P>>,
    rx: mpsc::Receiver<Delivery>,
    redeliver: mpsc::Sender<Delivery>,
    max_redeliveries: u32,
    shutdown: CancellationToken,
}

impl<S, C, P> QueueWorker<S, C, P>
where
    S: WorkflowStore,
    C: StatusCache,
    P: StepPublisher,
{
    pub fn new(
        engine: Arc<WorkflowEngine<S, C, P>>,
        rx: mpsc::Receiver<Delivery>,
        redeliver: mpsc::Sender<Delivery>,
        max_redeliveries: u32,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            engine,
            rx,
            redeliver,
            max_redeliveries,
            shutdown,
        }
    }

    /// Process deliveries until the channel closes or shutdown is signaled.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("queue worker shutting down");
                    break;
                }
                delivery = self.rx.recv() => {
                    match delivery {
                        Some(delivery) => self.handle(delivery).await,
                        None => {
                            tracing::info!("queue channel closed; worker exiting");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn handle(&self, delivery: Delivery) {
        let payload = delivery.envelope.message.payload.clone();
        let step_kind = payload.step_kind;
        match self.engine.perform(payload).await {
            Ok(receipt) => {
                tracing::debug!(
                    workflow_id = %receipt.workflow_id,
                    step_kind = %receipt.step_kind,
                    status = %receipt.step_status.as_str(),
                    "delivery handled"
                );
            }
            // Expected under at-least-once delivery; nothing to do.
            Err(err @ EngineError::StaleDelivery { .. }) => {
                tracing::debug!(step_kind = %step_kind, error = %err, "stale delivery dropped");
            }
            Err(err) if err.is_retryable() && delivery.attempt < self.max_redeliveries => {
                let attempt = delivery.attempt + 1;
                tracing::warn!(
                    step_kind = %step_kind,
                    attempt,
                    error = %err,
                    "retryable failure; redelivering"
                );
                let redelivery = Delivery {
                    envelope: delivery.envelope,
                    attempt,
                };
                if self.redeliver.send(redelivery).await.is_err() {
                    tracing::error!(step_kind = %step_kind, "redelivery channel closed");
                }
            }
            Err(err) => {
                tracing::error!(
                    step_kind = %step_kind,
                    attempt = delivery.attempt,
                    error = %err,
                    "delivery dropped"
                );
            }
        }
    }
}
