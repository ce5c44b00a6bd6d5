//! Step handler contract.
//!
//! A `StepHandler` executes the business action behind one step kind
//! (contract deployment, transaction execution, settlement, notification).
//! Handlers are external collaborators: the engine only guarantees
//! at-least-once invocation and passes `is_retrial` so handlers can detect
//! redelivery; idempotency is the handler's responsibility.
//!
//! `StepHandler` uses RPITIT and is not object-safe; `BoxStepHandler`
//! provides the type-erased form stored in the handler registry, following
//! the boxed-future blanket-impl pattern.

use std::future::Future;
use std::pin::Pin;

use ledgerflow_types::context::WorkflowContext;
use ledgerflow_types::queue::TaskStatus;
use ledgerflow_types::workflow::StepKind;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Request / outcome
// ---------------------------------------------------------------------------

/// Input to a handler invocation.
#[derive(Debug, Clone)]
pub struct StepRequest {
    pub workflow_id: Uuid,
    pub step_id: Uuid,
    pub step_kind: StepKind,
    /// Workflow request params plus merged `read_data_from` payloads and
    /// the resolved chain routing parameter.
    pub request_params: WorkflowContext,
    /// True when this execution follows a rollback of the same step.
    pub is_retrial: bool,
}

/// Result of a handler invocation.
#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    /// `Done` or `Failed`; `ReadyToStart` is not a valid outcome.
    pub task_status: OutcomeStatus,
    /// Payload consumed by dependents via `read_data_from`.
    pub response_data: Option<WorkflowContext>,
    /// Hash of a submitted on-chain transaction.
    pub transaction_hash: Option<String>,
    /// Request to roll the workflow back to an earlier step and resume
    /// there. Suppresses both `on_success` and `on_failure` routing.
    pub retry_from_id: Option<Uuid>,
    /// Front-end-visible result merged into the workflow's accumulated
    /// `response_data`.
    pub fe_response_data: Option<WorkflowContext>,
    /// Diagnostic payload persisted to the step's `debug_params`.
    pub debug: Option<serde_json::Value>,
}

/// Terminal status of a handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutcomeStatus {
    #[default]
    Done,
    Failed,
}

impl OutcomeStatus {
    pub fn as_task_status(&self) -> TaskStatus {
        match self {
            OutcomeStatus::Done => TaskStatus::Done,
            OutcomeStatus::Failed => TaskStatus::Failed,
        }
    }
}

impl StepOutcome {
    /// Successful outcome with a response payload.
    pub fn done(response_data: WorkflowContext) -> Self {
        Self {
            task_status: OutcomeStatus::Done,
            response_data: Some(response_data),
            ..Self::default()
        }
    }

    /// Failed outcome carrying a diagnostic payload.
    pub fn failed(debug: serde_json::Value) -> Self {
        Self {
            task_status: OutcomeStatus::Failed,
            debug: Some(debug),
            ..Self::default()
        }
    }

    /// Failed outcome requesting a rollback to the step at `retry_from_id`.
    pub fn retry_from(retry_from_id: Uuid, debug: serde_json::Value) -> Self {
        Self {
            task_status: OutcomeStatus::Failed,
            retry_from_id: Some(retry_from_id),
            debug: Some(debug),
            ..Self::default()
        }
    }
}

/// Error raised by a handler. Caught by the engine and normalized to a
/// `Failed` outcome with the error serialized into `debug_params`; never
/// fatal to the engine.
#[derive(Debug, thiserror::Error)]
#[error("handler error: {message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// StepHandler trait
// ---------------------------------------------------------------------------

/// Executes the business action behind one step kind.
pub trait StepHandler: Send + Sync {
    /// Perform the step. Must tolerate at-least-once invocation.
    fn perform(
        &self,
        request: StepRequest,
    ) -> impl Future<Output = Result<StepOutcome, HandlerError>> + Send;
}

// ---------------------------------------------------------------------------
// Object-safe wrapper
// ---------------------------------------------------------------------------

/// Object-safe version of [`StepHandler`] with a boxed future.
///
/// Exists solely to enable dynamic dispatch; a blanket implementation is
/// provided for all `StepHandler` types.
pub trait StepHandlerDyn: Send + Sync {
    fn perform_boxed(
        &self,
        request: StepRequest,
    ) -> Pin<Box<dyn Future<Output = Result<StepOutcome, HandlerError>> + Send + '_>>;
}

impl<T: StepHandler> StepHandlerDyn for T {
    fn perform_boxed(
        &self,
        request: StepRequest,
    ) -> Pin<Box<dyn Future<Output = Result<StepOutcome, HandlerError>> + Send + '_>> {
        Box::pin(self.perform(request))
    }
}

/// Type-erased step handler stored in the registry.
pub struct BoxStepHandler {
    inner: Box<dyn StepHandlerDyn>,
}

impl BoxStepHandler {
    /// Wrap a concrete handler in a type-erased box.
    pub fn new<T: StepHandler + 'static>(handler: T) -> Self {
        Self {
            inner: Box::new(handler),
        }
    }

    /// Perform the step via dynamic dispatch.
    pub async fn perform(&self, request: StepRequest) -> Result<StepOutcome, HandlerError> {
        self.inner.perform_boxed(request).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    impl StepHandler for Echo {
        async fn perform(&self, request: StepRequest) -> Result<StepOutcome, HandlerError> {
            Ok(StepOutcome::done(request.request_params))
        }
    }

    struct AlwaysFails;

    impl StepHandler for AlwaysFails {
        async fn perform(&self, _request: StepRequest) -> Result<StepOutcome, HandlerError> {
            Err(HandlerError::new("gas estimation failed"))
        }
    }

    fn request() -> StepRequest {
        StepRequest {
            workflow_id: Uuid::now_v7(),
            step_id: Uuid::now_v7(),
            step_kind: StepKind::GenerateTokenAddresses,
            request_params: WorkflowContext::from_pairs([(
                "token_id".to_string(),
                json!("tkn-1"),
            )]),
            is_retrial: false,
        }
    }

    #[tokio::test]
    async fn boxed_handler_delegates() {
        let boxed = BoxStepHandler::new(Echo);
        let outcome = boxed.perform(request()).await.unwrap();
        assert_eq!(outcome.task_status, OutcomeStatus::Done);
        assert_eq!(
            outcome.response_data.unwrap().get("token_id"),
            Some(&json!("tkn-1"))
        );
    }

    #[tokio::test]
    async fn boxed_handler_propagates_errors() {
        let boxed = BoxStepHandler::new(AlwaysFails);
        let err = boxed.perform(request()).await.unwrap_err();
        assert!(err.to_string().contains("gas estimation failed"));
    }

    #[test]
    fn outcome_constructors() {
        let done = StepOutcome::done(WorkflowContext::new());
        assert_eq!(done.task_status, OutcomeStatus::Done);
        assert!(done.retry_from_id.is_none());

        let id = Uuid::now_v7();
        let retry = StepOutcome::retry_from(id, json!({"reason": "receipt missing"}));
        assert_eq!(retry.task_status, OutcomeStatus::Failed);
        assert_eq!(retry.retry_from_id, Some(id));
    }
}
