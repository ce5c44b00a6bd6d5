//! Workflow and step persistence port.
//!
//! The store is the engine's source of truth. Two write paths carry the
//! engine's idempotency guarantees and must be atomic in implementations:
//!
//! - `insert_step` rejects a duplicate `unique_hash` among non-retried rows
//!   with [`RepositoryError::Conflict`], and assigns the next per-workflow
//!   `sequence` value at insert time.
//! - `mark_step_pending` performs a compare-and-swap from an executable
//!   status to `pending`; a stale redelivery observes zero updated rows.

use std::future::Future;

use ledgerflow_types::context::WorkflowContext;
use ledgerflow_types::error::RepositoryError;
use ledgerflow_types::workflow::{
    StepKind, StepStatus, Workflow, WorkflowKind, WorkflowStatus, WorkflowStep,
};
use uuid::Uuid;

/// Fields for a workflow row to be created.
#[derive(Debug, Clone)]
pub struct NewWorkflow {
    pub id: Uuid,
    pub kind: WorkflowKind,
    pub client_id: Option<Uuid>,
    pub request_params: WorkflowContext,
    pub unique_hash: String,
}

/// Fields for a step row to be created. `sequence` is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewStep {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub kind: StepKind,
    pub status: StepStatus,
    pub request_params: WorkflowContext,
    pub unique_hash: String,
}

/// Terminal result written back to a step row after execution.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub status: StepStatus,
    pub response_data: Option<WorkflowContext>,
    pub transaction_hash: Option<String>,
    pub debug_params: Option<serde_json::Value>,
}

/// Storage operations for workflows and their steps.
pub trait WorkflowStore: Send + Sync {
    /// Insert a workflow row. Duplicate `unique_hash` yields
    /// [`RepositoryError::Conflict`].
    fn create_workflow(
        &self,
        workflow: NewWorkflow,
    ) -> impl Future<Output = Result<Workflow, RepositoryError>> + Send;

    /// Fetch a workflow by id, or `None` when absent.
    fn get_workflow(
        &self,
        id: &Uuid,
    ) -> impl Future<Output = Result<Option<Workflow>, RepositoryError>> + Send;

    /// Set the workflow's terminal status.
    fn update_workflow_status(
        &self,
        id: &Uuid,
        status: WorkflowStatus,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Merge a payload into the workflow's accumulated `response_data`
    /// without overwriting keys already present.
    fn merge_workflow_response(
        &self,
        id: &Uuid,
        response: &WorkflowContext,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Insert a step row, assigning the next per-workflow `sequence`.
    /// Duplicate `unique_hash` among non-retried rows yields
    /// [`RepositoryError::Conflict`].
    fn insert_step(
        &self,
        step: NewStep,
    ) -> impl Future<Output = Result<WorkflowStep, RepositoryError>> + Send;

    /// Fetch a step by id, or `None` when absent.
    fn get_step(
        &self,
        id: &Uuid,
    ) -> impl Future<Output = Result<Option<WorkflowStep>, RepositoryError>> + Send;

    /// All non-retried steps of a workflow, ordered by `sequence`.
    fn steps_for_workflow(
        &self,
        workflow_id: &Uuid,
    ) -> impl Future<Output = Result<Vec<WorkflowStep>, RepositoryError>> + Send;

    /// Compare-and-swap the step from an executable status (`queued` or
    /// `pending`) to `pending`. Returns `false` when no row matched, which
    /// signals a stale redelivery.
    fn mark_step_pending(
        &self,
        id: &Uuid,
    ) -> impl Future<Output = Result<bool, RepositoryError>> + Send;

    /// Write the execution result onto a step row.
    fn update_step_result(
        &self,
        id: &Uuid,
        result: StepResult,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Mark every step of the workflow with `sequence >= from_sequence` as
    /// `retried`, freeing their unique hashes for re-insertion. Returns the
    /// number of rows marked.
    fn mark_steps_retried(
        &self,
        workflow_id: &Uuid,
        from_sequence: i64,
    ) -> impl Future<Output = Result<u64, RepositoryError>> + Send;
}
