//! Message-driven workflow executor.
//!
//! Each queue delivery advances its workflow by exactly one step. The
//! pipeline is lock-free: correctness comes from an atomic status
//! compare-and-swap on the step row (claims a delivery once), the partial
//! unique index behind `insert_step` (collapses racing duplicate inserts),
//! and AND-join prerequisite checks re-evaluated by every finishing branch.
//! Delivery is at-least-once; every stage tolerates replays.

use std::collections::HashMap;

use ledgerflow_types::config::EngineConfig;
use ledgerflow_types::context::WorkflowContext;
use ledgerflow_types::error::{CacheError, PublishError, RepositoryError};
use ledgerflow_types::queue::{StepPayload, TaskStatus, step_ready};
use ledgerflow_types::workflow::{
    StepKind, StepStatus, Workflow, WorkflowKind, WorkflowStep, step_unique_hash,
    workflow_unique_hash,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::cache::StatusCache;
use crate::engine::registry::HandlerRegistry;
use crate::graph::{StepRoute, chain_for, init_kind, route_for};
use crate::handler::{OutcomeStatus, StepOutcome, StepRequest};
use crate::queue::StepPublisher;
use crate::repository::{NewStep, NewWorkflow, StepResult, WorkflowStore};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Engine-level failures. Handler failures are never engine errors; they
/// are normalized into a failed step outcome inside the pipeline.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No route or handler is configured for the delivered step kind.
    #[error("no route or handler configured for step kind '{0}'")]
    UnknownStepKind(StepKind),

    /// The delivery targets a step that no longer exists in an executable
    /// status. Duplicate and out-of-order redeliveries land here.
    #[error("stale delivery for step {step_id}")]
    StaleDelivery { step_id: Uuid },

    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),

    /// A trigger collided with an existing workflow's dedupe hash.
    #[error("duplicate workflow trigger (unique hash {0})")]
    DuplicateWorkflow(String),

    /// A rollback named a step id that is not a live row of this workflow.
    #[error("rollback target step {0} not found")]
    RetryTargetNotFound(Uuid),

    #[error("delivery missing required field '{0}'")]
    MissingField(&'static str),

    #[error(transparent)]
    Persistence(#[from] RepositoryError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

impl EngineError {
    /// Whether the queue worker should redeliver the triggering message.
    /// Infrastructure failures are retryable; everything else is a terminal
    /// verdict on the delivery itself and redelivery cannot change it.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Persistence(_) | EngineError::Cache(_) | EngineError::Publish(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Receipt
// ---------------------------------------------------------------------------

/// Summary of one processed delivery, for logging and tests.
#[derive(Debug, Clone)]
pub struct PerformReceipt {
    pub workflow_id: Uuid,
    pub step_id: Uuid,
    pub step_kind: StepKind,
    /// Final status written to the step row.
    pub step_status: StepStatus,
    /// Successor kinds actually inserted and published by this delivery.
    /// Join candidates skipped on unmet prerequisites and duplicate inserts
    /// resolved by another branch are not listed.
    pub scheduled: Vec<StepKind>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The workflow engine, generic over its storage, cache, and queue ports.
pub struct WorkflowEngine<S, C, P> {
    store: S,
    cache: C,
    publisher: P,
    registry: HandlerRegistry,
    config: EngineConfig,
}

impl<S, C, P> WorkflowEngine<S, C, P>
where
    S: WorkflowStore,
    C: StatusCache,
    P: StepPublisher,
{
    pub fn new(store: S, cache: C, publisher: P, registry: HandlerRegistry, config: EngineConfig) -> Self {
        Self {
            store,
            cache,
            publisher,
            registry,
            config,
        }
    }

    /// Create a workflow and its init step, and publish the init step's
    /// ready message. The `seed` is the caller's idempotency token; a
    /// duplicate trigger surfaces as [`EngineError::DuplicateWorkflow`]
    /// with no new rows.
    pub async fn insert_init_step(
        &self,
        kind: WorkflowKind,
        client_id: Option<Uuid>,
        request_params: WorkflowContext,
        seed: &str,
    ) -> Result<(Workflow, WorkflowStep), EngineError> {
        let unique_hash = workflow_unique_hash(kind, client_id.as_ref(), seed);
        let workflow = match self
            .store
            .create_workflow(NewWorkflow {
                id: Uuid::now_v7(),
                kind,
                client_id,
                request_params: request_params.clone(),
                unique_hash: unique_hash.clone(),
            })
            .await
        {
            Ok(workflow) => workflow,
            Err(e) if e.is_conflict() => {
                return Err(EngineError::DuplicateWorkflow(unique_hash));
            }
            Err(e) => return Err(e.into()),
        };

        let init = init_kind(kind);
        let step = self
            .store
            .insert_step(NewStep {
                id: Uuid::now_v7(),
                workflow_id: workflow.id,
                kind: init,
                status: StepStatus::Queued,
                request_params,
                unique_hash: step_unique_hash(&workflow.id, init),
            })
            .await?;

        self.publisher
            .publish(step_ready(
                self.config.topic_for(kind),
                self.config.publisher.clone(),
                init,
                workflow.id,
                step.id,
                false,
            ))
            .await?;
        self.cache.set(&workflow).await?;

        tracing::info!(
            workflow_id = %workflow.id,
            workflow_kind = %kind,
            step_id = %step.id,
            "workflow created and init step queued"
        );
        Ok((workflow, step))
    }

    /// Process one queue delivery: claim the step, execute or record its
    /// outcome, and schedule successors.
    pub async fn perform(&self, payload: StepPayload) -> Result<PerformReceipt, EngineError> {
        let kind = payload.step_kind;
        let route = route_for(kind).ok_or(EngineError::UnknownStepKind(kind))?;

        // A ready message for an init kind without a workflow id is a raw
        // trigger; take the bootstrap path instead of the step pipeline.
        if payload.workflow_id.is_none() {
            if payload.task_status == TaskStatus::ReadyToStart
                && kind == init_kind(kind.workflow_kind())
            {
                let seed = payload
                    .current_step_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| Uuid::now_v7().to_string());
                let (workflow, step) = self
                    .insert_init_step(kind.workflow_kind(), None, WorkflowContext::new(), &seed)
                    .await?;
                return Ok(PerformReceipt {
                    workflow_id: workflow.id,
                    step_id: step.id,
                    step_kind: kind,
                    step_status: StepStatus::Queued,
                    scheduled: vec![kind],
                });
            }
            return Err(EngineError::MissingField("workflowId"));
        }
        let workflow_id = payload.workflow_id.ok_or(EngineError::MissingField("workflowId"))?;
        let step_id = payload
            .current_step_id
            .ok_or(EngineError::MissingField("currentStepId"))?;

        let workflow = self.load_workflow(&workflow_id).await?;
        let steps = self.store.steps_for_workflow(&workflow_id).await?;
        let current = steps
            .iter()
            .find(|s| s.id == step_id)
            .cloned()
            .ok_or(EngineError::StaleDelivery { step_id })?;
        if !current.status.is_executable() {
            return Err(EngineError::StaleDelivery { step_id });
        }

        let is_retrial = payload.is_retrial_attempt != 0;
        let outcome = match payload.task_status {
            TaskStatus::ReadyToStart => {
                // Resolve the handler before mutating anything so an
                // unregistered kind leaves no trace.
                if !self.registry.contains(kind) {
                    return Err(EngineError::UnknownStepKind(kind));
                }
                if !self.store.mark_step_pending(&step_id).await? {
                    return Err(EngineError::StaleDelivery { step_id });
                }
                self.cache.invalidate(&workflow_id).await?;
                self.execute_handler(&workflow, &current, route, &steps, is_retrial)
                    .await
            }
            // Externally observed outcome for a step already in flight,
            // e.g. a transaction confirmation callback.
            TaskStatus::Done => StepOutcome::default(),
            TaskStatus::Failed => StepOutcome {
                task_status: OutcomeStatus::Failed,
                ..StepOutcome::default()
            },
        };

        match self
            .finish(&workflow, &current, route, &steps, outcome, is_retrial)
            .await
        {
            Ok(receipt) => Ok(receipt),
            Err(err) => {
                // The handler may have run; leave a failed row with the
                // error recorded rather than a step stuck in pending.
                tracing::error!(
                    workflow_id = %workflow_id,
                    step_id = %step_id,
                    step_kind = %kind,
                    error = %err,
                    "post-execution failure; marking step failed"
                );
                let _ = self
                    .store
                    .update_step_result(
                        &step_id,
                        StepResult {
                            status: StepStatus::Failed,
                            response_data: None,
                            transaction_hash: None,
                            debug_params: Some(json!({ "engine_error": err.to_string() })),
                        },
                    )
                    .await;
                let _ = self.cache.invalidate(&workflow_id).await;
                Err(err)
            }
        }
    }

    // -- internals ---------------------------------------------------------

    async fn load_workflow(&self, id: &Uuid) -> Result<Workflow, EngineError> {
        if let Some(workflow) = self.cache.get(id).await? {
            return Ok(workflow);
        }
        let workflow = self
            .store
            .get_workflow(id)
            .await?
            .ok_or(EngineError::WorkflowNotFound(*id))?;
        self.cache.set(&workflow).await?;
        Ok(workflow)
    }

    /// Assemble the request context and run the business handler. Handler
    /// errors are normalized to a failed outcome, never propagated.
    async fn execute_handler(
        &self,
        workflow: &Workflow,
        current: &WorkflowStep,
        route: StepRoute,
        steps: &[WorkflowStep],
        is_retrial: bool,
    ) -> StepOutcome {
        let mut params = workflow.request_params.clone();
        params.merge(&current.request_params);
        for &dep in route.read_data_from {
            let produced = steps
                .iter()
                .rev()
                .find(|s| s.kind == dep && s.status == StepStatus::Processed);
            if let Some(dep_step) = produced {
                params.merge(&dep_step.response_data);
            }
        }
        params.insert("chain_kind", json!(chain_for(current.kind).as_str()));

        let handler = self
            .registry
            .get(current.kind)
            .expect("handler presence checked before claiming the step");
        let request = StepRequest {
            workflow_id: workflow.id,
            step_id: current.id,
            step_kind: current.kind,
            request_params: params,
            is_retrial,
        };
        match handler.perform(request).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(
                    workflow_id = %workflow.id,
                    step_id = %current.id,
                    step_kind = %current.kind,
                    error = %err,
                    "step handler failed"
                );
                StepOutcome::failed(json!({ "handler_error": err.to_string() }))
            }
        }
    }

    /// Persist the outcome and schedule successors (or a rollback).
    async fn finish(
        &self,
        workflow: &Workflow,
        current: &WorkflowStep,
        route: StepRoute,
        steps: &[WorkflowStep],
        outcome: StepOutcome,
        is_retrial: bool,
    ) -> Result<PerformReceipt, EngineError> {
        let final_status = match outcome.task_status {
            OutcomeStatus::Done => StepStatus::Processed,
            OutcomeStatus::Failed => StepStatus::Failed,
        };
        self.store
            .update_step_result(
                &current.id,
                StepResult {
                    status: final_status,
                    response_data: outcome.response_data.clone(),
                    transaction_hash: outcome.transaction_hash.clone(),
                    debug_params: outcome.debug.clone(),
                },
            )
            .await?;

        // Sibling statuses must be read after this step's terminal write.
        // Concurrent fork branches each see a pre-execution snapshot in
        // `steps`; whichever branch persists last has to observe the others'
        // results here, or an AND-join would never be scheduled.
        let mut status_by_kind: HashMap<StepKind, StepStatus> = self
            .store
            .steps_for_workflow(&workflow.id)
            .await?
            .iter()
            .map(|s| (s.kind, s.status))
            .collect();
        status_by_kind.insert(current.kind, final_status);

        if let Some(fe) = &outcome.fe_response_data {
            self.store.merge_workflow_response(&workflow.id, fe).await?;
        }
        if final_status == StepStatus::Processed {
            if let Some(terminal) = current.kind.terminal_status() {
                self.store.update_workflow_status(&workflow.id, terminal).await?;
                tracing::info!(
                    workflow_id = %workflow.id,
                    workflow_kind = %workflow.kind,
                    status = %terminal.as_str(),
                    "workflow reached terminal status"
                );
            }
        }

        let mut scheduled = Vec::new();
        if final_status == StepStatus::Processed {
            for &next in route.on_success {
                if let Some(kind) = self.schedule(workflow, next, &status_by_kind).await? {
                    scheduled.push(kind);
                }
            }
        } else if let Some(retry_from) = outcome.retry_from_id {
            let kind = self.rollback(workflow, steps, retry_from).await?;
            scheduled.push(kind);
        } else if let Some(fallback) = route.on_failure {
            if let Some(kind) = self.schedule(workflow, fallback, &status_by_kind).await? {
                scheduled.push(kind);
            }
        }

        self.cache.invalidate(&workflow.id).await?;
        tracing::debug!(
            workflow_id = %workflow.id,
            step_id = %current.id,
            step_kind = %current.kind,
            status = %final_status.as_str(),
            is_retrial,
            scheduled = scheduled.len(),
            "delivery processed"
        );
        Ok(PerformReceipt {
            workflow_id: workflow.id,
            step_id: current.id,
            step_kind: current.kind,
            step_status: final_status,
            scheduled,
        })
    }

    /// Insert and publish one successor if its AND-join prerequisites are
    /// all processed. Returns `None` when the join must wait or another
    /// branch already created the row.
    async fn schedule(
        &self,
        workflow: &Workflow,
        kind: StepKind,
        status_by_kind: &HashMap<StepKind, StepStatus>,
    ) -> Result<Option<StepKind>, EngineError> {
        let next_route = route_for(kind).ok_or(EngineError::UnknownStepKind(kind))?;
        let ready = next_route
            .prerequisites
            .iter()
            .all(|p| status_by_kind.get(p) == Some(&StepStatus::Processed));
        if !ready {
            tracing::debug!(
                workflow_id = %workflow.id,
                step_kind = %kind,
                "join prerequisites not yet processed; leaving for a later branch"
            );
            return Ok(None);
        }

        let insert = self
            .store
            .insert_step(NewStep {
                id: Uuid::now_v7(),
                workflow_id: workflow.id,
                kind,
                status: StepStatus::Queued,
                request_params: workflow.request_params.clone(),
                unique_hash: step_unique_hash(&workflow.id, kind),
            })
            .await;
        match insert {
            Ok(step) => {
                self.publisher
                    .publish(step_ready(
                        self.config.topic_for(workflow.kind),
                        self.config.publisher.clone(),
                        kind,
                        workflow.id,
                        step.id,
                        false,
                    ))
                    .await?;
                Ok(Some(kind))
            }
            Err(e) if e.is_conflict() => {
                // Another branch won the race; its delivery is in flight.
                tracing::debug!(
                    workflow_id = %workflow.id,
                    step_kind = %kind,
                    "step already scheduled"
                );
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Retry-by-rollback: supersede every row at or after the target's
    /// sequence, then requeue the target kind as a fresh row flagged as a
    /// retrial attempt.
    async fn rollback(
        &self,
        workflow: &Workflow,
        steps: &[WorkflowStep],
        retry_from: Uuid,
    ) -> Result<StepKind, EngineError> {
        let target = steps
            .iter()
            .find(|s| s.id == retry_from)
            .ok_or(EngineError::RetryTargetNotFound(retry_from))?;

        let swept = self
            .store
            .mark_steps_retried(&workflow.id, target.sequence)
            .await?;
        tracing::info!(
            workflow_id = %workflow.id,
            retry_from_kind = %target.kind,
            from_sequence = target.sequence,
            swept,
            "rolled back workflow steps for retry"
        );

        let step = self
            .store
            .insert_step(NewStep {
                id: Uuid::now_v7(),
                workflow_id: workflow.id,
                kind: target.kind,
                status: StepStatus::Queued,
                request_params: target.request_params.clone(),
                unique_hash: step_unique_hash(&workflow.id, target.kind),
            })
            .await?;
        self.publisher
            .publish(step_ready(
                self.config.topic_for(workflow.kind),
                self.config.publisher.clone(),
                target.kind,
                workflow.id,
                step.id,
                true,
            ))
            .await?;
        Ok(target.kind)
    }
}
