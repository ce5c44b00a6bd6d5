//! End-to-end engine tests over in-memory store, cache, and queue fakes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use ledgerflow_core::cache::StatusCache;
use ledgerflow_core::engine::{EngineError, HandlerRegistry, WorkflowEngine};
use ledgerflow_core::graph::all_step_kinds;
use ledgerflow_core::handler::{HandlerError, StepHandler, StepOutcome, StepRequest};
use ledgerflow_core::queue::StepPublisher;
use ledgerflow_core::repository::{NewStep, NewWorkflow, StepResult, WorkflowStore};
use ledgerflow_types::config::EngineConfig;
use ledgerflow_types::context::WorkflowContext;
use ledgerflow_types::error::{CacheError, PublishError, RepositoryError};
use ledgerflow_types::queue::{QueueEnvelope, StepPayload, TaskStatus};
use ledgerflow_types::workflow::{
    StepKind, StepStatus, Workflow, WorkflowKind, WorkflowStatus, WorkflowStep, step_unique_hash,
};
use serde_json::json;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// In-memory fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreInner {
    workflows: HashMap<Uuid, Workflow>,
    steps: Vec<WorkflowStep>,
}

#[derive(Clone, Default)]
struct MemStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MemStore {
    /// Every step row including retried ones, in insertion order.
    fn all_steps(&self, workflow_id: &Uuid) -> Vec<WorkflowStep> {
        self.inner
            .lock()
            .unwrap()
            .steps
            .iter()
            .filter(|s| s.workflow_id == *workflow_id)
            .cloned()
            .collect()
    }

    fn workflow(&self, id: &Uuid) -> Workflow {
        self.inner.lock().unwrap().workflows[id].clone()
    }

    fn live_step(&self, workflow_id: &Uuid, kind: StepKind) -> Option<WorkflowStep> {
        self.inner
            .lock()
            .unwrap()
            .steps
            .iter()
            .find(|s| {
                s.workflow_id == *workflow_id && s.kind == kind && s.status != StepStatus::Retried
            })
            .cloned()
    }
}

impl WorkflowStore for MemStore {
    async fn create_workflow(&self, new: NewWorkflow) -> Result<Workflow, RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.workflows.values().any(|w| w.unique_hash == new.unique_hash) {
            return Err(RepositoryError::Conflict(new.unique_hash));
        }
        let now = Utc::now();
        let workflow = Workflow {
            id: new.id,
            kind: new.kind,
            status: WorkflowStatus::InProgress,
            client_id: new.client_id,
            request_params: new.request_params,
            response_data: WorkflowContext::new(),
            unique_hash: new.unique_hash,
            debug_params: None,
            created_at: now,
            updated_at: now,
        };
        inner.workflows.insert(workflow.id, workflow.clone());
        Ok(workflow)
    }

    async fn get_workflow(&self, id: &Uuid) -> Result<Option<Workflow>, RepositoryError> {
        Ok(self.inner.lock().unwrap().workflows.get(id).cloned())
    }

    async fn update_workflow_status(
        &self,
        id: &Uuid,
        status: WorkflowStatus,
    ) -> Result<(), RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        let workflow = inner.workflows.get_mut(id).ok_or(RepositoryError::NotFound)?;
        workflow.status = status;
        workflow.updated_at = Utc::now();
        Ok(())
    }

    async fn merge_workflow_response(
        &self,
        id: &Uuid,
        response: &WorkflowContext,
    ) -> Result<(), RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        let workflow = inner.workflows.get_mut(id).ok_or(RepositoryError::NotFound)?;
        workflow.response_data.merge_preserving(response);
        workflow.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_step(&self, new: NewStep) -> Result<WorkflowStep, RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        let duplicate = inner
            .steps
            .iter()
            .any(|s| s.unique_hash == new.unique_hash && s.status != StepStatus::Retried);
        if duplicate {
            return Err(RepositoryError::Conflict(new.unique_hash));
        }
        let sequence = inner
            .steps
            .iter()
            .filter(|s| s.workflow_id == new.workflow_id)
            .map(|s| s.sequence)
            .max()
            .unwrap_or(0)
            + 1;
        let now = Utc::now();
        let step = WorkflowStep {
            id: new.id,
            workflow_id: new.workflow_id,
            kind: new.kind,
            status: new.status,
            sequence,
            request_params: new.request_params,
            response_data: WorkflowContext::new(),
            transaction_hash: None,
            unique_hash: new.unique_hash,
            debug_params: None,
            created_at: now,
            updated_at: now,
        };
        inner.steps.push(step.clone());
        Ok(step)
    }

    async fn get_step(&self, id: &Uuid) -> Result<Option<WorkflowStep>, RepositoryError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .steps
            .iter()
            .find(|s| s.id == *id)
            .cloned())
    }

    async fn steps_for_workflow(
        &self,
        workflow_id: &Uuid,
    ) -> Result<Vec<WorkflowStep>, RepositoryError> {
        let mut steps: Vec<WorkflowStep> = self
            .inner
            .lock()
            .unwrap()
            .steps
            .iter()
            .filter(|s| s.workflow_id == *workflow_id && s.status != StepStatus::Retried)
            .cloned()
            .collect();
        steps.sort_by_key(|s| s.sequence);
        Ok(steps)
    }

    async fn mark_step_pending(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.steps.iter_mut().find(|s| s.id == *id) {
            Some(step) if step.status.is_executable() => {
                step.status = StepStatus::Pending;
                step.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_step_result(&self, id: &Uuid, result: StepResult) -> Result<(), RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        let step = inner
            .steps
            .iter_mut()
            .find(|s| s.id == *id)
            .ok_or(RepositoryError::NotFound)?;
        step.status = result.status;
        if let Some(response) = result.response_data {
            step.response_data = response;
        }
        if result.transaction_hash.is_some() {
            step.transaction_hash = result.transaction_hash;
        }
        if result.debug_params.is_some() {
            step.debug_params = result.debug_params;
        }
        step.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_steps_retried(
        &self,
        workflow_id: &Uuid,
        from_sequence: i64,
    ) -> Result<u64, RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        let mut swept = 0;
        for step in inner.steps.iter_mut().filter(|s| {
            s.workflow_id == *workflow_id
                && s.sequence >= from_sequence
                && s.status != StepStatus::Retried
        }) {
            step.status = StepStatus::Retried;
            step.updated_at = Utc::now();
            swept += 1;
        }
        Ok(swept)
    }
}

#[derive(Clone, Default)]
struct MemCache {
    inner: Arc<Mutex<HashMap<Uuid, Workflow>>>,
}

impl StatusCache for MemCache {
    async fn get(&self, id: &Uuid) -> Result<Option<Workflow>, CacheError> {
        Ok(self.inner.lock().unwrap().get(id).cloned())
    }

    async fn set(&self, workflow: &Workflow) -> Result<(), CacheError> {
        self.inner.lock().unwrap().insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn invalidate(&self, id: &Uuid) -> Result<(), CacheError> {
        self.inner.lock().unwrap().remove(id);
        Ok(())
    }
}

#[derive(Default)]
struct QueueInner {
    pending: Vec<QueueEnvelope>,
    history: Vec<QueueEnvelope>,
}

#[derive(Clone, Default)]
struct MemQueue {
    inner: Arc<Mutex<QueueInner>>,
}

impl MemQueue {
    fn pop(&self) -> Option<QueueEnvelope> {
        let mut inner = self.inner.lock().unwrap();
        if inner.pending.is_empty() {
            None
        } else {
            Some(inner.pending.remove(0))
        }
    }

    fn history(&self) -> Vec<QueueEnvelope> {
        self.inner.lock().unwrap().history.clone()
    }

    fn published_count(&self) -> usize {
        self.inner.lock().unwrap().history.len()
    }
}

impl StepPublisher for MemQueue {
    async fn publish(&self, envelope: QueueEnvelope) -> Result<(), PublishError> {
        let mut inner = self.inner.lock().unwrap();
        inner.history.push(envelope.clone());
        inner.pending.push(envelope);
        Ok(())
    }
}

/// Accepts a fixed number of publishes, then reports the broker as down.
#[derive(Clone)]
struct FlakyQueue {
    inner: MemQueue,
    remaining: Arc<Mutex<u32>>,
}

impl StepPublisher for FlakyQueue {
    async fn publish(&self, envelope: QueueEnvelope) -> Result<(), PublishError> {
        {
            let mut remaining = self.remaining.lock().unwrap();
            if *remaining == 0 {
                return Err(PublishError::Backend("broker unavailable".to_string()));
            }
            *remaining -= 1;
        }
        self.inner.publish(envelope).await
    }
}

// ---------------------------------------------------------------------------
// Test handlers
// ---------------------------------------------------------------------------

/// Succeeds and tags its response with the step kind so merges are visible.
#[derive(Clone, Default)]
struct AlwaysOk;

impl StepHandler for AlwaysOk {
    async fn perform(&self, request: StepRequest) -> Result<StepOutcome, HandlerError> {
        let key = format!("{}_result", request.step_kind);
        let mut outcome = StepOutcome::done(WorkflowContext::from_pairs([(
            key.clone(),
            json!("ok"),
        )]));
        outcome.fe_response_data = Some(WorkflowContext::from_pairs([(key, json!("ok"))]));
        Ok(outcome)
    }
}

/// Succeeds and records its step id into a shared slot.
#[derive(Clone)]
struct RecordingOk {
    slot: Arc<Mutex<Option<Uuid>>>,
}

impl StepHandler for RecordingOk {
    async fn perform(&self, request: StepRequest) -> Result<StepOutcome, HandlerError> {
        *self.slot.lock().unwrap() = Some(request.step_id);
        Ok(StepOutcome::done(WorkflowContext::new()))
    }
}

/// Fails with a handler error on every invocation.
#[derive(Clone)]
struct Broken;

impl StepHandler for Broken {
    async fn perform(&self, _request: StepRequest) -> Result<StepOutcome, HandlerError> {
        Err(HandlerError::new("rpc timeout"))
    }
}

/// Parks until a partner handler arrives, so two branch deliveries are
/// guaranteed to execute with interleaved lifetimes.
#[derive(Clone)]
struct Rendezvous {
    barrier: Arc<tokio::sync::Barrier>,
}

impl StepHandler for Rendezvous {
    async fn perform(&self, _request: StepRequest) -> Result<StepOutcome, HandlerError> {
        self.barrier.wait().await;
        Ok(StepOutcome::done(WorkflowContext::new()))
    }
}

/// Fails but still reports a front-end-visible payload.
#[derive(Clone)]
struct FailsWithNotice;

impl StepHandler for FailsWithNotice {
    async fn perform(&self, _request: StepRequest) -> Result<StepOutcome, HandlerError> {
        let mut outcome = StepOutcome::failed(json!({"code": "E42"}));
        outcome.fe_response_data = Some(WorkflowContext::from_pairs([(
            "validation_error_code".to_string(),
            json!("E42"),
        )]));
        Ok(outcome)
    }
}

/// Requests a rollback to the recorded step on first invocation, then
/// succeeds.
#[derive(Clone)]
struct VerifyOnceFlaky {
    target: Arc<Mutex<Option<Uuid>>>,
    failed: Arc<AtomicBool>,
}

impl StepHandler for VerifyOnceFlaky {
    async fn perform(&self, _request: StepRequest) -> Result<StepOutcome, HandlerError> {
        if !self.failed.swap(true, Ordering::SeqCst) {
            let target = self.target.lock().unwrap().expect("target recorded");
            Ok(StepOutcome::retry_from(target, json!({"reason": "receipt not found"})))
        } else {
            Ok(StepOutcome::done(WorkflowContext::new()))
        }
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

type TestEngine = WorkflowEngine<MemStore, MemCache, MemQueue>;

struct Harness {
    store: MemStore,
    queue: MemQueue,
    engine: TestEngine,
}

fn harness(registry: HandlerRegistry) -> Harness {
    let store = MemStore::default();
    let cache = MemCache::default();
    let queue = MemQueue::default();
    let engine = WorkflowEngine::new(
        store.clone(),
        cache.clone(),
        queue.clone(),
        registry,
        EngineConfig::default(),
    );
    Harness { store, queue, engine }
}

fn registry_all_ok() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    for &kind in all_step_kinds() {
        registry.register(kind, AlwaysOk);
    }
    registry
}

impl Harness {
    /// Process deliveries until the queue drains, like the queue worker.
    async fn drain(&self) {
        while let Some(envelope) = self.queue.pop() {
            self.engine.perform(envelope.message.payload).await.unwrap();
        }
    }
}

// ---------------------------------------------------------------------------
// Bootstrap and dedupe
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bootstrap_creates_workflow_and_publishes_init() {
    let h = harness(registry_all_ok());
    let (workflow, step) = h
        .engine
        .insert_init_step(WorkflowKind::EconomySetup, None, WorkflowContext::new(), "tkn-1")
        .await
        .unwrap();

    assert_eq!(workflow.status, WorkflowStatus::InProgress);
    assert_eq!(step.kind, StepKind::EconomySetupInit);
    assert_eq!(step.status, StepStatus::Queued);
    assert_eq!(step.sequence, 1);

    let history = h.queue.history();
    assert_eq!(history.len(), 1);
    let payload = &history[0].message.payload;
    assert_eq!(payload.step_kind, StepKind::EconomySetupInit);
    assert_eq!(payload.workflow_id, Some(workflow.id));
    assert_eq!(payload.current_step_id, Some(step.id));
    assert_eq!(history[0].topics, vec!["workflow.economy_setup".to_string()]);
}

#[tokio::test]
async fn duplicate_trigger_is_rejected_without_side_effects() {
    let h = harness(registry_all_ok());
    let (workflow, _) = h
        .engine
        .insert_init_step(WorkflowKind::Redemption, None, WorkflowContext::new(), "rdm-9")
        .await
        .unwrap();

    let err = h
        .engine
        .insert_init_step(WorkflowKind::Redemption, None, WorkflowContext::new(), "rdm-9")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DuplicateWorkflow(_)));
    assert!(!err.is_retryable());

    assert_eq!(h.store.all_steps(&workflow.id).len(), 1);
    assert_eq!(h.queue.published_count(), 1);
}

#[tokio::test]
async fn bare_init_message_bootstraps_inline() {
    let h = harness(registry_all_ok());
    let payload = StepPayload {
        step_kind: StepKind::UserRecoveryInit,
        task_status: TaskStatus::ReadyToStart,
        current_step_id: None,
        workflow_id: None,
        is_retrial_attempt: 0,
    };
    let receipt = h.engine.perform(payload).await.unwrap();
    let workflow = h.store.workflow(&receipt.workflow_id);
    assert_eq!(workflow.kind, WorkflowKind::UserRecovery);
    assert!(h.store.live_step(&workflow.id, StepKind::UserRecoveryInit).is_some());
}

// ---------------------------------------------------------------------------
// Full runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn economy_setup_runs_to_completion() {
    let h = harness(registry_all_ok());
    let (workflow, _) = h
        .engine
        .insert_init_step(WorkflowKind::EconomySetup, None, WorkflowContext::new(), "tkn-1")
        .await
        .unwrap();
    h.drain().await;

    let workflow = h.store.workflow(&workflow.id);
    assert_eq!(workflow.status, WorkflowStatus::Completed);

    let steps = h.store.all_steps(&workflow.id);
    // Success path only: no failure marker, no duplicate join rows.
    assert_eq!(steps.len(), 11);
    assert!(steps.iter().all(|s| s.status == StepStatus::Processed));
    assert_eq!(
        steps
            .iter()
            .filter(|s| s.kind == StepKind::DeployOriginTokenOrganization)
            .count(),
        1
    );
    assert!(steps.iter().all(|s| s.kind != StepKind::MarkEconomySetupFailed));

    // Front-end results accumulated on the workflow row.
    assert_eq!(
        workflow.response_data.get("assign_shards_result"),
        Some(&json!("ok"))
    );
}

#[tokio::test]
async fn redemption_fan_out_completes_via_join() {
    let h = harness(registry_all_ok());
    let (workflow, _) = h
        .engine
        .insert_init_step(WorkflowKind::Redemption, None, WorkflowContext::new(), "rdm-1")
        .await
        .unwrap();
    h.drain().await;

    let workflow = h.store.workflow(&workflow.id);
    assert_eq!(workflow.status, WorkflowStatus::Completed);
    let steps = h.store.all_steps(&workflow.id);
    assert_eq!(
        steps
            .iter()
            .filter(|s| s.kind == StepKind::MarkRedemptionSuccess)
            .count(),
        1
    );
}

// ---------------------------------------------------------------------------
// Idempotency and staleness
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_ready_delivery_is_rejected_without_mutation() {
    let h = harness(registry_all_ok());
    let (workflow, _) = h
        .engine
        .insert_init_step(WorkflowKind::UserRecovery, None, WorkflowContext::new(), "usr-1")
        .await
        .unwrap();

    let first = h.queue.pop().unwrap();
    let duplicate = first.clone();
    h.engine.perform(first.message.payload).await.unwrap();

    let steps_before = h.store.all_steps(&workflow.id).len();
    let published_before = h.queue.published_count();

    let err = h.engine.perform(duplicate.message.payload).await.unwrap_err();
    assert!(matches!(err, EngineError::StaleDelivery { .. }));
    assert!(!err.is_retryable());
    assert_eq!(h.store.all_steps(&workflow.id).len(), steps_before);
    assert_eq!(h.queue.published_count(), published_before);
}

#[tokio::test]
async fn workflow_not_found_is_fatal() {
    let h = harness(registry_all_ok());
    let payload = StepPayload {
        step_kind: StepKind::ValidateRedemption,
        task_status: TaskStatus::ReadyToStart,
        current_step_id: Some(Uuid::now_v7()),
        workflow_id: Some(Uuid::now_v7()),
        is_retrial_attempt: 0,
    };
    let err = h.engine.perform(payload).await.unwrap_err();
    assert!(matches!(err, EngineError::WorkflowNotFound(_)));
}

#[tokio::test]
async fn unregistered_handler_leaves_step_untouched() {
    let mut registry = HandlerRegistry::new();
    // Init handled, everything after unregistered.
    registry.register(StepKind::EconomySetupInit, AlwaysOk);
    let h = harness(registry);
    let (workflow, _) = h
        .engine
        .insert_init_step(WorkflowKind::EconomySetup, None, WorkflowContext::new(), "tkn-1")
        .await
        .unwrap();

    let init = h.queue.pop().unwrap();
    h.engine.perform(init.message.payload).await.unwrap();

    let next = h.queue.pop().unwrap();
    let err = h.engine.perform(next.message.payload).await.unwrap_err();
    assert!(matches!(err, EngineError::UnknownStepKind(StepKind::GenerateTokenAddresses)));

    let step = h
        .store
        .live_step(&workflow.id, StepKind::GenerateTokenAddresses)
        .unwrap();
    assert_eq!(step.status, StepStatus::Queued);
}

// ---------------------------------------------------------------------------
// AND-join resolution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn join_waits_for_every_prerequisite() {
    let h = harness(registry_all_ok());
    let (workflow, _) = h
        .engine
        .insert_init_step(WorkflowKind::EconomySetup, None, WorkflowContext::new(), "tkn-1")
        .await
        .unwrap();

    // init, then generate_token_addresses: fan out to three branches.
    for _ in 0..2 {
        let env = h.queue.pop().unwrap();
        h.engine.perform(env.message.payload).await.unwrap();
    }

    // First two branches complete; the join must not exist yet.
    for _ in 0..2 {
        let env = h.queue.pop().unwrap();
        h.engine.perform(env.message.payload).await.unwrap();
        assert!(
            h.store
                .live_step(&workflow.id, StepKind::DeployOriginTokenOrganization)
                .is_none()
        );
    }

    // Third branch resolves the join exactly once.
    let env = h.queue.pop().unwrap();
    let receipt = h.engine.perform(env.message.payload).await.unwrap();
    assert_eq!(receipt.scheduled, vec![StepKind::DeployOriginTokenOrganization]);
    let join = h
        .store
        .live_step(&workflow.id, StepKind::DeployOriginTokenOrganization)
        .unwrap();
    assert_eq!(join.status, StepStatus::Queued);
}

#[tokio::test]
async fn racing_join_insert_resolves_to_single_row() {
    let h = harness(registry_all_ok());
    let (workflow, _) = h
        .engine
        .insert_init_step(WorkflowKind::EconomySetup, None, WorkflowContext::new(), "tkn-1")
        .await
        .unwrap();

    // Advance through init, fan-out, and two branches.
    for _ in 0..4 {
        let env = h.queue.pop().unwrap();
        h.engine.perform(env.message.payload).await.unwrap();
    }

    // A racing branch already inserted the join row.
    h.store
        .insert_step(NewStep {
            id: Uuid::now_v7(),
            workflow_id: workflow.id,
            kind: StepKind::DeployOriginTokenOrganization,
            status: StepStatus::Queued,
            request_params: WorkflowContext::new(),
            unique_hash: step_unique_hash(&workflow.id, StepKind::DeployOriginTokenOrganization),
        })
        .await
        .unwrap();
    let published_before = h.queue.published_count();

    // The last branch sees the conflict, skips the publish, and succeeds.
    let env = h.queue.pop().unwrap();
    let receipt = h.engine.perform(env.message.payload).await.unwrap();
    assert!(receipt.scheduled.is_empty());
    assert_eq!(h.queue.published_count(), published_before);
    assert_eq!(
        h.store
            .all_steps(&workflow.id)
            .iter()
            .filter(|s| s.kind == StepKind::DeployOriginTokenOrganization)
            .count(),
        1
    );
}

#[tokio::test]
async fn concurrent_branches_still_resolve_the_join() {
    let barrier = Arc::new(tokio::sync::Barrier::new(2));
    let mut registry = registry_all_ok();
    registry.register(
        StepKind::SettleBalances,
        Rendezvous {
            barrier: barrier.clone(),
        },
    );
    registry.register(StepKind::SendRedemptionReceipt, Rendezvous { barrier });
    let h = harness(registry);
    let (workflow, _) = h
        .engine
        .insert_init_step(WorkflowKind::Redemption, None, WorkflowContext::new(), "rdm-1")
        .await
        .unwrap();

    // init, validate, execute: leaves both fan-out branches queued.
    for _ in 0..3 {
        let env = h.queue.pop().unwrap();
        h.engine.perform(env.message.payload).await.unwrap();
    }

    // Both branch deliveries run at once. Each claims its step, then parks
    // in its handler until the other arrives, so each delivery's initial
    // step snapshot predates both result writes. The branch that persists
    // last must still observe the other and schedule the join.
    let a = h.queue.pop().unwrap();
    let b = h.queue.pop().unwrap();
    let (ra, rb) = tokio::join!(
        h.engine.perform(a.message.payload),
        h.engine.perform(b.message.payload)
    );
    let scheduled: Vec<StepKind> = ra
        .unwrap()
        .scheduled
        .into_iter()
        .chain(rb.unwrap().scheduled)
        .collect();
    assert_eq!(scheduled, vec![StepKind::MarkRedemptionSuccess]);

    h.drain().await;
    assert_eq!(h.store.workflow(&workflow.id).status, WorkflowStatus::Completed);
}

// ---------------------------------------------------------------------------
// Failure routing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn handler_error_routes_to_failure_marker() {
    let mut registry = registry_all_ok();
    registry.register(StepKind::ValidateRedemption, Broken);
    let h = harness(registry);
    let (workflow, _) = h
        .engine
        .insert_init_step(WorkflowKind::Redemption, None, WorkflowContext::new(), "rdm-1")
        .await
        .unwrap();
    h.drain().await;

    let workflow = h.store.workflow(&workflow.id);
    assert_eq!(workflow.status, WorkflowStatus::Failed);

    let failed = h
        .store
        .live_step(&workflow.id, StepKind::ValidateRedemption)
        .unwrap();
    assert_eq!(failed.status, StepStatus::Failed);
    assert_eq!(
        failed.debug_params.unwrap()["handler_error"],
        json!("handler error: rpc timeout")
    );

    // Failure path ran, success path never started.
    assert!(h.store.live_step(&workflow.id, StepKind::MarkRedemptionFailed).is_some());
    assert!(h.store.live_step(&workflow.id, StepKind::ExecuteRedemption).is_none());
}

#[tokio::test]
async fn failed_step_front_end_payload_is_still_merged() {
    let mut registry = registry_all_ok();
    registry.register(StepKind::ValidateRedemption, FailsWithNotice);
    let h = harness(registry);
    let (workflow, _) = h
        .engine
        .insert_init_step(WorkflowKind::Redemption, None, WorkflowContext::new(), "rdm-1")
        .await
        .unwrap();
    h.drain().await;

    let workflow = h.store.workflow(&workflow.id);
    assert_eq!(workflow.status, WorkflowStatus::Failed);
    // The front-end payload reaches the workflow row even though the step
    // failed.
    assert_eq!(
        workflow.response_data.get("validation_error_code"),
        Some(&json!("E42"))
    );
}

#[tokio::test]
async fn publish_failure_after_insert_marks_the_step_failed() {
    let store = MemStore::default();
    let queue = MemQueue::default();
    let flaky = FlakyQueue {
        inner: queue.clone(),
        remaining: Arc::new(Mutex::new(1)),
    };
    let engine = WorkflowEngine::new(
        store.clone(),
        MemCache::default(),
        flaky,
        registry_all_ok(),
        EngineConfig::default(),
    );

    let (workflow, _) = engine
        .insert_init_step(WorkflowKind::UserRecovery, None, WorkflowContext::new(), "usr-1")
        .await
        .unwrap();

    // The init handler succeeds, but publishing its successor fails.
    let env = queue.pop().unwrap();
    let err = engine.perform(env.message.payload).await.unwrap_err();
    assert!(matches!(err, EngineError::Publish(_)));
    assert!(err.is_retryable());

    // The successor row exists with no message in flight; the funnel left
    // the current step failed with the error recorded for redelivery to
    // find.
    assert!(store.live_step(&workflow.id, StepKind::InitiateRecovery).is_some());
    let init = store.live_step(&workflow.id, StepKind::UserRecoveryInit).unwrap();
    assert_eq!(init.status, StepStatus::Failed);
    assert!(
        init.debug_params.unwrap()["engine_error"]
            .as_str()
            .unwrap()
            .contains("broker unavailable")
    );
}

#[tokio::test]
async fn external_done_delivery_completes_pending_step() {
    let h = harness(registry_all_ok());
    let (workflow, step) = h
        .engine
        .insert_init_step(WorkflowKind::UserRecovery, None, WorkflowContext::new(), "usr-1")
        .await
        .unwrap();

    // The step was claimed but its confirmation arrives out of band.
    assert!(h.store.mark_step_pending(&step.id).await.unwrap());
    let payload = StepPayload {
        step_kind: StepKind::UserRecoveryInit,
        task_status: TaskStatus::Done,
        current_step_id: Some(step.id),
        workflow_id: Some(workflow.id),
        is_retrial_attempt: 0,
    };
    let receipt = h.engine.perform(payload).await.unwrap();
    assert_eq!(receipt.step_status, StepStatus::Processed);
    assert_eq!(receipt.scheduled, vec![StepKind::InitiateRecovery]);
}

// ---------------------------------------------------------------------------
// Retry by rollback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rollback_supersedes_rows_and_requeues_target() {
    let execute_id = Arc::new(Mutex::new(None));
    let mut registry = registry_all_ok();
    registry.register(
        StepKind::ExecuteRecovery,
        RecordingOk {
            slot: execute_id.clone(),
        },
    );
    registry.register(
        StepKind::VerifyRecovery,
        VerifyOnceFlaky {
            target: execute_id.clone(),
            failed: Arc::new(AtomicBool::new(false)),
        },
    );
    let h = harness(registry);
    let (workflow, _) = h
        .engine
        .insert_init_step(WorkflowKind::UserRecovery, None, WorkflowContext::new(), "usr-1")
        .await
        .unwrap();
    h.drain().await;

    let workflow = h.store.workflow(&workflow.id);
    assert_eq!(workflow.status, WorkflowStatus::Completed);

    let steps = h.store.all_steps(&workflow.id);
    // First execute and first verify were superseded.
    let retried: Vec<StepKind> = steps
        .iter()
        .filter(|s| s.status == StepStatus::Retried)
        .map(|s| s.kind)
        .collect();
    assert_eq!(retried, vec![StepKind::ExecuteRecovery, StepKind::VerifyRecovery]);
    // The rerun rows completed.
    assert_eq!(
        steps
            .iter()
            .filter(|s| s.kind == StepKind::ExecuteRecovery && s.status == StepStatus::Processed)
            .count(),
        1
    );

    // The requeued execute message was flagged as a retrial attempt.
    let retrial = h
        .queue
        .history()
        .into_iter()
        .find(|e| e.message.payload.is_retrial_attempt == 1)
        .unwrap();
    assert_eq!(retrial.message.payload.step_kind, StepKind::ExecuteRecovery);
}
