//! Workflow domain types for Ledgerflow.
//!
//! Defines the persistent execution records (`Workflow`, `WorkflowStep`),
//! the status machines for both, and the step/workflow kind enums that key
//! the static step graph. Unique-hash helpers for trigger dedupe and
//! at-most-one-live-row-per-kind enforcement also live here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::context::WorkflowContext;

// ---------------------------------------------------------------------------
// Workflow kind
// ---------------------------------------------------------------------------

/// The family of workflow a run belongs to. Each kind owns a disjoint set
/// of [`StepKind`]s and its own step graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    /// Deploy and wire up a branded-token economy across both chains.
    EconomySetup,
    /// Recover a user's token-holder device via the recovery module.
    UserRecovery,
    /// Redeem branded tokens back to the value token and settle balances.
    Redemption,
}

impl WorkflowKind {
    /// Stable string form used in storage and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowKind::EconomySetup => "economy_setup",
            WorkflowKind::UserRecovery => "user_recovery",
            WorkflowKind::Redemption => "redemption",
        }
    }

    /// Parse from the stable string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "economy_setup" => Some(WorkflowKind::EconomySetup),
            "user_recovery" => Some(WorkflowKind::UserRecovery),
            "redemption" => Some(WorkflowKind::Redemption),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Step kind
// ---------------------------------------------------------------------------

/// One node of a workflow's step DAG.
///
/// Kinds are scoped to a single [`WorkflowKind`]; [`StepKind::workflow_kind`]
/// recovers the owner. Terminal marker kinds flip the parent workflow into
/// its terminal status when they complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    // -- economy setup --
    EconomySetupInit,
    GenerateTokenAddresses,
    FundChainOwner,
    DeployOriginToken,
    SetOriginAdmin,
    DeployOriginTokenOrganization,
    DeployUtilityToken,
    DeployGateway,
    ActivateGateway,
    AssignShards,
    MarkEconomySetupSuccess,
    MarkEconomySetupFailed,

    // -- user recovery --
    UserRecoveryInit,
    InitiateRecovery,
    ExecuteRecovery,
    VerifyRecovery,
    MarkUserRecoverySuccess,
    MarkUserRecoveryFailed,

    // -- redemption --
    RedemptionInit,
    ValidateRedemption,
    ExecuteRedemption,
    SettleBalances,
    SendRedemptionReceipt,
    MarkRedemptionSuccess,
    MarkRedemptionFailed,
}

impl StepKind {
    /// Stable string form used in storage, queue payloads, and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::EconomySetupInit => "economy_setup_init",
            StepKind::GenerateTokenAddresses => "generate_token_addresses",
            StepKind::FundChainOwner => "fund_chain_owner",
            StepKind::DeployOriginToken => "deploy_origin_token",
            StepKind::SetOriginAdmin => "set_origin_admin",
            StepKind::DeployOriginTokenOrganization => "deploy_origin_token_organization",
            StepKind::DeployUtilityToken => "deploy_utility_token",
            StepKind::DeployGateway => "deploy_gateway",
            StepKind::ActivateGateway => "activate_gateway",
            StepKind::AssignShards => "assign_shards",
            StepKind::MarkEconomySetupSuccess => "mark_economy_setup_success",
            StepKind::MarkEconomySetupFailed => "mark_economy_setup_failed",
            StepKind::UserRecoveryInit => "user_recovery_init",
            StepKind::InitiateRecovery => "initiate_recovery",
            StepKind::ExecuteRecovery => "execute_recovery",
            StepKind::VerifyRecovery => "verify_recovery",
            StepKind::MarkUserRecoverySuccess => "mark_user_recovery_success",
            StepKind::MarkUserRecoveryFailed => "mark_user_recovery_failed",
            StepKind::RedemptionInit => "redemption_init",
            StepKind::ValidateRedemption => "validate_redemption",
            StepKind::ExecuteRedemption => "execute_redemption",
            StepKind::SettleBalances => "settle_balances",
            StepKind::SendRedemptionReceipt => "send_redemption_receipt",
            StepKind::MarkRedemptionSuccess => "mark_redemption_success",
            StepKind::MarkRedemptionFailed => "mark_redemption_failed",
        }
    }

    /// Parse from the stable string form.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "economy_setup_init" => StepKind::EconomySetupInit,
            "generate_token_addresses" => StepKind::GenerateTokenAddresses,
            "fund_chain_owner" => StepKind::FundChainOwner,
            "deploy_origin_token" => StepKind::DeployOriginToken,
            "set_origin_admin" => StepKind::SetOriginAdmin,
            "deploy_origin_token_organization" => StepKind::DeployOriginTokenOrganization,
            "deploy_utility_token" => StepKind::DeployUtilityToken,
            "deploy_gateway" => StepKind::DeployGateway,
            "activate_gateway" => StepKind::ActivateGateway,
            "assign_shards" => StepKind::AssignShards,
            "mark_economy_setup_success" => StepKind::MarkEconomySetupSuccess,
            "mark_economy_setup_failed" => StepKind::MarkEconomySetupFailed,
            "user_recovery_init" => StepKind::UserRecoveryInit,
            "initiate_recovery" => StepKind::InitiateRecovery,
            "execute_recovery" => StepKind::ExecuteRecovery,
            "verify_recovery" => StepKind::VerifyRecovery,
            "mark_user_recovery_success" => StepKind::MarkUserRecoverySuccess,
            "mark_user_recovery_failed" => StepKind::MarkUserRecoveryFailed,
            "redemption_init" => StepKind::RedemptionInit,
            "validate_redemption" => StepKind::ValidateRedemption,
            "execute_redemption" => StepKind::ExecuteRedemption,
            "settle_balances" => StepKind::SettleBalances,
            "send_redemption_receipt" => StepKind::SendRedemptionReceipt,
            "mark_redemption_success" => StepKind::MarkRedemptionSuccess,
            "mark_redemption_failed" => StepKind::MarkRedemptionFailed,
            _ => return None,
        })
    }

    /// The workflow family this step kind belongs to.
    pub fn workflow_kind(&self) -> WorkflowKind {
        use StepKind::*;
        match self {
            EconomySetupInit | GenerateTokenAddresses | FundChainOwner | DeployOriginToken
            | SetOriginAdmin | DeployOriginTokenOrganization | DeployUtilityToken
            | DeployGateway | ActivateGateway | AssignShards | MarkEconomySetupSuccess
            | MarkEconomySetupFailed => WorkflowKind::EconomySetup,
            UserRecoveryInit | InitiateRecovery | ExecuteRecovery | VerifyRecovery
            | MarkUserRecoverySuccess | MarkUserRecoveryFailed => WorkflowKind::UserRecovery,
            RedemptionInit | ValidateRedemption | ExecuteRedemption | SettleBalances
            | SendRedemptionReceipt | MarkRedemptionSuccess | MarkRedemptionFailed => {
                WorkflowKind::Redemption
            }
        }
    }

    /// If this is a terminal marker step, the workflow status its completion
    /// writes. `None` for ordinary steps.
    pub fn terminal_status(&self) -> Option<WorkflowStatus> {
        match self {
            StepKind::MarkEconomySetupSuccess
            | StepKind::MarkUserRecoverySuccess
            | StepKind::MarkRedemptionSuccess => Some(WorkflowStatus::Completed),
            StepKind::MarkEconomySetupFailed
            | StepKind::MarkUserRecoveryFailed
            | StepKind::MarkRedemptionFailed => Some(WorkflowStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Chain routing
// ---------------------------------------------------------------------------

/// Which chain a step's transactions target. Resolved from the step kind by
/// a static routing table and merged into the step's request params.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainKind {
    Origin,
    Auxiliary,
}

impl ChainKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainKind::Origin => "origin",
            ChainKind::Auxiliary => "auxiliary",
        }
    }
}

// ---------------------------------------------------------------------------
// Status machines
// ---------------------------------------------------------------------------

/// Overall status of a workflow run. Terminal at `Completed` / `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    InProgress,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::InProgress => "in_progress",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(WorkflowStatus::InProgress),
            "completed" => Some(WorkflowStatus::Completed),
            "failed" => Some(WorkflowStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }
}

/// Status of an individual workflow step row.
///
/// `Queued` -> `Pending` -> `Processed` | `Failed`; a rollback supersedes
/// rows by moving them to `Retried`, which excludes them from all
/// prerequisite and data-dependency lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Queued,
    Pending,
    Processed,
    Failed,
    Retried,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Queued => "queued",
            StepStatus::Pending => "pending",
            StepStatus::Processed => "processed",
            StepStatus::Failed => "failed",
            StepStatus::Retried => "retried",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(StepStatus::Queued),
            "pending" => Some(StepStatus::Pending),
            "processed" => Some(StepStatus::Processed),
            "failed" => Some(StepStatus::Failed),
            "retried" => Some(StepStatus::Retried),
            _ => None,
        }
    }

    /// Whether a delivery for a step in this status may still execute.
    pub fn is_executable(&self) -> bool {
        matches!(self, StepStatus::Queued | StepStatus::Pending)
    }
}

// ---------------------------------------------------------------------------
// Persistent records
// ---------------------------------------------------------------------------

/// One run of a multi-step process; the DAG's root context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// UUIDv7 workflow ID.
    pub id: Uuid,
    /// Workflow family.
    pub kind: WorkflowKind,
    /// Current run status.
    pub status: WorkflowStatus,
    /// Owning client, when the trigger is client-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<Uuid>,
    /// Accumulated structured request context, merged by each step.
    pub request_params: WorkflowContext,
    /// Front-end-visible accumulated result (merged, never overwritten).
    pub response_data: WorkflowContext,
    /// Dedupe key for duplicate workflow triggers.
    pub unique_hash: String,
    /// Serialized diagnostic payloads (handler errors, rollback notes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_params: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One step row inside a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// UUIDv7 step ID.
    pub id: Uuid,
    /// Parent workflow.
    pub workflow_id: Uuid,
    /// DAG node kind.
    pub kind: StepKind,
    /// Current step status.
    pub status: StepStatus,
    /// Append-only per-workflow position, assigned at insert. Rollback
    /// sweeps by this index rather than by storage-engine row ordering.
    pub sequence: i64,
    /// Request context snapshot at creation plus merged data dependencies.
    pub request_params: WorkflowContext,
    /// Result payload consumed by dependents via `read_data_from`.
    pub response_data: WorkflowContext,
    /// Hash of the on-chain transaction this step submitted, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    /// `step_unique_hash(workflow_id, kind)`; a partial unique index over
    /// non-retried rows enforces at most one live row per (workflow, kind).
    pub unique_hash: String,
    /// Serialized diagnostic payloads for this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_params: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Unique hashes
// ---------------------------------------------------------------------------

/// Dedupe key for a step row: at most one non-retried row per
/// (workflow, kind) may exist.
pub fn step_unique_hash(workflow_id: &Uuid, kind: StepKind) -> String {
    let mut hasher = Sha256::new();
    hasher.update(workflow_id.as_bytes());
    hasher.update(b":");
    hasher.update(kind.as_str().as_bytes());
    hex_digest(hasher)
}

/// Dedupe key for a workflow trigger. The `seed` is the caller's
/// idempotency token (e.g. a token id or request id); duplicate triggers
/// with the same kind/client/seed collide on this hash.
pub fn workflow_unique_hash(kind: WorkflowKind, client_id: Option<&Uuid>, seed: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b":");
    if let Some(client) = client_id {
        hasher.update(client.as_bytes());
    }
    hasher.update(b":");
    hasher.update(seed.as_bytes());
    hex_digest(hasher)
}

fn hex_digest(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
