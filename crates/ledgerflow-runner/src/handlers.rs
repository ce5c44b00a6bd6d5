//! Simulated step handlers for dry runs.
//!
//! Real deployments register handlers that submit chain transactions and
//! call platform services. The runner instead wires one simulated handler
//! per step kind, producing plausible response payloads so the full engine
//! path (fan-out, joins, context merging, terminal markers) can be
//! exercised locally against a real database and queue.

use ledgerflow_core::engine::HandlerRegistry;
use ledgerflow_core::graph::all_step_kinds;
use ledgerflow_core::handler::{HandlerError, StepHandler, StepOutcome, StepRequest};
use ledgerflow_types::context::WorkflowContext;
use ledgerflow_types::workflow::StepKind;
use serde_json::json;
use uuid::Uuid;

fn fake_address() -> String {
    format!("0x{}", &Uuid::now_v7().simple().to_string()[..20])
}

fn fake_tx_hash() -> String {
    format!("0x{}", Uuid::now_v7().simple())
}

/// Produces a canned success for every step kind.
pub struct SimulatedStep;

impl StepHandler for SimulatedStep {
    async fn perform(&self, request: StepRequest) -> Result<StepOutcome, HandlerError> {
        let mut response = WorkflowContext::new();
        let mut transaction_hash = None;

        match request.step_kind {
            StepKind::GenerateTokenAddresses => {
                response.insert(
                    "addresses",
                    json!({
                        "owner": fake_address(),
                        "admin": fake_address(),
                        "worker": fake_address(),
                    }),
                );
            }
            StepKind::DeployOriginToken => {
                response.insert("token_address", json!(fake_address()));
                transaction_hash = Some(fake_tx_hash());
            }
            StepKind::DeployUtilityToken => {
                response.insert("utility_token_address", json!(fake_address()));
                transaction_hash = Some(fake_tx_hash());
            }
            StepKind::DeployGateway => {
                response.insert("gateway_address", json!(fake_address()));
                transaction_hash = Some(fake_tx_hash());
            }
            StepKind::FundChainOwner
            | StepKind::SetOriginAdmin
            | StepKind::DeployOriginTokenOrganization
            | StepKind::ActivateGateway
            | StepKind::AssignShards
            | StepKind::InitiateRecovery
            | StepKind::ExecuteRecovery
            | StepKind::ExecuteRedemption
            | StepKind::SettleBalances => {
                transaction_hash = Some(fake_tx_hash());
            }
            _ => {}
        }

        let mut outcome = StepOutcome::done(response.clone());
        outcome.transaction_hash = transaction_hash;
        if !response.is_empty() {
            outcome.fe_response_data = Some(response);
        }
        Ok(outcome)
    }
}

/// Registry with a simulated handler for every graph kind.
pub fn simulated_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    for &kind in all_step_kinds() {
        registry.register(kind, SimulatedStep);
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_every_kind() {
        assert!(simulated_registry().missing_kinds().is_empty());
    }

    #[tokio::test]
    async fn deploy_steps_report_transactions() {
        let outcome = SimulatedStep
            .perform(StepRequest {
                workflow_id: Uuid::now_v7(),
                step_id: Uuid::now_v7(),
                step_kind: StepKind::DeployOriginToken,
                request_params: WorkflowContext::new(),
                is_retrial: false,
            })
            .await
            .unwrap();
        assert!(outcome.transaction_hash.unwrap().starts_with("0x"));
        assert!(outcome.response_data.unwrap().get("token_address").is_some());
    }
}
