//! Step routing tables for every workflow kind.
//!
//! Pure data: each step kind maps to the candidate steps scheduled after it
//! succeeds (`on_success`, fan-out), the single fallback scheduled after it
//! fails (`on_failure`), the AND-join set that must all be `Processed`
//! before it may be created (`prerequisites`), and the ancestor kinds whose
//! `response_data` feeds its request params (`read_data_from`).
//!
//! The tables are not checked for cycles; graph discipline is a
//! configuration responsibility. `validate_graph` verifies referential
//! consistency only (every referenced kind exists, belongs to the same
//! workflow kind, and every join edge is reachable from its prerequisites).

use ledgerflow_types::workflow::{ChainKind, StepKind, WorkflowKind};
use thiserror::Error;

use StepKind::*;

/// Routing entry for one step kind.
#[derive(Debug, Clone, Copy)]
pub struct StepRoute {
    /// Ordered candidate next kinds scheduled when this step succeeds.
    pub on_success: &'static [StepKind],
    /// Single fallback kind scheduled when this step fails without a
    /// rollback request.
    pub on_failure: Option<StepKind>,
    /// AND-join set: all must be `Processed` before this step is created.
    pub prerequisites: &'static [StepKind],
    /// Ancestors whose `response_data` is merged into this step's request
    /// params (data dependency, independent of control flow).
    pub read_data_from: &'static [StepKind],
}

const fn route(
    on_success: &'static [StepKind],
    on_failure: Option<StepKind>,
    prerequisites: &'static [StepKind],
    read_data_from: &'static [StepKind],
) -> StepRoute {
    StepRoute {
        on_success,
        on_failure,
        prerequisites,
        read_data_from,
    }
}

/// Look up the routing entry for a step kind.
///
/// Returns `None` for kinds with no configured route; the engine treats
/// that as a fatal configuration error.
pub fn route_for(kind: StepKind) -> Option<StepRoute> {
    let route = match kind {
        // -- economy setup ---------------------------------------------------
        EconomySetupInit => route(
            &[GenerateTokenAddresses],
            Some(MarkEconomySetupFailed),
            &[],
            &[],
        ),
        GenerateTokenAddresses => route(
            // Three independent origin-side branches fan out here and
            // converge again at deploy_origin_token_organization.
            &[FundChainOwner, DeployOriginToken, SetOriginAdmin],
            Some(MarkEconomySetupFailed),
            &[],
            &[EconomySetupInit],
        ),
        FundChainOwner => route(
            &[DeployOriginTokenOrganization],
            Some(MarkEconomySetupFailed),
            &[],
            &[GenerateTokenAddresses],
        ),
        DeployOriginToken => route(
            &[DeployOriginTokenOrganization],
            Some(MarkEconomySetupFailed),
            &[],
            &[GenerateTokenAddresses],
        ),
        SetOriginAdmin => route(
            &[DeployOriginTokenOrganization],
            Some(MarkEconomySetupFailed),
            &[],
            &[GenerateTokenAddresses],
        ),
        DeployOriginTokenOrganization => route(
            &[DeployUtilityToken, DeployGateway],
            Some(MarkEconomySetupFailed),
            &[FundChainOwner, DeployOriginToken, SetOriginAdmin],
            &[GenerateTokenAddresses, DeployOriginToken],
        ),
        DeployUtilityToken => route(
            &[ActivateGateway],
            Some(MarkEconomySetupFailed),
            &[],
            &[GenerateTokenAddresses, DeployOriginToken],
        ),
        DeployGateway => route(
            &[ActivateGateway],
            Some(MarkEconomySetupFailed),
            &[],
            &[DeployOriginToken],
        ),
        ActivateGateway => route(
            &[AssignShards],
            Some(MarkEconomySetupFailed),
            &[DeployUtilityToken, DeployGateway],
            &[DeployGateway],
        ),
        AssignShards => route(
            &[MarkEconomySetupSuccess],
            Some(MarkEconomySetupFailed),
            &[],
            &[],
        ),
        MarkEconomySetupSuccess => route(&[], Some(MarkEconomySetupFailed), &[], &[]),
        MarkEconomySetupFailed => route(&[], None, &[], &[]),

        // -- user recovery ---------------------------------------------------
        UserRecoveryInit => route(
            &[InitiateRecovery],
            Some(MarkUserRecoveryFailed),
            &[],
            &[],
        ),
        InitiateRecovery => route(
            &[ExecuteRecovery],
            Some(MarkUserRecoveryFailed),
            &[],
            &[UserRecoveryInit],
        ),
        ExecuteRecovery => route(
            &[VerifyRecovery],
            Some(MarkUserRecoveryFailed),
            &[],
            &[InitiateRecovery],
        ),
        VerifyRecovery => route(
            // The verify handler may instead signal a rollback to
            // execute_recovery when the receipt has not landed.
            &[MarkUserRecoverySuccess],
            Some(MarkUserRecoveryFailed),
            &[],
            &[ExecuteRecovery],
        ),
        MarkUserRecoverySuccess => route(&[], Some(MarkUserRecoveryFailed), &[], &[]),
        MarkUserRecoveryFailed => route(&[], None, &[], &[]),

        // -- redemption ------------------------------------------------------
        RedemptionInit => route(
            &[ValidateRedemption],
            Some(MarkRedemptionFailed),
            &[],
            &[],
        ),
        ValidateRedemption => route(
            &[ExecuteRedemption],
            Some(MarkRedemptionFailed),
            &[],
            &[RedemptionInit],
        ),
        ExecuteRedemption => route(
            &[SettleBalances, SendRedemptionReceipt],
            Some(MarkRedemptionFailed),
            &[],
            &[ValidateRedemption],
        ),
        SettleBalances => route(
            &[MarkRedemptionSuccess],
            Some(MarkRedemptionFailed),
            &[],
            &[ExecuteRedemption],
        ),
        SendRedemptionReceipt => route(
            &[MarkRedemptionSuccess],
            Some(MarkRedemptionFailed),
            &[],
            &[ExecuteRedemption],
        ),
        MarkRedemptionSuccess => route(
            &[],
            Some(MarkRedemptionFailed),
            &[SettleBalances, SendRedemptionReceipt],
            &[],
        ),
        MarkRedemptionFailed => route(&[], None, &[], &[]),
    };
    Some(route)
}

/// The init step kind for a workflow family -- the node a fresh trigger
/// creates.
pub fn init_kind(kind: WorkflowKind) -> StepKind {
    match kind {
        WorkflowKind::EconomySetup => EconomySetupInit,
        WorkflowKind::UserRecovery => UserRecoveryInit,
        WorkflowKind::Redemption => RedemptionInit,
    }
}

/// Which chain a step's transactions target.
pub fn chain_for(kind: StepKind) -> ChainKind {
    match kind {
        // Origin-side deployment and administration.
        EconomySetupInit | GenerateTokenAddresses | FundChainOwner | DeployOriginToken
        | SetOriginAdmin | DeployOriginTokenOrganization | DeployGateway
        | MarkEconomySetupSuccess | MarkEconomySetupFailed => ChainKind::Origin,

        // Auxiliary-chain work: utility token, gateway activation, shards,
        // device recovery, and redemption execution.
        DeployUtilityToken | ActivateGateway | AssignShards | UserRecoveryInit
        | InitiateRecovery | ExecuteRecovery | VerifyRecovery | MarkUserRecoverySuccess
        | MarkUserRecoveryFailed | RedemptionInit | ValidateRedemption | ExecuteRedemption
        | SettleBalances | SendRedemptionReceipt | MarkRedemptionSuccess
        | MarkRedemptionFailed => ChainKind::Auxiliary,
    }
}

/// Every step kind known to the graph.
pub fn all_step_kinds() -> &'static [StepKind] {
    &[
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
        UserRecoveryInit,
        InitiateRecovery,
        ExecuteRecovery,
        VerifyRecovery,
        MarkUserRecoverySuccess,
        MarkUserRecoveryFailed,
        RedemptionInit,
        ValidateRedemption,
        ExecuteRedemption,
        SettleBalances,
        SendRedemptionReceipt,
        MarkRedemptionSuccess,
        MarkRedemptionFailed,
    ]
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Referential-consistency errors in the step graph tables.
#[derive(Debug, Error)]
pub enum GraphConfigError {
    #[error("step '{kind}' references '{target}' from a different workflow kind")]
    CrossWorkflowEdge { kind: StepKind, target: StepKind },

    #[error("step '{kind}' lists prerequisite '{prereq}' that never schedules it")]
    UnreachableJoin { kind: StepKind, prereq: StepKind },

    #[error("terminal step '{0}' must have an empty on_success list")]
    TerminalWithSuccessors(StepKind),
}

/// Validate the routing tables for referential consistency.
///
/// Checks, for every kind: all referenced kinds belong to the same workflow
/// family; every prerequisite of a join lists the join in its `on_success`
/// (otherwise the join could never be created); terminal marker kinds have
/// no successors. Deliberately does not attempt cycle detection.
pub fn validate_graph() -> Result<(), GraphConfigError> {
    for &kind in all_step_kinds() {
        let route = route_for(kind).expect("every kind has a route");
        let family = kind.workflow_kind();

        let referenced = route
            .on_success
            .iter()
            .chain(route.on_failure.iter())
            .chain(route.prerequisites.iter())
            .chain(route.read_data_from.iter());
        for &target in referenced {
            if target.workflow_kind() != family {
                return Err(GraphConfigError::CrossWorkflowEdge { kind, target });
            }
        }

        for &prereq in route.prerequisites {
            let prereq_route = route_for(prereq).expect("every kind has a route");
            if !prereq_route.on_success.contains(&kind) {
                return Err(GraphConfigError::UnreachableJoin { kind, prereq });
            }
        }

        if kind.terminal_status().is_some() && !route.on_success.is_empty() {
            return Err(GraphConfigError::TerminalWithSuccessors(kind));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_is_consistent() {
        validate_graph().unwrap();
    }

    #[test]
    fn every_kind_has_a_route() {
        for &kind in all_step_kinds() {
            assert!(route_for(kind).is_some(), "missing route for {kind}");
        }
    }

    #[test]
    fn economy_setup_fan_out_and_join() {
        let fan_out = route_for(GenerateTokenAddresses).unwrap();
        assert_eq!(
            fan_out.on_success,
            &[FundChainOwner, DeployOriginToken, SetOriginAdmin]
        );

        let join = route_for(DeployOriginTokenOrganization).unwrap();
        assert_eq!(
            join.prerequisites,
            &[FundChainOwner, DeployOriginToken, SetOriginAdmin]
        );
        // All three branches converge on the same join candidate.
        for &branch in fan_out.on_success {
            let r = route_for(branch).unwrap();
            assert_eq!(r.on_success, &[DeployOriginTokenOrganization]);
        }
    }

    #[test]
    fn failure_edges_route_to_terminal_marker() {
        for &kind in all_step_kinds() {
            let route = route_for(kind).unwrap();
            if let Some(fallback) = route.on_failure {
                assert_eq!(
                    fallback.terminal_status(),
                    Some(ledgerflow_types::workflow::WorkflowStatus::Failed),
                    "{kind} must fail over to a failure marker"
                );
            } else {
                // Only failure markers themselves have no fallback.
                assert!(kind.terminal_status().is_some());
            }
        }
    }

    #[test]
    fn terminal_markers_have_no_successors() {
        for &kind in all_step_kinds() {
            if kind.terminal_status().is_some() {
                assert!(route_for(kind).unwrap().on_success.is_empty());
            }
        }
    }

    #[test]
    fn init_kinds_have_no_prerequisites() {
        for family in [
            WorkflowKind::EconomySetup,
            WorkflowKind::UserRecovery,
            WorkflowKind::Redemption,
        ] {
            let kind = init_kind(family);
            assert_eq!(kind.workflow_kind(), family);
            assert!(route_for(kind).unwrap().prerequisites.is_empty());
        }
    }

    #[test]
    fn chain_routing_splits_origin_and_auxiliary() {
        assert_eq!(chain_for(DeployOriginToken), ChainKind::Origin);
        assert_eq!(chain_for(DeployGateway), ChainKind::Origin);
        assert_eq!(chain_for(DeployUtilityToken), ChainKind::Auxiliary);
        assert_eq!(chain_for(ExecuteRecovery), ChainKind::Auxiliary);
    }

    #[test]
    fn redemption_join_requires_both_branches() {
        let join = route_for(MarkRedemptionSuccess).unwrap();
        assert_eq!(join.prerequisites, &[SettleBalances, SendRedemptionReceipt]);
    }
}
