//! Gate tests: minHealthy floors, exclusion, and control-plane quorum.

use node_healthcheck_operator::controller::gates::EtcdQuorumState;
use node_healthcheck_operator::controller::reconciler::EXCLUDE_FROM_REMEDIATION_LABEL;

use crate::common::fixtures::*;
use crate::mock_state::{MockClusterView, PlannedAction};

#[test]
fn test_min_healthy_met_allows_remediation() {
    // 51% of 3 rounds up to 2; 2 healthy nodes satisfy the floor
    let nhc = NodeHealthCheckBuilder::new("test").min_healthy_percent(51).build();
    let view = MockClusterView::new(nhc, worker_nodes(1, 2));
    assert_eq!(view.min_healthy(), 2);

    let actions = view.plan();
    assert_eq!(
        actions,
        vec![PlannedAction::CreateCr {
            node: "unhealthy-worker-node-1".to_string(),
            step: 0,
        }]
    );
}

#[test]
fn test_min_healthy_violated_blocks_all_creations() {
    // 51% of 7 rounds up to 4; only 3 healthy nodes remain
    let nhc = NodeHealthCheckBuilder::new("test").min_healthy_percent(51).build();
    let view = MockClusterView::new(nhc, worker_nodes(4, 3));
    assert_eq!(view.min_healthy(), 4);

    let actions = view.plan();
    assert_eq!(actions.len(), 4);
    assert!(actions
        .iter()
        .all(|a| matches!(a, PlannedAction::SkipMinHealthy { .. })));
}

#[test]
fn test_min_healthy_integer_floor() {
    let nhc = NodeHealthCheckBuilder::new("test").min_healthy_int(3).build();
    let view = MockClusterView::new(nhc, worker_nodes(1, 2));
    // 2 healthy < 3
    assert!(matches!(
        view.plan().as_slice(),
        [PlannedAction::SkipMinHealthy { .. }]
    ));
}

#[test]
fn test_excluded_node_is_not_remediated() {
    let nhc = NodeHealthCheckBuilder::new("test").build();
    let mut nodes = worker_nodes(0, 2);
    nodes.push(with_label(
        unhealthy_node("opted-out"),
        EXCLUDE_FROM_REMEDIATION_LABEL,
        "true",
    ));
    let view = MockClusterView::new(nhc, nodes);

    let classified = view.classify();
    assert_eq!(classified.observed, 3);
    assert!(classified.unhealthy.is_empty());
    assert!(view.plan().is_empty());
}

#[test]
fn test_control_plane_quorum_blocks_when_budget_exhausted() {
    let nhc = NodeHealthCheckBuilder::new("test").min_healthy_int(0).build();
    let cp = with_label(
        unhealthy_node("cp-1"),
        "node-role.kubernetes.io/control-plane",
        "",
    );
    let mut view = MockClusterView::new(nhc, vec![cp, healthy_node("worker-1")]);
    view.quorum = EtcdQuorumState {
        disruptions_allowed: Some(0),
        guard_pod_ready: [("cp-1".to_string(), true)].into(),
    };

    // Ready guard pod + zero budget: disruption would cost quorum
    assert_eq!(
        view.plan(),
        vec![PlannedAction::SkipControlPlaneGate {
            node: "cp-1".to_string()
        }]
    );

    // Guard pod already down: the node no longer counts toward quorum
    view.quorum.guard_pod_ready.insert("cp-1".to_string(), false);
    assert_eq!(
        view.plan(),
        vec![PlannedAction::CreateCr {
            node: "cp-1".to_string(),
            step: 0,
        }]
    );
}

#[test]
fn test_worker_nodes_ignore_quorum_gate() {
    let nhc = NodeHealthCheckBuilder::new("test").min_healthy_int(0).build();
    let mut view = MockClusterView::new(nhc, worker_nodes(1, 1));
    view.quorum = EtcdQuorumState {
        disruptions_allowed: Some(0),
        guard_pod_ready: Default::default(),
    };
    assert!(matches!(
        view.plan().as_slice(),
        [PlannedAction::CreateCr { .. }]
    ));
}

#[test]
fn test_lease_held_elsewhere_defers_creation() {
    let nhc = NodeHealthCheckBuilder::new("test").build();
    let mut view = MockClusterView::new(nhc, worker_nodes(1, 2));
    view.leases.insert(
        "unhealthy-worker-node-1".to_string(),
        crate::mock_state::lease_held_by("notNHC", 3),
    );

    assert_eq!(
        view.plan(),
        vec![PlannedAction::WaitForLease {
            node: "unhealthy-worker-node-1".to_string()
        }]
    );
}
