//! End-to-end decision scenarios for the remediation engine.
//!
//! Each test walks the documented behavior of one remediation scenario
//! through the production classification, gating, lease, escalation and
//! status functions.

use jiff::SignedDuration;
use k8s_openapi::api::core::v1::Node;

use node_healthcheck_operator::controller::gates::EtcdQuorumState;
use node_healthcheck_operator::controller::node_lease::{
    self, decide, holder_identity, LeaseDecision,
};
use node_healthcheck_operator::controller::remediation::{
    build_remediation_cr, is_owned_by,
};
use node_healthcheck_operator::controller::status;
use node_healthcheck_operator::crd::{Condition, Phase, CONDITION_REASON_ENABLED};

use crate::common::fixtures::*;
use crate::mock_state::*;

fn find_node<'a>(nodes: &'a [Node], name: &str) -> &'a Node {
    nodes
        .iter()
        .find(|n| n.metadata.name.as_deref() == Some(name))
        .expect("node exists")
}

/// Scenario: one unhealthy node among three, minHealthy satisfied. A CR is
/// created from the template body and the status reflects the remediation.
#[test]
fn test_basic_remediation() {
    let nhc = NodeHealthCheckBuilder::new("test")
        .min_healthy_percent(51)
        .ready_false_duration("10s")
        .build();
    let mut nodes = worker_nodes(0, 2);
    nodes.push(node_with_condition(
        "unhealthy-worker-node-1",
        "Ready",
        "False",
        SignedDuration::from_secs(12),
    ));
    let mut view = MockClusterView::new(nhc.clone(), nodes);

    let actions = view.plan();
    assert_eq!(
        actions,
        vec![PlannedAction::CreateCr {
            node: "unhealthy-worker-node-1".to_string(),
            step: 0,
        }]
    );

    // The CR the reconciler would create
    let template = same_kind_template();
    let node = find_node(&view.nodes, "unhealthy-worker-node-1").clone();
    let cr = build_remediation_cr(&nhc, &node, &template, None);
    assert_eq!(cr.metadata.name.as_deref(), Some("unhealthy-worker-node-1"));
    assert_eq!(cr.data["spec"]["size"], "foo");
    let owners = cr.metadata.owner_references.as_ref().unwrap();
    assert_eq!(owners[0].kind, "NodeHealthCheck");
    assert_eq!(owners[0].name, "test");
    assert_eq!(owners[0].controller, Some(false));

    // Status after the creation
    view.record_started("unhealthy-worker-node-1", &template, test_now());
    let records: Vec<_> = view.records.values().cloned().collect();
    let in_flight = status::in_flight_remediations(&records);
    let nhc_status = status::build_status(
        None,
        status::phase_for(in_flight.len()),
        "remediating 1 node(s)",
        Condition::disabled(false, CONDITION_REASON_ENABLED, ""),
        2,
        3,
        records,
    );
    assert_eq!(nhc_status.healthy_nodes, 2);
    assert_eq!(nhc_status.observed_nodes, 3);
    assert_eq!(nhc_status.in_flight_remediations.len(), 1);
    assert!(nhc_status
        .in_flight_remediations
        .contains_key("unhealthy-worker-node-1"));
    assert_eq!(nhc_status.phase, Phase::Remediating);
}

/// Scenario: four of seven nodes unhealthy with minHealthy=51%. No CR is
/// created and the status lists every unhealthy node with empty
/// remediations.
#[test]
fn test_min_healthy_blocks_remediation() {
    let nhc = NodeHealthCheckBuilder::new("test").min_healthy_percent(51).build();
    let view = MockClusterView::new(nhc, worker_nodes(4, 3));

    let actions = view.plan();
    assert!(actions
        .iter()
        .all(|a| matches!(a, PlannedAction::SkipMinHealthy { .. })));

    // Status still tracks the unhealthy nodes, just without remediations
    let classified = view.classify();
    let records: Vec<_> = classified
        .unhealthy
        .iter()
        .map(|n| node_healthcheck_operator::crd::UnhealthyNode {
            name: n.metadata.name.clone().unwrap(),
            ..Default::default()
        })
        .collect();
    assert_eq!(records.len(), 4);

    let in_flight = status::in_flight_remediations(&records);
    assert!(in_flight.is_empty());
    assert_eq!(status::phase_for(in_flight.len()), Phase::Enabled);
}

/// Scenario: two escalation steps with 1s and 4s timeouts. Step 0 times
/// out, its CR is annotated, step 1's CR (different kind, machine
/// namespace) starts; recovery tears both down.
#[test]
fn test_escalation_walks_both_steps() {
    let nhc = NodeHealthCheckBuilder::new("test")
        .min_healthy_percent(51)
        .ready_false_duration("10s")
        .escalations(vec![
            escalation_step(
                "InfrastructureRemediationTemplate",
                "default",
                "template",
                1,
                "1s",
            ),
            escalation_step(
                "Metal3RemediationTemplate",
                "openshift-machine-api",
                "metal3-template",
                2,
                "4s",
            ),
        ])
        .build();
    let mut view = MockClusterView::new(nhc.clone(), worker_nodes(1, 2));

    // Step 0 starts
    assert!(matches!(
        view.plan().as_slice(),
        [PlannedAction::CreateCr { step: 0, .. }]
    ));
    view.record_started(
        "unhealthy-worker-node-1",
        &same_kind_template(),
        test_now(),
    );

    // 2s later the 1s budget is blown: annotate and escalate
    view.now = test_now() + SignedDuration::from_secs(2);
    let actions = view.plan();
    assert_eq!(actions.len(), 2);
    assert!(matches!(
        actions[0],
        PlannedAction::AnnotateTimedOut { step: 0, .. }
    ));
    assert!(matches!(actions[1], PlannedAction::CreateCr { step: 1, .. }));

    // The step-1 CR targets the machine namespace with a different kind
    let template = machine_template();
    let node = find_node(&view.nodes, "unhealthy-worker-node-1").clone();
    let cr = build_remediation_cr(&nhc, &node, &template, None);
    assert_eq!(cr.metadata.namespace.as_deref(), Some("openshift-machine-api"));
    assert_eq!(cr.types.as_ref().unwrap().kind, "Metal3Remediation");

    view.records
        .get_mut("unhealthy-worker-node-1")
        .unwrap()
        .remediations[0]
        .timed_out = Some(view.now.to_string());
    view.record_started("unhealthy-worker-node-1", &template, view.now);

    // Recovery: both CRs go away, the node returns to the healthy count
    view.mark_node_healthy("unhealthy-worker-node-1");
    let classified = view.classify();
    assert_eq!(classified.healthy.len(), 3);
    assert!(classified.unhealthy.is_empty());
    assert!(view.plan().is_empty());

    // Once the CRs are finalized the record drops and the phase resets
    view.records.clear();
    let records: Vec<_> = view.records.values().cloned().collect();
    let in_flight = status::in_flight_remediations(&records);
    assert_eq!(status::phase_for(in_flight.len()), Phase::Enabled);
}

/// Scenario: two unhealthy control-plane nodes with disruptionsAllowed=1.
/// Exactly one CP remediation runs at a time; the second starts only after
/// the first node's CRs are finalized.
#[test]
fn test_control_plane_serialization() {
    let nhc = NodeHealthCheckBuilder::new("test")
        .min_healthy_int(0)
        .ready_false_duration("10s")
        .build();
    let cp_label = "node-role.kubernetes.io/control-plane";
    let nodes = vec![
        with_label(unhealthy_node("cp-1"), cp_label, ""),
        with_label(unhealthy_node("cp-2"), cp_label, ""),
        with_label(healthy_node("cp-3"), cp_label, ""),
        healthy_node("worker-1"),
    ];
    let mut view = MockClusterView::new(nhc, nodes);
    view.quorum = EtcdQuorumState {
        disruptions_allowed: Some(1),
        guard_pod_ready: [("cp-1".to_string(), true), ("cp-2".to_string(), true)].into(),
    };

    // Exactly one CP node gets a CR, the other defers
    let actions = view.plan();
    assert_eq!(
        actions,
        vec![
            PlannedAction::CreateCr {
                node: "cp-1".to_string(),
                step: 0,
            },
            PlannedAction::SkipControlPlaneGate {
                node: "cp-2".to_string()
            },
        ]
    );
    view.record_started("cp-1", &same_kind_template(), test_now());

    // cp-1 recovers but its CR still carries a finalizer: the slot stays
    // occupied
    view.mark_node_healthy("cp-1");
    assert_eq!(
        view.plan(),
        vec![PlannedAction::SkipControlPlaneGate {
            node: "cp-2".to_string()
        }]
    );

    // Finalizer removed, CR gone: cp-2's turn
    view.records.remove("cp-1");
    assert_eq!(
        view.plan(),
        vec![PlannedAction::CreateCr {
            node: "cp-2".to_string(),
            step: 0,
        }]
    );
}

/// Scenario: a CR for the node exists but is owned by another NHC. No
/// second CR is created and the node is tracked without remediations.
#[test]
fn test_foreign_ownership_is_respected() {
    let nhc = NodeHealthCheckBuilder::new("test").build();
    let foreign_cr = foreign_remediation_cr("unhealthy-worker-node-1");

    assert!(!is_owned_by(&foreign_cr, &nhc));

    // The reconciler records the node with empty remediations; in-flight
    // stays empty
    let record = node_healthcheck_operator::crd::UnhealthyNode {
        name: "unhealthy-worker-node-1".to_string(),
        ..Default::default()
    };
    let in_flight = status::in_flight_remediations(std::slice::from_ref(&record));
    assert!(in_flight.is_empty());
}

/// Scenario: the node's lease is held by another owner with a 3s duration.
/// No CR is created until the lease expires; then it is taken over with
/// acquireTime == renewTime.
#[test]
fn test_lease_contention() {
    let holder = holder_identity("test");
    assert_eq!(holder, "NodeHealthCheck-test");

    let foreign = lease_held_by("notNHC", 3);

    // Within the 3s window the lease blocks remediation
    assert_eq!(
        decide(Some(&foreign), &holder, test_now()),
        LeaseDecision::Taken {
            holder: "notNHC".to_string()
        }
    );
    assert_eq!(
        decide(
            Some(&foreign),
            &holder,
            test_now() + SignedDuration::from_secs(3)
        ),
        LeaseDecision::Taken {
            holder: "notNHC".to_string()
        }
    );

    // Past expiry the lease is taken over
    let after_expiry = test_now() + SignedDuration::from_secs(4);
    assert_eq!(
        decide(Some(&foreign), &holder, after_expiry),
        LeaseDecision::TakeOver
    );

    // First acquisition writes acquireTime == renewTime; lease expiry
    // detection agrees with the takeover
    assert!(node_lease::lease_expired(&foreign, after_expiry));
}
