//! Mock infrastructure for simulating cluster state in functional tests.
//!
//! This module provides a `MockClusterView` that simulates the external
//! inputs of one reconcile (nodes, remediation CRs, leases, the etcd guard)
//! without a live Kubernetes cluster.
//!
//! ## Design Philosophy
//!
//! Instead of duplicating production logic, this mock:
//! 1. Uses the actual classification, gating, lease and escalation
//!    functions from production code
//! 2. Simulates only the external state changes (node conditions, CR
//!    status, lease ownership)
//! 3. Delegates every decision to the real implementation
//!
//! This ensures tests stay in sync with production behavior automatically.

use std::collections::BTreeMap;

use jiff::Timestamp;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta, OwnerReference};
use kube::api::DynamicObject;
use kube::core::GroupVersionKind;
use kube::discovery::ApiResource;

use node_healthcheck_operator::controller::escalation::{self, EscalationDecision};
use node_healthcheck_operator::controller::gates::EtcdQuorumState;
use node_healthcheck_operator::controller::node_lease::{self, LeaseDecision};
use node_healthcheck_operator::controller::reconciler::{
    classify_nodes, is_control_plane, ClassifiedNodes,
};
use node_healthcheck_operator::controller::remediation::ResolvedTemplate;
use node_healthcheck_operator::controller::validation::resolve_min_healthy;
use node_healthcheck_operator::crd::{
    NodeHealthCheck, Remediation, RemediationResource, UnhealthyNode,
};

use crate::common::fixtures::test_now;

/// Same-kind template fixture: the CR is named after the node.
pub fn same_kind_template() -> ResolvedTemplate {
    ResolvedTemplate {
        name: "template".to_string(),
        namespace: "default".to_string(),
        cr_resource: ApiResource::from_gvk(&GroupVersionKind::gvk(
            "test.medik8s.io",
            "v1alpha1",
            "InfrastructureRemediation",
        )),
        inner_spec: serde_json::json!({"size": "foo"}),
        multi_kind: false,
    }
}

/// Second-step template fixture living in the machine-management namespace.
pub fn machine_template() -> ResolvedTemplate {
    ResolvedTemplate {
        name: "metal3-template".to_string(),
        namespace: "openshift-machine-api".to_string(),
        cr_resource: ApiResource::from_gvk(&GroupVersionKind::gvk(
            "infrastructure.cluster.x-k8s.io",
            "v1beta1",
            "Metal3Remediation",
        )),
        inner_spec: serde_json::json!({"strategy": {"type": "Reboot"}}),
        multi_kind: false,
    }
}

/// A remediation CR owned by some other NodeHealthCheck.
pub fn foreign_remediation_cr(node_name: &str) -> DynamicObject {
    let template = same_kind_template();
    let mut cr = DynamicObject::new(node_name, &template.cr_resource);
    cr.metadata = ObjectMeta {
        name: Some(node_name.to_string()),
        namespace: Some(template.namespace),
        owner_references: Some(vec![OwnerReference {
            api_version: "remediation.medik8s.io/v1alpha1".to_string(),
            kind: "NodeHealthCheck".to_string(),
            name: "not-me".to_string(),
            uid: "someone-elses-uid".to_string(),
            controller: Some(false),
            block_owner_deletion: None,
        }]),
        ..Default::default()
    };
    cr.data = serde_json::json!({"spec": {"size": "foo"}});
    cr
}

/// A lease held by `holder` with the given duration, renewed at `test_now`.
pub fn lease_held_by(holder: &str, duration_secs: i32) -> Lease {
    Lease {
        metadata: ObjectMeta {
            name: Some("node-unhealthy-worker-node-1".to_string()),
            ..Default::default()
        },
        spec: Some(LeaseSpec {
            holder_identity: Some(holder.to_string()),
            lease_duration_seconds: Some(duration_secs),
            acquire_time: Some(MicroTime(test_now())),
            renew_time: Some(MicroTime(test_now())),
            ..Default::default()
        }),
    }
}

/// One planned effect of a reconcile pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlannedAction {
    /// Create the CR for this node's escalation step.
    CreateCr { node: String, step: usize },
    /// Annotate the current step's CR as timed out before escalating.
    AnnotateTimedOut { node: String, step: usize },
    /// No CR: the minHealthy floor blocks new remediations.
    SkipMinHealthy { node: String },
    /// No CR: the control-plane quorum gate defers this node.
    SkipControlPlaneGate { node: String },
    /// No CR yet: the node's lease is held by another owner.
    WaitForLease { node: String },
}

/// Simulated cluster inputs for one reconcile pass.
#[derive(Clone, Debug)]
pub struct MockClusterView {
    pub nhc: NodeHealthCheck,
    pub nodes: Vec<Node>,
    /// Previous-status remediation records per node.
    pub records: BTreeMap<String, UnhealthyNode>,
    /// Leases by node name.
    pub leases: BTreeMap<String, Lease>,
    /// Nodes whose current step reported Succeeded=False.
    pub failed_steps: Vec<String>,
    /// Etcd guard state for control-plane gating.
    pub quorum: EtcdQuorumState,
    pub now: Timestamp,
}

impl MockClusterView {
    pub fn new(nhc: NodeHealthCheck, nodes: Vec<Node>) -> Self {
        Self {
            nhc,
            nodes,
            records: BTreeMap::new(),
            leases: BTreeMap::new(),
            failed_steps: Vec::new(),
            quorum: EtcdQuorumState::default(),
            now: test_now(),
        }
    }

    /// Classification through the production evaluator.
    pub fn classify(&self) -> ClassifiedNodes {
        classify_nodes(&self.nhc, &self.nodes, self.now)
    }

    /// The resolved minHealthy floor.
    pub fn min_healthy(&self) -> usize {
        let observed = self.nodes.len();
        resolve_min_healthy(&self.nhc.spec.min_healthy, observed).expect("valid minHealthy")
    }

    /// Record a started remediation, as the reconciler would after creating
    /// a CR.
    pub fn record_started(&mut self, node: &str, template: &ResolvedTemplate, started: Timestamp) {
        let gvk = &template.cr_resource;
        let record = self
            .records
            .entry(node.to_string())
            .or_insert_with(|| UnhealthyNode {
                name: node.to_string(),
                ..Default::default()
            });
        record.remediations.push(Remediation {
            resource: RemediationResource {
                group: gvk.group.clone(),
                version: gvk.version.clone(),
                kind: gvk.kind.clone(),
                namespace: Some(template.namespace.clone()),
                name: node.to_string(),
                uid: None,
            },
            template_name: template.multi_kind.then(|| template.name.clone()),
            started: started.to_string(),
            timed_out: None,
        });
    }

    /// Flip a node to Ready=True, as recovery would.
    pub fn mark_node_healthy(&mut self, name: &str) {
        for node in &mut self.nodes {
            if node.metadata.name.as_deref() == Some(name)
                && let Some(conditions) = node
                    .status
                    .as_mut()
                    .and_then(|s| s.conditions.as_mut())
            {
                for condition in conditions {
                    if condition.type_ == "Ready" {
                        condition.status = "True".to_string();
                    }
                }
            }
        }
    }

    /// Run one planning pass over the unhealthy nodes, delegating each
    /// decision to the production functions. Mirrors the reconciler's
    /// ordering: minHealthy, control-plane gate, lease, escalation.
    pub fn plan(&self) -> Vec<PlannedAction> {
        let classified = self.classify();
        let allow_new = classified.healthy.len() >= self.min_healthy();
        let steps = escalation::steps_for(&self.nhc).expect("valid escalation config");
        let holder = node_lease::holder_identity(
            self.nhc.metadata.name.as_deref().unwrap_or_default(),
        );

        // A control-plane slot stays occupied until the node's CRs are
        // finalized, matching the reconciler's accounting
        let mut active_control_plane = self
            .nodes
            .iter()
            .filter(|node| {
                is_control_plane(node)
                    && self
                        .records
                        .get(node.metadata.name.as_deref().unwrap_or_default())
                        .is_some_and(|r| !r.remediations.is_empty())
            })
            .count();

        let mut actions = Vec::new();
        for node in &classified.unhealthy {
            let node_name = node.metadata.name.clone().unwrap_or_default();
            let empty = Vec::new();
            let remediations = self
                .records
                .get(&node_name)
                .map(|r| r.remediations.as_slice())
                .unwrap_or(&empty);
            let step_failed = self.failed_steps.contains(&node_name);

            match escalation::decide(&steps, remediations, step_failed, self.now) {
                EscalationDecision::StartStep(step) => {
                    if !allow_new {
                        actions.push(PlannedAction::SkipMinHealthy { node: node_name });
                        continue;
                    }
                    if is_control_plane(node) && !self.quorum.allows(&node_name, active_control_plane)
                    {
                        actions.push(PlannedAction::SkipControlPlaneGate { node: node_name });
                        continue;
                    }
                    match node_lease::decide(self.leases.get(&node_name), &holder, self.now) {
                        LeaseDecision::Taken { .. } => {
                            actions.push(PlannedAction::WaitForLease { node: node_name });
                        }
                        _ => {
                            if is_control_plane(node) {
                                active_control_plane += 1;
                            }
                            actions.push(PlannedAction::CreateCr {
                                node: node_name,
                                step,
                            });
                        }
                    }
                }
                EscalationDecision::Advance { from, to } => {
                    actions.push(PlannedAction::AnnotateTimedOut {
                        node: node_name.clone(),
                        step: from,
                    });
                    match node_lease::decide(self.leases.get(&node_name), &holder, self.now) {
                        LeaseDecision::Taken { .. } => {
                            actions.push(PlannedAction::WaitForLease { node: node_name });
                        }
                        _ => actions.push(PlannedAction::CreateCr {
                            node: node_name,
                            step: to,
                        }),
                    }
                }
                EscalationDecision::Observe { .. } | EscalationDecision::Terminal => {}
            }
        }
        actions
    }
}
