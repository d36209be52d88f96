//! Watch mappers.
//!
//! Node events map to every NHC whose selector matches the node;
//! remediation CR events map back through their NodeHealthCheck owner
//! reference. A node's condition set counts as changed only when the set
//! of (type, status) pairs differs; reordering alone stays quiet.

use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};

use crate::controller::selector;
use crate::crd::NodeHealthCheck;

/// Names of the NHCs whose selector matches this node.
pub fn matching_nhc_names(nhcs: &[NodeHealthCheck], node: &Node) -> Vec<String> {
    let labels = node.labels();
    nhcs.iter()
        .filter(|nhc| selector::matches(&nhc.spec.selector, labels))
        .map(|nhc| nhc.name_any())
        .collect()
}

/// Names of NodeHealthCheck owners among a CR's owner references.
pub fn nhc_owner_names(owner_references: &[OwnerReference]) -> Vec<String> {
    owner_references
        .iter()
        .filter(|owner| owner.kind == NodeHealthCheck::kind(&()).as_ref())
        .map(|owner| owner.name.clone())
        .collect()
}

/// Whether the set of (type, status) condition pairs differs between two
/// observations of a node.
pub fn node_conditions_changed(old: &Node, new: &Node) -> bool {
    condition_set(old) != condition_set(new)
}

fn condition_set(node: &Node) -> BTreeSet<(String, String)> {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .map(|c| (c.type_.clone(), c.status.clone()))
                .collect()
        })
        .unwrap_or_default()
}
