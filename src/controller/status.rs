//! NHC status management.
//!
//! Builds the controller-owned NodeHealthCheck status from the state
//! observed during one reconcile and patches it with bounded conflict
//! retries.

use std::collections::BTreeMap;

use kube::api::{Api, Patch, PatchParams};
use tracing::{debug, warn};

use crate::controller::context::FIELD_MANAGER;
use crate::controller::error::{Error, Result};
use crate::crd::{
    Condition, NodeHealthCheck, NodeHealthCheckStatus, Phase, UnhealthyNode,
};

/// Maximum attempts for a status patch before giving up for this reconcile.
const STATUS_PATCH_ATTEMPTS: u32 = 3;

/// Phase derived from the in-flight remediation set.
pub fn phase_for(in_flight: usize) -> Phase {
    if in_flight > 0 {
        Phase::Remediating
    } else {
        Phase::Enabled
    }
}

/// Node name to earliest remediation start time, derived from the
/// unhealthy-node records.
pub fn in_flight_remediations(unhealthy_nodes: &[UnhealthyNode]) -> BTreeMap<String, String> {
    unhealthy_nodes
        .iter()
        .filter_map(|node| {
            node.remediations
                .iter()
                .map(|r| r.started.clone())
                .min()
                .map(|earliest| (node.name.clone(), earliest))
        })
        .collect()
}

/// Replace the condition of the same type, preserving the transition time
/// when the status did not change.
pub fn upsert_condition(conditions: &[Condition], mut next: Condition) -> Vec<Condition> {
    let mut result: Vec<Condition> = conditions
        .iter()
        .filter(|c| c.r#type != next.r#type)
        .cloned()
        .collect();
    if let Some(previous) = conditions.iter().find(|c| c.r#type == next.r#type)
        && previous.status == next.status
    {
        next.last_transition_time = previous.last_transition_time.clone();
    }
    result.push(next);
    result
}

/// Assemble the full status document for this reconcile.
pub fn build_status(
    previous: Option<&NodeHealthCheckStatus>,
    phase: Phase,
    reason: &str,
    disabled_condition: Condition,
    healthy_nodes: i32,
    observed_nodes: i32,
    unhealthy_nodes: Vec<UnhealthyNode>,
) -> NodeHealthCheckStatus {
    let existing_conditions = previous.map(|s| s.conditions.as_slice()).unwrap_or_default();
    NodeHealthCheckStatus {
        phase,
        reason: Some(reason.to_string()),
        conditions: upsert_condition(existing_conditions, disabled_condition),
        healthy_nodes,
        observed_nodes,
        in_flight_remediations: in_flight_remediations(&unhealthy_nodes),
        unhealthy_nodes,
    }
}

/// Patch the NHC status, retrying a bounded number of times on conflicts.
/// A persistent failure is logged and surfaced; the engine never crashes
/// over a status write.
pub async fn patch_status(
    api: &Api<NodeHealthCheck>,
    name: &str,
    status: &NodeHealthCheckStatus,
) -> Result<()> {
    let patch = serde_json::json!({ "status": status });
    let mut last_error: Option<Error> = None;
    for attempt in 1..=STATUS_PATCH_ATTEMPTS {
        match api
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => {
                debug!(name = %name, phase = %status.phase, "Patched NHC status");
                return Ok(());
            }
            Err(e) => {
                let error = Error::Kube(e);
                if !error.is_conflict() || attempt == STATUS_PATCH_ATTEMPTS {
                    warn!(name = %name, attempt, error = %error, "Status patch failed");
                    return Err(error);
                }
                last_error = Some(error);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| Error::MissingField("status patch".to_string())))
}
