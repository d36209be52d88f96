//! Reconciliation loop for NodeHealthCheck.
//!
//! One reconcile reads the NHC, classifies the selected nodes against the
//! health predicates, runs the safety gates, drives remediation CRs through
//! the escalation ladder for unhealthy nodes, tears down CRs for recovered
//! nodes, reaps orphans, and patches status. All timing flows through the
//! context clock; the loop never sleeps, it requeues.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jiff::Timestamp;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, DynamicObject, ListParams};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::controller::{
    context::Context,
    error::{Error, Result},
    escalation::{self, EscalationDecision, EscalationStep},
    gates::{self, EtcdQuorumState},
    node_health,
    node_lease::{lease_expired, LeaseOutcome, NodeLeaseManager},
    remediation::{
        cr_node_name, needs_old_cr_alert, permanent_node_deletion_expected,
        remediation_stopped_progressing, EnsureOutcome, RemediationCrManager, ResolvedTemplate,
    },
    selector, status, validation,
};
use crate::crd::{
    Condition, NodeHealthCheck, Phase, Remediation, RemediationResource, UnhealthyNode,
    CONDITION_REASON_DISABLED_INVALID_CONFIG, CONDITION_REASON_DISABLED_TEMPLATE_INVALID,
    CONDITION_REASON_DISABLED_TEMPLATE_NOT_FOUND, CONDITION_REASON_ENABLED,
};

/// Node label excluding a node from remediation entirely.
pub const EXCLUDE_FROM_REMEDIATION_LABEL: &str = "remediation.medik8s.io/exclude-from-remediation";

/// Control-plane role labels.
const CONTROL_PLANE_LABELS: &[&str] = &[
    "node-role.kubernetes.io/control-plane",
    "node-role.kubernetes.io/master",
];

/// Result of classifying the selected nodes at one instant.
#[derive(Clone, Debug, Default)]
pub struct ClassifiedNodes {
    /// Nodes passing every health predicate.
    pub healthy: Vec<Node>,
    /// Nodes matching an unhealthy condition long enough, remediation
    /// candidates (exclude-labeled nodes are never listed here).
    pub unhealthy: Vec<Node>,
    /// Number of nodes matched by the selector.
    pub observed: i32,
    /// Earliest instant an observed-but-not-matured condition crosses its
    /// duration boundary.
    pub earliest_recheck: Option<Timestamp>,
}

/// Whether the node carries a control-plane role label.
pub fn is_control_plane(node: &Node) -> bool {
    let labels = node.labels();
    CONTROL_PLANE_LABELS
        .iter()
        .any(|label| labels.contains_key(*label))
}

/// Whether the node opted out of remediation.
pub fn is_excluded(node: &Node) -> bool {
    node.labels().contains_key(EXCLUDE_FROM_REMEDIATION_LABEL)
}

/// Classify nodes into healthy and unhealthy per the NHC's predicates.
pub fn classify_nodes(nhc: &NodeHealthCheck, nodes: &[Node], now: Timestamp) -> ClassifiedNodes {
    let mut result = ClassifiedNodes {
        observed: nodes.len() as i32,
        ..Default::default()
    };
    for node in nodes {
        let assessment = node_health::evaluate(&nhc.spec.unhealthy_conditions, node, now);
        if let Some(boundary) = assessment.earliest_ready_at {
            result.earliest_recheck = Some(match result.earliest_recheck {
                Some(current) if current <= boundary => current,
                _ => boundary,
            });
        }
        if assessment.matches {
            if is_excluded(node) {
                debug!(node = %node.name_any(), "Unhealthy node is excluded from remediation");
                continue;
            }
            result.unhealthy.push(node.clone());
        } else {
            result.healthy.push(node.clone());
        }
    }
    result
}

/// Collects candidate requeue instants and picks the earliest.
#[derive(Debug, Default)]
struct RequeueTracker {
    after: Option<Duration>,
}

impl RequeueTracker {
    fn record_after(&mut self, duration: Duration) {
        self.after = Some(match self.after {
            Some(current) if current <= duration => current,
            _ => duration,
        });
    }

    fn record_at(&mut self, instant: Timestamp, now: Timestamp) {
        let until = instant.duration_since(now);
        let duration = if until.is_negative() {
            Duration::from_secs(0)
        } else {
            Duration::from_secs_f64(until.as_secs_f64())
        };
        self.record_after(duration);
    }

    fn into_action(self) -> Action {
        match self.after {
            Some(duration) => Action::requeue(duration),
            None => Action::await_change(),
        }
    }
}

/// Reconcile a NodeHealthCheck.
///
/// This is the main reconciliation function called by the controller.
pub async fn reconcile(obj: Arc<NodeHealthCheck>, ctx: Arc<Context>) -> Result<Action> {
    let start_time = Instant::now();
    let name = obj.name_any();
    debug!(name = %name, "Reconciling NodeHealthCheck");

    let api: Api<NodeHealthCheck> = Api::all(ctx.client.clone());

    // CRs are garbage collected through their owner references; leases
    // held by a deleted NHC expire on their own.
    if obj.metadata.deletion_timestamp.is_some() {
        debug!(name = %name, "NHC is being deleted");
        return Ok(Action::await_change());
    }

    let now = ctx.clock.now();

    // Config problems disable the NHC until the spec changes
    if let Err(error) = validation::validate_spec(&obj) {
        return disable(&api, &obj, &ctx, error).await;
    }

    // Classification feeds every path, including pause and upgrade
    let nodes = list_selected_nodes(&ctx, &obj).await?;
    let classified = classify_nodes(&obj, &nodes, now);

    // Gate: pause requests stop all remediation activity
    if !obj.spec.pause_requests.is_empty() {
        debug!(name = %name, "NHC is paused");
        let new_status = status::build_status(
            obj.status.as_ref(),
            Phase::Paused,
            &format!("{} pause request(s) present", obj.spec.pause_requests.len()),
            Condition::disabled(false, CONDITION_REASON_ENABLED, ""),
            classified.healthy.len() as i32,
            classified.observed,
            previous_unhealthy(&obj),
        );
        status::patch_status(&api, &name, &new_status).await?;
        return Ok(Action::await_change());
    }

    // Gate: no new remediation while the cluster upgrades
    if ctx.upgrade_checker.check().await? {
        info!(name = %name, "Cluster upgrade in progress, deferring remediation");
        let new_status = status::build_status(
            obj.status.as_ref(),
            Phase::Enabled,
            "cluster is upgrading, remediation is deferred",
            Condition::disabled(false, CONDITION_REASON_ENABLED, ""),
            classified.healthy.len() as i32,
            classified.observed,
            previous_unhealthy(&obj),
        );
        status::patch_status(&api, &name, &new_status).await?;
        return Ok(Action::requeue(ctx.config.cluster_upgrade_requeue_after));
    }

    // Gate: every template must resolve before any CR work
    let steps = escalation::steps_for(&obj)?;
    let manager = RemediationCrManager::new(ctx.client.clone(), &ctx.config.machine_api_namespace);
    let mut templates: Vec<ResolvedTemplate> = Vec::with_capacity(steps.len());
    for step in &steps {
        match manager.resolve_template(&step.template).await {
            Ok(template) => templates.push(template),
            Err(error @ (Error::TemplateNotFound(_) | Error::TemplateInvalid(_))) => {
                return disable(&api, &obj, &ctx, error).await;
            }
            Err(error) => return Err(error),
        }
    }

    let mut requeue = RequeueTracker::default();
    if let Some(boundary) = classified.earliest_recheck {
        requeue.record_at(boundary, now);
    }

    // Snapshot of every CR this NHC owns, grouped by target node
    let owned_crs = collect_owned_crs(&obj, &manager, &templates).await?;

    let leases = NodeLeaseManager::new(ctx.client.clone(), &ctx.config.leases_namespace, &obj);

    let min_healthy =
        validation::resolve_min_healthy(&obj.spec.min_healthy, classified.observed as usize)?;
    let allow_new = classified.healthy.len() >= min_healthy;
    if !allow_new && !classified.unhealthy.is_empty() {
        info!(
            name = %name,
            healthy = classified.healthy.len(),
            min_healthy,
            "Too few healthy nodes, refusing new remediations"
        );
        ctx.publish_warning_event(
            &obj,
            "RemediationSkipped",
            "Remediating",
            Some(format!(
                "{} healthy nodes is below the minHealthy floor of {}",
                classified.healthy.len(),
                min_healthy
            )),
        )
        .await;
    }

    // Control-plane gating state, fetched only when needed
    let quorum = if classified.unhealthy.iter().any(is_control_plane) {
        gates::fetch_etcd_quorum_state(&ctx).await?
    } else {
        EtcdQuorumState::default()
    };

    let previous_records: BTreeMap<String, UnhealthyNode> = previous_unhealthy(&obj)
        .into_iter()
        .map(|record| (record.name.clone(), record))
        .collect();
    // Recovering control-plane nodes keep their slot until every CR is
    // finalized, so quorum never sees two simultaneous disruptions
    let mut active_control_plane = previous_records
        .iter()
        .filter(|(node_name, record)| {
            !record.remediations.is_empty()
                && nodes
                    .iter()
                    .any(|n| n.name_any() == **node_name && is_control_plane(n))
        })
        .count();

    let mut next_records: Vec<UnhealthyNode> = Vec::new();

    // Unhealthy nodes walk the escalation ladder
    for node in &classified.unhealthy {
        let node_name = node.name_any();
        let mut record = previous_records
            .get(&node_name)
            .cloned()
            .unwrap_or_else(|| UnhealthyNode {
                name: node_name.clone(),
                ..Default::default()
            });
        record.conditions_healthy_timestamp = None;

        let outcome = remediate_node(
            &obj,
            &ctx,
            &manager,
            &leases,
            &steps,
            &templates,
            &owned_crs,
            &quorum,
            node,
            &mut record,
            allow_new,
            &mut active_control_plane,
            &mut requeue,
            now,
        )
        .await?;

        if let NodeOutcome::LeaseTaken = outcome {
            requeue.record_after(ctx.config.requeue_if_lease_taken);
        }
        next_records.push(record);
    }

    // Recovered nodes: tear down CRs, release the lease, and keep the node
    // listed until every CR is finalized
    for node in &classified.healthy {
        let node_name = node.name_any();
        let crs = owned_crs.get(&node_name);
        let has_crs = crs.is_some_and(|list| !list.is_empty());
        let previous = previous_records.get(&node_name);
        if !has_crs {
            if previous.is_some() {
                info!(node = %node_name, "Node recovered, all remediation CRs finalized");
                ctx.publish_normal_event(
                    &obj,
                    "RemediationRemoved",
                    "Remediating",
                    Some(format!("Node {} recovered", node_name)),
                )
                .await;
                leases.release(&node_name).await?;
            }
            continue;
        }
        let mut record = previous.cloned().unwrap_or_else(|| UnhealthyNode {
            name: node_name.clone(),
            ..Default::default()
        });
        if record.conditions_healthy_timestamp.is_none() {
            record.conditions_healthy_timestamp = Some(now.to_string());
        }
        if let Some(crs) = crs {
            for (template_idx, cr) in crs {
                manager.delete_cr(&templates[*template_idx], cr).await?;
            }
        }
        leases.release(&node_name).await?;
        next_records.push(record);
    }

    // Nodes that vanished mid-remediation: machine-backed remediators may
    // delete and recreate the node, so their CRs stay until the remediator
    // confirms the deletion is permanent
    for (node_name, record) in &previous_records {
        if nodes.iter().any(|n| n.name_any() == *node_name) {
            continue;
        }
        let Some(crs) = owned_crs.get(node_name).filter(|crs| !crs.is_empty()) else {
            continue;
        };
        if crs
            .iter()
            .all(|(_, cr)| permanent_node_deletion_expected(cr))
        {
            info!(node = %node_name, "Node permanently deleted, removing remediation CRs");
            for (template_idx, cr) in crs {
                manager.delete_cr(&templates[*template_idx], cr).await?;
            }
            leases.release(node_name).await?;
        }
        // The record stays until every CR is finalized
        next_records.push(record.clone());
    }

    // Orphans: owned CRs without any tracked record (selector changes,
    // excluded nodes, lost status)
    reap_orphans(&manager, &templates, &owned_crs, &next_records).await?;

    let in_flight = status::in_flight_remediations(&next_records);
    let phase = status::phase_for(in_flight.len());
    let reason = match phase {
        Phase::Remediating => format!("remediating {} node(s)", in_flight.len()),
        _ => "all selected nodes meet the health predicates".to_string(),
    };
    let new_status = status::build_status(
        obj.status.as_ref(),
        phase,
        &reason,
        Condition::disabled(false, CONDITION_REASON_ENABLED, ""),
        classified.healthy.len() as i32,
        classified.observed,
        next_records,
    );
    status::patch_status(&api, &name, &new_status).await?;

    if let Some(ref health_state) = ctx.health_state {
        let duration = start_time.elapsed().as_secs_f64();
        health_state.metrics.record_reconcile(&name, duration);
        health_state.metrics.set_phase(&name, &phase.to_string());
    }

    Ok(requeue.into_action())
}

/// Per-node remediation outcome relevant to requeue scheduling.
enum NodeOutcome {
    Progressing,
    LeaseTaken,
    Skipped,
}

#[allow(clippy::too_many_arguments)]
async fn remediate_node(
    nhc: &NodeHealthCheck,
    ctx: &Context,
    manager: &RemediationCrManager,
    leases: &NodeLeaseManager,
    steps: &[EscalationStep],
    templates: &[ResolvedTemplate],
    owned_crs: &BTreeMap<String, Vec<(usize, DynamicObject)>>,
    quorum: &EtcdQuorumState,
    node: &Node,
    record: &mut UnhealthyNode,
    allow_new: bool,
    active_control_plane: &mut usize,
    requeue: &mut RequeueTracker,
    now: Timestamp,
) -> Result<NodeOutcome> {
    let node_name = node.name_any();
    let node_crs = owned_crs.get(&node_name);

    // Current step CR, for failure signals and the alert annotation
    let current_idx = record.remediations.len().saturating_sub(1);
    let current_cr = node_crs.and_then(|crs| {
        crs.iter()
            .find(|(idx, _)| *idx == current_idx)
            .map(|(_, cr)| cr)
    });

    if let Some(crs) = node_crs {
        for (template_idx, cr) in crs {
            if needs_old_cr_alert(cr, now, ctx.config.remediation_cr_alert_timeout) {
                manager.annotate_old_cr(&templates[*template_idx], cr).await?;
            }
        }
    }

    let mut step_failed = current_cr.is_some_and(remediation_stopped_progressing);
    if !step_failed
        && current_cr.is_some()
        && let Some(lease) = leases.get(&node_name).await?
    {
        // Remediation outliving its lease is the crash-safe timeout signal
        step_failed = lease_expired(&lease, now);
    }

    let decision = escalation::decide(steps, &record.remediations, step_failed, now);
    match decision {
        EscalationDecision::StartStep(step_idx) => {
            if !allow_new {
                return Ok(NodeOutcome::Skipped);
            }
            if is_control_plane(node) && !quorum.allows(&node_name, *active_control_plane) {
                debug!(node = %node_name, "Control-plane quorum gate defers remediation");
                return Ok(NodeOutcome::Skipped);
            }
            match ensure_step_cr(
                nhc, ctx, manager, leases, steps, templates, node, record, step_idx, now,
            )
            .await?
            {
                StepResult::Started => {
                    if is_control_plane(node) {
                        *active_control_plane += 1;
                    }
                    if let Some(timeout) = steps[step_idx].timeout {
                        requeue.record_at(now + timeout, now);
                    }
                    Ok(NodeOutcome::Progressing)
                }
                StepResult::LeaseTaken => Ok(NodeOutcome::LeaseTaken),
                StepResult::ForeignCr => Ok(NodeOutcome::Skipped),
            }
        }
        EscalationDecision::Advance { from, to } => {
            if let Some(cr) = current_cr {
                manager
                    .annotate_timed_out(&templates[from], cr, now)
                    .await?;
            }
            if let Some(remediation) = record.remediations.last_mut() {
                remediation.timed_out = Some(now.to_string());
            }
            ctx.publish_warning_event(
                nhc,
                "RemediationTimedOut",
                "Remediating",
                Some(format!(
                    "Remediation step {} for node {} timed out, escalating",
                    from, node_name
                )),
            )
            .await;
            match ensure_step_cr(
                nhc, ctx, manager, leases, steps, templates, node, record, to, now,
            )
            .await?
            {
                StepResult::Started => {
                    if let Some(timeout) = steps[to].timeout {
                        requeue.record_at(now + timeout, now);
                    }
                    Ok(NodeOutcome::Progressing)
                }
                StepResult::LeaseTaken => Ok(NodeOutcome::LeaseTaken),
                StepResult::ForeignCr => Ok(NodeOutcome::Skipped),
            }
        }
        EscalationDecision::Observe { deadline } => {
            if let Some(deadline) = deadline {
                requeue.record_at(deadline, now);
            }
            renew_lease(leases, steps, node, record, ctx, now).await?;
            Ok(NodeOutcome::Progressing)
        }
        EscalationDecision::Terminal => {
            renew_lease(leases, steps, node, record, ctx, now).await?;
            Ok(NodeOutcome::Progressing)
        }
    }
}

enum StepResult {
    Started,
    LeaseTaken,
    ForeignCr,
}

/// Acquire the node's lease and ensure the CR for one escalation step.
#[allow(clippy::too_many_arguments)]
async fn ensure_step_cr(
    nhc: &NodeHealthCheck,
    ctx: &Context,
    manager: &RemediationCrManager,
    leases: &NodeLeaseManager,
    steps: &[EscalationStep],
    templates: &[ResolvedTemplate],
    node: &Node,
    record: &mut UnhealthyNode,
    step_idx: usize,
    now: Timestamp,
) -> Result<StepResult> {
    let node_name = node.name_any();
    let duration = lease_duration(ctx, steps, step_idx);

    match leases.obtain(&node_name, duration, now).await? {
        LeaseOutcome::Taken { holder } => {
            debug!(node = %node_name, holder = %holder, "Node lease taken, deferring remediation");
            return Ok(StepResult::LeaseTaken);
        }
        LeaseOutcome::Acquired => {}
    }

    let template = &templates[step_idx];
    match manager.ensure_cr(nhc, node, template).await? {
        EnsureOutcome::Created(cr) => {
            ctx.publish_normal_event(
                nhc,
                "RemediationCreated",
                "Remediating",
                Some(format!(
                    "Created {} remediation for node {}",
                    template.cr_resource.kind, node_name
                )),
            )
            .await;
            record.remediations.push(remediation_record(&cr, template, now));
            Ok(StepResult::Started)
        }
        EnsureOutcome::Exists(cr) => {
            if record.remediations.len() <= step_idx {
                // Status was lost (controller restart); rebuild the record
                // from the CR itself
                let started = cr
                    .creation_timestamp()
                    .map(|t| t.0)
                    .unwrap_or(now);
                record
                    .remediations
                    .push(remediation_record(&cr, template, started));
            }
            Ok(StepResult::Started)
        }
        EnsureOutcome::OwnedByOther => {
            // Bookkeeping ignores foreign CRs entirely; give the lease back
            leases.release(&node_name).await?;
            Ok(StepResult::ForeignCr)
        }
    }
}

async fn renew_lease(
    leases: &NodeLeaseManager,
    steps: &[EscalationStep],
    node: &Node,
    record: &UnhealthyNode,
    ctx: &Context,
    now: Timestamp,
) -> Result<()> {
    if record.remediations.is_empty() {
        return Ok(());
    }
    let step_idx = record.remediations.len() - 1;
    let duration = lease_duration(ctx, steps, step_idx.min(steps.len().saturating_sub(1)));
    match leases.obtain(&node.name_any(), duration, now).await? {
        LeaseOutcome::Acquired => Ok(()),
        LeaseOutcome::Taken { holder } => {
            warn!(node = %node.name_any(), holder = %holder, "Node lease unexpectedly held elsewhere");
            Ok(())
        }
    }
}

fn lease_duration(
    ctx: &Context,
    steps: &[EscalationStep],
    step_idx: usize,
) -> jiff::SignedDuration {
    let base = steps
        .get(step_idx)
        .and_then(|s| s.timeout)
        .unwrap_or(ctx.config.default_remediation_duration);
    base + ctx.config.lease_buffer
}

fn remediation_record(
    cr: &DynamicObject,
    template: &ResolvedTemplate,
    started: Timestamp,
) -> Remediation {
    let gvk = &template.cr_resource;
    Remediation {
        resource: RemediationResource {
            group: gvk.group.clone(),
            version: gvk.version.clone(),
            kind: gvk.kind.clone(),
            namespace: cr.namespace(),
            name: cr.name_any(),
            uid: cr.uid(),
        },
        template_name: template.multi_kind.then(|| template.name.clone()),
        started: started.to_string(),
        timed_out: None,
    }
}

/// List all selected nodes through the API server.
async fn list_selected_nodes(ctx: &Context, nhc: &NodeHealthCheck) -> Result<Vec<Node>> {
    let api: Api<Node> = Api::all(ctx.client.clone());
    let params = match selector::to_selector_string(&nhc.spec.selector) {
        Some(labels) => ListParams::default().labels(&labels),
        None => ListParams::default(),
    };
    Ok(api.list(&params).await?.items)
}

/// Every CR owned by this NHC across all step templates, keyed by node.
async fn collect_owned_crs(
    nhc: &NodeHealthCheck,
    manager: &RemediationCrManager,
    templates: &[ResolvedTemplate],
) -> Result<BTreeMap<String, Vec<(usize, DynamicObject)>>> {
    let mut by_node: BTreeMap<String, Vec<(usize, DynamicObject)>> = BTreeMap::new();
    for (idx, template) in templates.iter().enumerate() {
        for cr in manager.list_owned_crs(nhc, template).await? {
            let Some(node_name) = cr_node_name(&cr, template.multi_kind) else {
                continue;
            };
            by_node.entry(node_name).or_default().push((idx, cr));
        }
    }
    Ok(by_node)
}

/// Delete owned CRs whose node is no longer tracked: nodes that left the
/// selector, opted out, or whose bookkeeping was lost.
async fn reap_orphans(
    manager: &RemediationCrManager,
    templates: &[ResolvedTemplate],
    owned_crs: &BTreeMap<String, Vec<(usize, DynamicObject)>>,
    records: &[UnhealthyNode],
) -> Result<()> {
    for (node_name, crs) in owned_crs {
        let tracked = records.iter().any(|r| &r.name == node_name);
        if tracked {
            continue;
        }
        for (template_idx, cr) in crs {
            debug!(node = %node_name, cr = %cr.name_any(), "Reaping orphaned remediation CR");
            manager.delete_cr(&templates[*template_idx], cr).await?;
        }
    }
    Ok(())
}

/// Disable the NHC with the condition reason matching the error.
async fn disable(
    api: &Api<NodeHealthCheck>,
    nhc: &NodeHealthCheck,
    ctx: &Context,
    error: Error,
) -> Result<Action> {
    let reason = match &error {
        Error::TemplateNotFound(_) => CONDITION_REASON_DISABLED_TEMPLATE_NOT_FOUND,
        Error::TemplateInvalid(_) => CONDITION_REASON_DISABLED_TEMPLATE_INVALID,
        _ => CONDITION_REASON_DISABLED_INVALID_CONFIG,
    };
    warn!(name = %nhc.name_any(), reason = %reason, error = %error, "Disabling NodeHealthCheck");
    ctx.publish_warning_event(nhc, reason, "Reconciling", Some(error.to_string()))
        .await;

    let previous = nhc.status.as_ref();
    let new_status = status::build_status(
        previous,
        Phase::Disabled,
        &error.to_string(),
        Condition::disabled(true, reason, &error.to_string()),
        previous.map(|s| s.healthy_nodes).unwrap_or_default(),
        previous.map(|s| s.observed_nodes).unwrap_or_default(),
        previous.map(|s| s.unhealthy_nodes.clone()).unwrap_or_default(),
    );
    status::patch_status(api, &nhc.name_any(), &new_status).await?;
    Ok(Action::await_change())
}

fn previous_unhealthy(nhc: &NodeHealthCheck) -> Vec<UnhealthyNode> {
    nhc.status
        .as_ref()
        .map(|s| s.unhealthy_nodes.clone())
        .unwrap_or_default()
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<NodeHealthCheck>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(&name);
    }

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        warn!(name = %name, error = %error, "Retryable error, will retry");
        Action::requeue(error.requeue_after())
    } else {
        tracing::error!(name = %name, error = %error, "Non-retryable error");
        Action::requeue(Duration::from_secs(300))
    }
}
