//! Escalation step decisions.
//!
//! For each unhealthy node the engine walks an ordered list of remediation
//! steps. A step runs until its timeout passes or the remediator reports it
//! stopped progressing, then the next step starts. Prior CRs stay in place
//! so remediators can finish cleanly.
//!
//! The decision logic here is pure: it looks only at the NHC spec, the
//! remediation records in status, an externally-computed failure signal,
//! and the injected clock. The reconciler applies the resulting effects.

use jiff::{SignedDuration, Timestamp};
use k8s_openapi::api::core::v1::ObjectReference;

use crate::controller::error::{Error, Result};
use crate::crd::{NodeHealthCheck, Remediation};

/// One step of the escalation ladder.
#[derive(Clone, Debug)]
pub struct EscalationStep {
    /// Template instantiated for this step.
    pub template: ObjectReference,
    /// Step budget. None for a single (non-escalating) template, which
    /// never advances on time.
    pub timeout: Option<SignedDuration>,
}

/// What to do for a node's escalation right now.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EscalationDecision {
    /// Create the CR for this step index.
    StartStep(usize),
    /// Current step is within budget; check again at the deadline.
    Observe { deadline: Option<Timestamp> },
    /// Current step failed: annotate its CR timed-out and start the next.
    Advance { from: usize, to: usize },
    /// The last step failed or is still running; keep observing until the
    /// node recovers.
    Terminal,
}

/// The escalation ladder for an NHC. A single `remediationTemplate`
/// collapses to one step without a timeout.
pub fn steps_for(nhc: &NodeHealthCheck) -> Result<Vec<EscalationStep>> {
    if let Some(template) = &nhc.spec.remediation_template {
        return Ok(vec![EscalationStep {
            template: template.clone(),
            timeout: None,
        }]);
    }
    let steps = nhc.escalations_sorted();
    steps
        .iter()
        .map(|step| {
            let timeout = step.timeout().ok_or_else(|| {
                Error::InvalidConfig(format!(
                    "escalation step order {} has malformed timeout {:?}",
                    step.order, step.timeout
                ))
            })?;
            Ok(EscalationStep {
                template: step.remediation_template.clone(),
                timeout: Some(timeout),
            })
        })
        .collect()
}

/// Decide the next escalation move for one node.
///
/// `remediations` are the status records for the node, in start order.
/// `step_failed` is true when the current step's CR reports
/// Succeeded=False or its lease expired with the CR still present.
pub fn decide(
    steps: &[EscalationStep],
    remediations: &[Remediation],
    step_failed: bool,
    now: Timestamp,
) -> EscalationDecision {
    if remediations.is_empty() {
        return EscalationDecision::StartStep(0);
    }
    let idx = remediations.len() - 1;
    if idx >= steps.len() {
        return EscalationDecision::Terminal;
    }
    let current = &remediations[idx];

    // A step already marked timed-out whose successor is missing means the
    // previous reconcile stopped between annotate and create.
    if current.timed_out.is_some() {
        return if idx + 1 < steps.len() {
            EscalationDecision::StartStep(idx + 1)
        } else {
            EscalationDecision::Terminal
        };
    }

    let deadline = match steps[idx].timeout {
        Some(timeout) => current
            .started
            .parse::<Timestamp>()
            .ok()
            .map(|started| started + timeout),
        None => None,
    };
    let timed_out = deadline.is_some_and(|deadline| now >= deadline);

    if step_failed || timed_out {
        if idx + 1 < steps.len() {
            EscalationDecision::Advance {
                from: idx,
                to: idx + 1,
            }
        } else {
            EscalationDecision::Terminal
        }
    } else {
        EscalationDecision::Observe { deadline }
    }
}
