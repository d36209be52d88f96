//! Health predicate evaluation for nodes.
//!
//! Applies an NHC's unhealthy-condition list to a node's observed
//! conditions. A node matches when any (type, status) pair is currently
//! observed and its last transition is at least `duration` ago.

use jiff::{SignedDuration, Timestamp};
use k8s_openapi::api::core::v1::Node;

use crate::crd::UnhealthyCondition;

/// A fixed buffer added past the duration boundary so the follow-up
/// reconcile lands strictly after it.
const EXPIRY_BUFFER: SignedDuration = SignedDuration::from_secs(1);

/// Outcome of evaluating one node against the unhealthy-condition list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HealthAssessment {
    /// True when some (type, status) pair has held long enough.
    pub matches: bool,
    /// When a currently-observed pair will have held long enough, plus the
    /// safety buffer. None when nothing is observed or the node already
    /// matches.
    pub earliest_ready_at: Option<Timestamp>,
}

impl HealthAssessment {
    /// A healthy node with nothing pending.
    pub fn healthy() -> Self {
        Self {
            matches: false,
            earliest_ready_at: None,
        }
    }
}

/// Evaluate `conditions` against the node's current condition list at `now`.
///
/// Malformed durations are skipped here; spec validation reports them
/// separately as configuration errors.
pub fn evaluate(conditions: &[UnhealthyCondition], node: &Node, now: Timestamp) -> HealthAssessment {
    let observed = match node.status.as_ref().and_then(|s| s.conditions.as_ref()) {
        Some(observed) => observed,
        None => return HealthAssessment::healthy(),
    };

    let mut earliest: Option<Timestamp> = None;
    for unhealthy in conditions {
        let Some(duration) = unhealthy.duration() else {
            continue;
        };
        for observed in observed {
            if observed.type_ != unhealthy.r#type || observed.status != unhealthy.status {
                continue;
            }
            let Some(transition) = observed.last_transition_time.as_ref() else {
                continue;
            };
            let held_since = transition.0;
            if now.duration_since(held_since) >= duration {
                return HealthAssessment {
                    matches: true,
                    earliest_ready_at: None,
                };
            }
            let boundary = held_since + duration + EXPIRY_BUFFER;
            earliest = Some(match earliest {
                Some(current) if current <= boundary => current,
                _ => boundary,
            });
        }
    }

    HealthAssessment {
        matches: false,
        earliest_ready_at: earliest,
    }
}
