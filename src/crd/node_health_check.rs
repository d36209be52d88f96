//! NodeHealthCheck Custom Resource Definition.
//!
//! Defines the NodeHealthCheck CRD: a declarative policy that selects a set
//! of nodes, describes which node conditions count as unhealthy, and names
//! the remediation template(s) used to repair them.

use std::collections::BTreeMap;

use jiff::SignedDuration;
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// NodeHealthCheck is a cluster-scoped custom resource for detecting and
/// remediating unhealthy nodes.
///
/// Example:
/// ```yaml
/// apiVersion: remediation.medik8s.io/v1alpha1
/// kind: NodeHealthCheck
/// metadata:
///   name: workers
/// spec:
///   selector:
///     matchExpressions:
///       - key: node-role.kubernetes.io/control-plane
///         operator: DoesNotExist
///   minHealthy: 51%
///   unhealthyConditions:
///     - type: Ready
///       status: "False"
///       duration: 5m
///   remediationTemplate:
///     apiVersion: self-node-remediation.medik8s.io/v1alpha1
///     kind: SelfNodeRemediationTemplate
///     namespace: self-node-remediation
///     name: default
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "remediation.medik8s.io",
    version = "v1alpha1",
    kind = "NodeHealthCheck",
    plural = "nodehealthchecks",
    shortname = "nhc",
    status = "NodeHealthCheckStatus",
    // Print columns for kubectl get
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Observed", "type":"integer", "jsonPath":".status.observedNodes"}"#,
    printcolumn = r#"{"name":"Healthy", "type":"integer", "jsonPath":".status.healthyNodes"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NodeHealthCheckSpec {
    /// Label selector matching the nodes this check observes.
    /// An empty selector matches all nodes.
    #[serde(default)]
    pub selector: LabelSelector,

    /// Conditions that mark a node as unhealthy. A node matches when any
    /// entry's (type, status) is observed continuously for at least
    /// `duration` (a Go-style duration string such as "300s" or "5m").
    #[serde(default = "default_unhealthy_conditions")]
    pub unhealthy_conditions: Vec<UnhealthyCondition>,

    /// Minimum number (or percentage) of selected nodes that must stay
    /// healthy. Remediation is refused when it would drop below this floor.
    #[serde(default = "default_min_healthy")]
    pub min_healthy: IntOrString,

    /// Opaque pause requests. While any entry is present no new remediation
    /// is started; existing remediations are left alone.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pause_requests: Vec<String>,

    /// Reference to a single remediation template. Mutually exclusive with
    /// `escalatingRemediations`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation_template: Option<ObjectReference>,

    /// Ordered list of remediation templates tried one after another when
    /// the previous step times out. Mutually exclusive with
    /// `remediationTemplate`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalating_remediations: Option<Vec<EscalatingRemediation>>,
}

impl Default for NodeHealthCheckSpec {
    fn default() -> Self {
        Self {
            selector: LabelSelector::default(),
            unhealthy_conditions: default_unhealthy_conditions(),
            min_healthy: default_min_healthy(),
            pause_requests: Vec::new(),
            remediation_template: None,
            escalating_remediations: None,
        }
    }
}

fn default_min_healthy() -> IntOrString {
    IntOrString::String("51%".to_string())
}

fn default_unhealthy_conditions() -> Vec<UnhealthyCondition> {
    vec![
        UnhealthyCondition {
            r#type: "Ready".to_string(),
            status: "False".to_string(),
            duration: "300s".to_string(),
        },
        UnhealthyCondition {
            r#type: "Ready".to_string(),
            status: "Unknown".to_string(),
            duration: "300s".to_string(),
        },
    ]
}

/// One unhealthy-condition predicate: (type, status) held for `duration`.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnhealthyCondition {
    /// Node condition type, e.g. "Ready".
    pub r#type: String,

    /// Node condition status: "True", "False" or "Unknown".
    pub status: String,

    /// How long the (type, status) pair must hold before the node counts as
    /// unhealthy. Go-style duration string, e.g. "300s", "5m", "1h30m".
    pub duration: String,
}

impl UnhealthyCondition {
    /// Parsed duration, if the string is well-formed.
    pub fn duration(&self) -> Option<SignedDuration> {
        parse_duration(&self.duration)
    }
}

/// One step in an ordered escalation of remediation templates.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EscalatingRemediation {
    /// Template instantiated for this step.
    pub remediation_template: ObjectReference,

    /// Tie-break key; steps run in ascending order. Unique per NHC.
    pub order: i32,

    /// How long this step may run before escalating to the next one.
    /// Go-style duration string.
    pub timeout: String,
}

impl EscalatingRemediation {
    /// Parsed step timeout, if the string is well-formed.
    pub fn timeout(&self) -> Option<SignedDuration> {
        parse_duration(&self.timeout)
    }
}

/// Status of a NodeHealthCheck.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeHealthCheckStatus {
    /// Current phase of the check.
    #[serde(default)]
    pub phase: Phase,

    /// Human-readable explanation of the current phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Conditions describing the current state. Always carries a
    /// "Disabled" condition.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Number of selected nodes currently passing all health predicates.
    #[serde(default)]
    pub healthy_nodes: i32,

    /// Number of nodes matched by the selector.
    #[serde(default)]
    pub observed_nodes: i32,

    /// Node name to the earliest remediation start time (RFC3339) across
    /// that node's remediation CRs.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub in_flight_remediations: BTreeMap<String, String>,

    /// Per-node remediation bookkeeping for nodes failing health predicates
    /// or still tearing down after recovery.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unhealthy_nodes: Vec<UnhealthyNode>,
}

/// An unhealthy (or recovering) node tracked by this NHC.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UnhealthyNode {
    /// Node name.
    pub name: String,

    /// Set (RFC3339) when the node's conditions recovered; the node stays
    /// listed here until all its remediation CRs are gone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions_healthy_timestamp: Option<String>,

    /// Remediations attempted for this node, in escalation order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remediations: Vec<Remediation>,
}

/// One remediation CR created for a node.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Remediation {
    /// Identity of the remediation CR.
    pub resource: RemediationResource,

    /// Template name, recorded for multi-kind templates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_name: Option<String>,

    /// When this remediation started (RFC3339).
    pub started: String,

    /// Set (RFC3339) when this step was declared failed and escalation
    /// moved on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timed_out: Option<String>,
}

/// Group/version/kind/namespace/name/uid identity of a remediation CR.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemediationResource {
    pub group: String,
    pub version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

/// Phase represents the current operating mode of a NodeHealthCheck.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum Phase {
    /// Observing nodes; no remediation in flight.
    #[default]
    Enabled,
    /// At least one remediation CR exists for a selected node.
    Remediating,
    /// Pause requests are present; no new remediation is started.
    Paused,
    /// Configuration or template problems prevent remediation entirely.
    Disabled,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Enabled => write!(f, "Enabled"),
            Phase::Remediating => write!(f, "Remediating"),
            Phase::Paused => write!(f, "Paused"),
            Phase::Disabled => write!(f, "Disabled"),
        }
    }
}

/// Condition type carried on every NodeHealthCheck.
pub const CONDITION_TYPE_DISABLED: &str = "Disabled";

/// Reason on the Disabled condition when the check is operational.
pub const CONDITION_REASON_ENABLED: &str = "Enabled";
/// Reason when a referenced template object cannot be found.
pub const CONDITION_REASON_DISABLED_TEMPLATE_NOT_FOUND: &str = "DisabledTemplateNotFound";
/// Reason when a referenced template is invalid (wrong namespace, bad body).
pub const CONDITION_REASON_DISABLED_TEMPLATE_INVALID: &str = "DisabledTemplateInvalid";
/// Reason when the NHC spec itself is invalid (negative minHealthy, bad selector).
pub const CONDITION_REASON_DISABLED_INVALID_CONFIG: &str = "DisabledInvalidConfig";

/// Condition describes the state of a NodeHealthCheck at a certain point.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    pub r#type: String,
    /// Status of the condition ("True", "False", "Unknown").
    pub status: String,
    /// Machine-readable reason for the condition's last transition.
    pub reason: String,
    /// Human-readable message indicating details about last transition.
    pub message: String,
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: String,
}

impl Condition {
    /// Create a new condition.
    pub fn new(condition_type: &str, status: bool, reason: &str, message: &str) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status: if status {
                "True".to_string()
            } else {
                "False".to_string()
            },
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: jiff::Timestamp::now().to_string(),
        }
    }

    /// Create the "Disabled" condition.
    pub fn disabled(disabled: bool, reason: &str, message: &str) -> Self {
        Self::new(CONDITION_TYPE_DISABLED, disabled, reason, message)
    }
}

impl NodeHealthCheck {
    /// Whether any remediation is currently tracked in flight.
    pub fn is_remediating(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| !s.in_flight_remediations.is_empty())
    }

    /// Escalation steps sorted ascending by `order`. Empty when the NHC
    /// uses a single `remediationTemplate`.
    pub fn escalations_sorted(&self) -> Vec<EscalatingRemediation> {
        let mut steps = self
            .spec
            .escalating_remediations
            .clone()
            .unwrap_or_default();
        steps.sort_by_key(|s| s.order);
        steps
    }
}

/// Parse a Go-style duration string ("300s", "5m", "1h30m", "500ms").
///
/// Returns `None` for empty, negative, or malformed input.
pub fn parse_duration(s: &str) -> Option<SignedDuration> {
    let s = s.trim();
    if s.is_empty() || s.starts_with('-') {
        return None;
    }
    let mut total_ms: i64 = 0;
    let mut num = String::new();
    let mut chars = s.chars().peekable();
    let mut seen_segment = false;
    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            num.push(c);
            continue;
        }
        let unit = if c == 'm' && chars.peek() == Some(&'s') {
            chars.next();
            "ms"
        } else {
            match c {
                'h' => "h",
                'm' => "m",
                's' => "s",
                _ => return None,
            }
        };
        let value: i64 = num.parse().ok()?;
        num.clear();
        seen_segment = true;
        let ms = match unit {
            "h" => value.checked_mul(3_600_000)?,
            "m" => value.checked_mul(60_000)?,
            "s" => value.checked_mul(1_000)?,
            _ => value,
        };
        total_ms = total_ms.checked_add(ms)?;
    }
    if !num.is_empty() || !seen_segment {
        return None;
    }
    Some(SignedDuration::from_millis(total_ms))
}
