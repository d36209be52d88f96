//! Test fixtures and builder patterns for NodeHealthCheck.

use jiff::{SignedDuration, Timestamp};
use k8s_openapi::api::core::v1::{Node, NodeCondition, NodeStatus, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, Time};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use node_healthcheck_operator::crd::{
    EscalatingRemediation, NodeHealthCheck, NodeHealthCheckSpec, UnhealthyCondition,
};

/// The fixed instant all deterministic tests run at.
pub fn test_now() -> Timestamp {
    "2024-06-01T12:00:00Z".parse().expect("valid timestamp")
}

/// Builder for creating NodeHealthCheck test fixtures.
///
/// # Example
/// ```
/// let nhc = NodeHealthCheckBuilder::new("test")
///     .min_healthy_percent(51)
///     .ready_false_duration("300s")
///     .template("InfrastructureRemediationTemplate", "default", "template")
///     .build();
/// ```
#[derive(Clone, Debug)]
pub struct NodeHealthCheckBuilder {
    name: String,
    min_healthy: IntOrString,
    selector: LabelSelector,
    unhealthy_conditions: Vec<UnhealthyCondition>,
    pause_requests: Vec<String>,
    remediation_template: Option<ObjectReference>,
    escalating_remediations: Option<Vec<EscalatingRemediation>>,
    uid: Option<String>,
}

impl NodeHealthCheckBuilder {
    /// Create a new builder with the given NHC name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            min_healthy: IntOrString::String("51%".to_string()),
            selector: LabelSelector::default(),
            unhealthy_conditions: vec![UnhealthyCondition {
                r#type: "Ready".to_string(),
                status: "False".to_string(),
                duration: "300s".to_string(),
            }],
            pause_requests: Vec::new(),
            remediation_template: Some(template_ref(
                "InfrastructureRemediationTemplate",
                "default",
                "template",
            )),
            escalating_remediations: None,
            uid: Some("test-uid".to_string()),
        }
    }

    /// Set minHealthy as a percentage.
    pub fn min_healthy_percent(mut self, percent: u32) -> Self {
        self.min_healthy = IntOrString::String(format!("{}%", percent));
        self
    }

    /// Set minHealthy as an absolute count.
    pub fn min_healthy_int(mut self, count: i32) -> Self {
        self.min_healthy = IntOrString::Int(count);
        self
    }

    /// Replace the unhealthy conditions with a single Ready=False entry.
    pub fn ready_false_duration(mut self, duration: impl Into<String>) -> Self {
        self.unhealthy_conditions = vec![UnhealthyCondition {
            r#type: "Ready".to_string(),
            status: "False".to_string(),
            duration: duration.into(),
        }];
        self
    }

    /// Set the node selector.
    pub fn selector(mut self, selector: LabelSelector) -> Self {
        self.selector = selector;
        self
    }

    /// Add a pause request.
    pub fn pause(mut self, request: impl Into<String>) -> Self {
        self.pause_requests.push(request.into());
        self
    }

    /// Set the single remediation template reference.
    pub fn template(mut self, kind: &str, namespace: &str, name: &str) -> Self {
        self.remediation_template = Some(template_ref(kind, namespace, name));
        self.escalating_remediations = None;
        self
    }

    /// Use an escalation ladder instead of a single template.
    pub fn escalations(mut self, steps: Vec<EscalatingRemediation>) -> Self {
        self.remediation_template = None;
        self.escalating_remediations = Some(steps);
        self
    }

    /// Build the NodeHealthCheck.
    pub fn build(self) -> NodeHealthCheck {
        let mut nhc = NodeHealthCheck::new(
            &self.name,
            NodeHealthCheckSpec {
                selector: self.selector,
                unhealthy_conditions: self.unhealthy_conditions,
                min_healthy: self.min_healthy,
                pause_requests: self.pause_requests,
                remediation_template: self.remediation_template,
                escalating_remediations: self.escalating_remediations,
            },
        );
        nhc.metadata.uid = self.uid;
        nhc
    }
}

impl Default for NodeHealthCheckBuilder {
    fn default() -> Self {
        Self::new("test")
    }
}

/// Template object reference.
pub fn template_ref(kind: &str, namespace: &str, name: &str) -> ObjectReference {
    ObjectReference {
        kind: Some(kind.to_string()),
        api_version: Some("test.medik8s.io/v1alpha1".to_string()),
        namespace: Some(namespace.to_string()),
        name: Some(name.to_string()),
        ..Default::default()
    }
}

/// One escalation step.
pub fn escalation_step(kind: &str, namespace: &str, name: &str, order: i32, timeout: &str) -> EscalatingRemediation {
    EscalatingRemediation {
        remediation_template: template_ref(kind, namespace, name),
        order,
        timeout: timeout.to_string(),
    }
}

/// A node with one condition whose transition was `age` before `test_now`.
pub fn node_with_condition(
    name: &str,
    condition_type: &str,
    status: &str,
    age: SignedDuration,
) -> Node {
    let mut node = Node {
        status: Some(NodeStatus {
            conditions: Some(vec![NodeCondition {
                type_: condition_type.to_string(),
                status: status.to_string(),
                last_transition_time: Some(Time(test_now() - age)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    };
    node.metadata = ObjectMeta {
        name: Some(name.to_string()),
        ..Default::default()
    };
    node
}

/// A node passing the Ready predicate for 10 minutes.
pub fn healthy_node(name: &str) -> Node {
    node_with_condition(name, "Ready", "True", SignedDuration::from_mins(10))
}

/// A node failing the Ready predicate for 10 minutes.
pub fn unhealthy_node(name: &str) -> Node {
    node_with_condition(name, "Ready", "False", SignedDuration::from_mins(10))
}

/// Add a label to a node.
pub fn with_label(mut node: Node, key: &str, value: &str) -> Node {
    node.metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert(key.to_string(), value.to_string());
    node
}

/// The node sets the reconciliation scenarios use: `unhealthy` nodes named
/// unhealthy-worker-node-N and `healthy` nodes named healthy-worker-node-N.
pub fn worker_nodes(unhealthy: usize, healthy: usize) -> Vec<Node> {
    let mut nodes = Vec::with_capacity(unhealthy + healthy);
    for i in 1..=unhealthy {
        nodes.push(unhealthy_node(&format!("unhealthy-worker-node-{}", i)));
    }
    for i in 1..=healthy {
        nodes.push(healthy_node(&format!("healthy-worker-node-{}", i)));
    }
    nodes
}
