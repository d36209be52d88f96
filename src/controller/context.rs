//! Shared context for the controller.
//!
//! The Context struct holds shared state that is passed to the reconciler:
//! the Kubernetes client, event recorder, configuration knobs, the cluster
//! upgrade checker, and the injectable clock used for all timing decisions.

use std::sync::Arc;
use std::time::Duration;

use jiff::{SignedDuration, Timestamp};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};

use crate::controller::gates::UpgradeChecker;
use crate::crd::NodeHealthCheck;
use crate::health::HealthState;

/// Field manager name for the operator
pub const FIELD_MANAGER: &str = "node-healthcheck-operator";

/// Time source for the engine. Production reads the system clock; tests
/// freeze it to make every timeout boundary deterministic.
#[derive(Clone, Copy, Debug, Default)]
pub struct Clock {
    frozen: Option<Timestamp>,
}

impl Clock {
    /// A clock backed by system time.
    pub fn system() -> Self {
        Self { frozen: None }
    }

    /// A clock frozen at `ts`.
    pub fn fixed(ts: Timestamp) -> Self {
        Self { frozen: Some(ts) }
    }

    /// Current time.
    pub fn now(&self) -> Timestamp {
        self.frozen.unwrap_or_else(Timestamp::now)
    }
}

/// Tunable controller parameters with their wire-stable defaults.
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Requeue interval while a cluster upgrade is in progress.
    pub cluster_upgrade_requeue_after: Duration,
    /// Age past which a remediation CR gets the alert annotation.
    pub remediation_cr_alert_timeout: SignedDuration,
    /// Requeue interval when a node's lease is held by another owner.
    pub requeue_if_lease_taken: Duration,
    /// Lease duration used for single (non-escalating) templates.
    pub default_remediation_duration: SignedDuration,
    /// Safety margin added on top of step timeouts when sizing leases.
    pub lease_buffer: SignedDuration,
    /// Namespace holding the per-node remediation leases.
    pub leases_namespace: String,
    /// Namespace of the machine-management stack; templates living here get
    /// Machine owner references on their CRs.
    pub machine_api_namespace: String,
    /// Namespace of the etcd guard pods and their PDB.
    pub etcd_namespace: String,
    /// Name of the etcd guard PodDisruptionBudget.
    pub etcd_guard_pdb_name: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            cluster_upgrade_requeue_after: Duration::from_secs(60),
            remediation_cr_alert_timeout: SignedDuration::from_hours(48),
            requeue_if_lease_taken: Duration::from_secs(2),
            default_remediation_duration: SignedDuration::from_mins(10),
            lease_buffer: SignedDuration::from_secs(1),
            leases_namespace: "medik8s-leases".to_string(),
            machine_api_namespace: "openshift-machine-api".to_string(),
            etcd_namespace: "openshift-etcd".to_string(),
            etcd_guard_pdb_name: "etcd-guard-pdb".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Read overridable settings from the environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(ns) = std::env::var("LEASES_NAMESPACE")
            && !ns.is_empty()
        {
            config.leases_namespace = ns;
        }
        config
    }
}

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Event reporter identity
    reporter: Reporter,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
    /// Controller configuration knobs
    pub config: ControllerConfig,
    /// Time source; frozen in tests
    pub clock: Clock,
    /// Cluster upgrade status source
    pub upgrade_checker: Arc<dyn UpgradeChecker>,
}

impl Context {
    /// Create a new context with default configuration.
    pub fn new(
        client: Client,
        health_state: Option<Arc<HealthState>>,
        upgrade_checker: Arc<dyn UpgradeChecker>,
    ) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
            health_state,
            config: ControllerConfig::from_env(),
            clock: Clock::system(),
            upgrade_checker,
        }
    }

    /// Replace the configuration (tests and bootstrap overrides).
    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the clock (tests).
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Create an event recorder for publishing Kubernetes events
    fn recorder(&self) -> Recorder {
        Recorder::new(self.client.clone(), self.reporter.clone())
    }

    /// Publish a normal event for a NodeHealthCheck resource
    pub async fn publish_normal_event(
        &self,
        resource: &NodeHealthCheck,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let recorder = self.recorder();
        let object_ref = resource.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_: EventType::Normal,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }

    /// Publish a warning event for a NodeHealthCheck resource
    pub async fn publish_warning_event(
        &self,
        resource: &NodeHealthCheck,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let recorder = self.recorder();
        let object_ref = resource.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_: EventType::Warning,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish warning event");
        }
    }
}
