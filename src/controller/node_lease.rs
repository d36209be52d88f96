//! Per-node coordination leases for remediation.
//!
//! Before creating any remediation CR, the controller must hold a Lease
//! named `node-<nodename>` in the dedicated leases namespace. The lease
//! serializes remediation across NodeHealthCheck objects watching the same
//! node: whichever NHC holds the lease proceeds, the rest requeue.
//!
//! Leases also double as the step-timeout signal: an expired lease with a
//! live remediation CR means the step ran past its budget.

use jiff::{SignedDuration, Timestamp};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use tracing::{debug, info, warn};

use crate::controller::context::FIELD_MANAGER;
use crate::controller::error::{Error, Result};
use crate::crd::NodeHealthCheck;

/// Prefix of every remediation lease name.
const LEASE_NAME_PREFIX: &str = "node";

/// Prefix of the holder identity recorded in the lease.
const HOLDER_IDENTITY_PREFIX: &str = "NodeHealthCheck";

/// What to do with a node's lease, decided from its current state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LeaseDecision {
    /// No lease exists; create one.
    Create,
    /// We already hold it; refresh renewTime.
    Renew,
    /// Expired lease held by someone else; take it over.
    TakeOver,
    /// Unexpired lease held by someone else; back off.
    Taken { holder: String },
}

/// Outcome of an obtain attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LeaseOutcome {
    /// The lease is confirmed held by this NHC.
    Acquired,
    /// Another holder owns the lease; retry after the configured interval.
    Taken { holder: String },
}

/// Lease manager bound to one NodeHealthCheck.
pub struct NodeLeaseManager {
    client: Client,
    namespace: String,
    holder: String,
}

impl NodeLeaseManager {
    /// Create a manager for the given NHC.
    pub fn new(client: Client, leases_namespace: &str, nhc: &NodeHealthCheck) -> Self {
        Self {
            client,
            namespace: leases_namespace.to_string(),
            holder: holder_identity(&nhc.name_any()),
        }
    }

    /// The holder identity this manager writes.
    pub fn holder(&self) -> &str {
        &self.holder
    }

    fn api(&self) -> Api<Lease> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// Fetch the node's lease, if any.
    pub async fn get(&self, node_name: &str) -> Result<Option<Lease>> {
        Ok(self.api().get_opt(&lease_name(node_name)).await?)
    }

    /// Obtain the node's lease for `duration`, creating, renewing or taking
    /// over as the current state allows.
    pub async fn obtain(
        &self,
        node_name: &str,
        duration: SignedDuration,
        now: Timestamp,
    ) -> Result<LeaseOutcome> {
        let api = self.api();
        let name = lease_name(node_name);
        let existing = api.get_opt(&name).await?;

        match decide(existing.as_ref(), &self.holder, now) {
            LeaseDecision::Taken { holder } => {
                debug!(node = %node_name, holder = %holder, "Lease held by another owner");
                Ok(LeaseOutcome::Taken { holder })
            }
            LeaseDecision::Renew => {
                let patch = serde_json::json!({
                    "spec": {
                        "renewTime": MicroTime(now),
                        "leaseDurationSeconds": duration_seconds(duration),
                    }
                });
                api.patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
                    .await?;
                debug!(node = %node_name, holder = %self.holder, "Lease renewed");
                Ok(LeaseOutcome::Acquired)
            }
            decision @ (LeaseDecision::Create | LeaseDecision::TakeOver) => {
                let transitions = existing
                    .as_ref()
                    .and_then(|l| l.spec.as_ref())
                    .and_then(|s| s.lease_transitions)
                    .unwrap_or(0);
                let lease = Lease {
                    metadata: ObjectMeta {
                        name: Some(name.clone()),
                        namespace: Some(self.namespace.clone()),
                        ..Default::default()
                    },
                    spec: Some(LeaseSpec {
                        holder_identity: Some(self.holder.clone()),
                        lease_duration_seconds: Some(duration_seconds(duration)),
                        acquire_time: Some(MicroTime(now)),
                        renew_time: Some(MicroTime(now)),
                        lease_transitions: Some(transitions + 1),
                        ..Default::default()
                    }),
                };
                api.patch(
                    &name,
                    &PatchParams::apply(FIELD_MANAGER).force(),
                    &Patch::Apply(&lease),
                )
                .await?;
                info!(node = %node_name, holder = %self.holder, ?decision, "Lease acquired");
                Ok(LeaseOutcome::Acquired)
            }
        }
    }

    /// Release the node's lease if held by this NHC. Foreign leases are
    /// left untouched.
    pub async fn release(&self, node_name: &str) -> Result<()> {
        let api = self.api();
        let name = lease_name(node_name);

        match api.get_opt(&name).await? {
            None => Ok(()),
            Some(lease) => {
                let holder = lease_holder(&lease);
                if holder.as_deref() != Some(self.holder.as_str()) {
                    warn!(
                        node = %node_name,
                        current_holder = ?holder,
                        "Not releasing lease held by another owner"
                    );
                    return Ok(());
                }
                match api.delete(&name, &DeleteParams::default()).await {
                    Ok(_) => {
                        info!(node = %node_name, holder = %self.holder, "Lease released");
                        Ok(())
                    }
                    Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
                    Err(e) => Err(Error::Kube(e)),
                }
            }
        }
    }
}

/// Lease name for a node.
pub fn lease_name(node_name: &str) -> String {
    format!("{}-{}", LEASE_NAME_PREFIX, node_name)
}

/// Holder identity for an NHC name.
pub fn holder_identity(nhc_name: &str) -> String {
    format!("{}-{}", HOLDER_IDENTITY_PREFIX, nhc_name)
}

/// The holder recorded on a lease, if any.
pub fn lease_holder(lease: &Lease) -> Option<String> {
    lease
        .spec
        .as_ref()
        .and_then(|s| s.holder_identity.as_ref())
        .cloned()
}

/// Whether the lease has expired at `now`. A lease without renew time or
/// duration counts as expired.
pub fn lease_expired(lease: &Lease, now: Timestamp) -> bool {
    if let Some(spec) = &lease.spec
        && let (Some(renew_time), Some(duration)) = (&spec.renew_time, spec.lease_duration_seconds)
    {
        let elapsed = now.duration_since(renew_time.0);
        return elapsed > SignedDuration::from_secs(i64::from(duration));
    }
    true
}

/// Decide what to do with a node's lease.
pub fn decide(existing: Option<&Lease>, holder: &str, now: Timestamp) -> LeaseDecision {
    let Some(lease) = existing else {
        return LeaseDecision::Create;
    };
    match lease_holder(lease) {
        Some(current) if current == holder => LeaseDecision::Renew,
        Some(current) if !lease_expired(lease, now) => LeaseDecision::Taken { holder: current },
        _ => LeaseDecision::TakeOver,
    }
}

fn duration_seconds(duration: SignedDuration) -> i32 {
    i32::try_from(duration.as_secs()).unwrap_or(i32::MAX)
}
