//! Cluster-level safety gates.
//!
//! Three gates run before any remediation work:
//! - pause requests on the NHC spec,
//! - cluster upgrade status (no new remediation while upgrading),
//! - etcd quorum protection for control-plane nodes, driven by the guard
//!   PodDisruptionBudget and per-node guard pod readiness.
//!
//! Template resolution, the third spec gate, lives with the remediation CR
//! manager.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::{Api, DynamicObject, ListParams};
use kube::discovery::ApiResource;
use kube::Client;
use tracing::debug;

use crate::controller::context::Context;
use crate::controller::error::{Error, Result};

/// Label selecting the etcd guard pods.
const GUARD_POD_LABEL: &str = "app=guard";

/// Source of cluster-upgrade status.
#[async_trait]
pub trait UpgradeChecker: Send + Sync {
    /// Whether a cluster upgrade is currently in progress.
    async fn check(&self) -> Result<bool>;
}

/// Checker for clusters without an upgrade signal; never reports upgrading.
pub struct NoopUpgradeChecker;

#[async_trait]
impl UpgradeChecker for NoopUpgradeChecker {
    async fn check(&self) -> Result<bool> {
        Ok(false)
    }
}

/// Reads the OpenShift ClusterVersion object and reports an upgrade while
/// its Progressing condition is True.
pub struct ClusterVersionUpgradeChecker {
    client: Client,
}

impl ClusterVersionUpgradeChecker {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api_resource() -> ApiResource {
        ApiResource {
            group: "config.openshift.io".to_string(),
            version: "v1".to_string(),
            api_version: "config.openshift.io/v1".to_string(),
            kind: "ClusterVersion".to_string(),
            plural: "clusterversions".to_string(),
        }
    }
}

#[async_trait]
impl UpgradeChecker for ClusterVersionUpgradeChecker {
    async fn check(&self) -> Result<bool> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &Self::api_resource());
        match api.get_opt("version").await? {
            Some(cv) => Ok(cluster_version_progressing(&cv)),
            None => Ok(false),
        }
    }
}

/// True when the ClusterVersion carries Progressing=True.
pub fn cluster_version_progressing(cv: &DynamicObject) -> bool {
    cv.data["status"]["conditions"]
        .as_array()
        .into_iter()
        .flatten()
        .any(|c| c["type"] == "Progressing" && c["status"] == "True")
}

/// Whether a control-plane node may get a remediation CR right now.
///
/// Control-plane remediation is serialized: a second CP node is never
/// started while another CP remediation is active. The single slot opens
/// only when the etcd guard budget tolerates a disruption, or when the
/// node's guard pod is already down (the node cannot contribute to quorum
/// anyway).
pub fn control_plane_remediation_allowed(
    disruptions_allowed: Option<i32>,
    guard_pod_ready: Option<bool>,
    active_control_plane_remediations: usize,
) -> bool {
    if active_control_plane_remediations > 0 {
        return false;
    }
    match disruptions_allowed {
        Some(allowed) if allowed >= 1 => true,
        // Budget exhausted: only a node whose guard pod is not Ready (or
        // missing) can be remediated without reducing quorum further.
        Some(_) => !guard_pod_ready.unwrap_or(false),
        // No guard PDB in this cluster; nothing beyond serialization.
        None => true,
    }
}

/// Observed etcd-quorum state for gate decisions.
#[derive(Clone, Debug, Default)]
pub struct EtcdQuorumState {
    /// disruptionsAllowed from the guard PDB, when present.
    pub disruptions_allowed: Option<i32>,
    /// Guard pod readiness by node name.
    pub guard_pod_ready: std::collections::BTreeMap<String, bool>,
}

impl EtcdQuorumState {
    /// Gate decision for one control-plane node.
    pub fn allows(&self, node_name: &str, active_control_plane_remediations: usize) -> bool {
        control_plane_remediation_allowed(
            self.disruptions_allowed,
            self.guard_pod_ready.get(node_name).copied(),
            active_control_plane_remediations,
        )
    }
}

/// Fetch the guard PDB and guard pod readiness for control-plane gating.
pub async fn fetch_etcd_quorum_state(ctx: &Context) -> Result<EtcdQuorumState> {
    let pdb_api: Api<PodDisruptionBudget> =
        Api::namespaced(ctx.client.clone(), &ctx.config.etcd_namespace);
    let disruptions_allowed = match pdb_api.get_opt(&ctx.config.etcd_guard_pdb_name).await {
        Ok(pdb) => pdb
            .and_then(|p| p.status)
            .map(|s| s.disruptions_allowed),
        Err(kube::Error::Api(e)) if e.code == 403 => {
            // Non-OpenShift clusters have no guard PDB and may not grant
            // access to the namespace at all.
            debug!("etcd guard PDB not accessible, skipping quorum gate");
            None
        }
        Err(e) => return Err(Error::Kube(e)),
    };

    let pod_api: Api<Pod> = Api::namespaced(ctx.client.clone(), &ctx.config.etcd_namespace);
    let pods = match pod_api
        .list(&ListParams::default().labels(GUARD_POD_LABEL))
        .await
    {
        Ok(list) => list.items,
        Err(kube::Error::Api(e)) if e.code == 403 => Vec::new(),
        Err(e) => return Err(Error::Kube(e)),
    };

    let mut guard_pod_ready = std::collections::BTreeMap::new();
    for pod in pods {
        let Some(node_name) = pod.spec.as_ref().and_then(|s| s.node_name.clone()) else {
            continue;
        };
        guard_pod_ready.insert(node_name, pod_is_ready(&pod));
    }

    Ok(EtcdQuorumState {
        disruptions_allowed,
        guard_pod_ready,
    })
}

/// True when the pod carries condition Ready=True.
pub fn pod_is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}
