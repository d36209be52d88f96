//! node-healthcheck-operator library crate
//!
//! This module exports the controller, CRD definitions, and webhook server.

pub mod controller;
pub mod crd;
pub mod health;
pub mod webhooks;

pub use health::HealthState;
pub use webhooks::{
    WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT, WebhookError, run_webhook_server,
};

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, WatchStreamExt, predicates, reflector, watcher};
use kube::{Api, Client, ResourceExt};
use tracing::{debug, error, info};

use controller::gates::UpgradeChecker;
use controller::{context::Context, reconciler};
use crd::NodeHealthCheck;

/// Create the default watcher configuration for all watches.
///
/// `any_semantic()` gives more reliable resource discovery in test
/// environments.
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Change signature for node events: labels plus the set of
/// (type, status) condition pairs. Reordered conditions and heartbeat
/// timestamps hash the same, so they do not retrigger reconciles.
fn node_change_signature(node: &Node) -> Option<u64> {
    let mut hasher = DefaultHasher::new();
    for (key, value) in node.labels() {
        key.hash(&mut hasher);
        value.hash(&mut hasher);
    }
    let mut pairs: Vec<(&str, &str)> = node
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .map(|c| (c.type_.as_str(), c.status.as_str()))
                .collect()
        })
        .unwrap_or_default();
    pairs.sort_unstable();
    pairs.hash(&mut hasher);
    Some(hasher.finish())
}

/// Run the operator controller.
///
/// Watches NodeHealthCheck resources and reconciles them. Node events are
/// mapped to every NHC whose selector matches the node. It can be called
/// from main.rs or spawned as a background task during integration tests.
pub async fn run_controller(
    client: Client,
    health_state: Option<Arc<HealthState>>,
    upgrade_checker: Arc<dyn UpgradeChecker>,
) {
    info!("Starting controller for NodeHealthCheck resources");

    // Mark as ready once we start the controller
    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    let ctx = Arc::new(Context::new(client.clone(), health_state, upgrade_checker));

    let nhcs: Api<NodeHealthCheck> = Api::all(client.clone());
    let nodes: Api<Node> = Api::all(client.clone());

    let watcher_config = default_watcher_config();

    // Reflector-backed NHC stream with backoff; the store also backs the
    // node-to-NHC mapper below
    let (reader, writer) = reflector::store();
    let nhc_stream = reflector(writer, watcher(nhcs, watcher_config.clone()))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation);

    // Node stream filtered down to label or condition-set changes
    let node_stream = watcher(nodes, watcher_config)
        .default_backoff()
        .applied_objects()
        .predicate_filter(node_change_signature);

    let mapper_store = reader.clone();
    let node_mapper = move |node: Node| {
        let nhcs: Vec<NodeHealthCheck> = mapper_store
            .state()
            .iter()
            .map(|nhc| (**nhc).clone())
            .collect();
        controller::watch::matching_nhc_names(&nhcs, &node)
            .into_iter()
            .map(|name| ObjectRef::new(&name))
            .collect::<Vec<_>>()
    };

    Controller::for_stream(nhc_stream, reader)
        .watches_stream(node_stream, node_mapper)
        .run(reconciler::reconcile, reconciler::error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    // ObjectNotFound/NotFound errors are expected after
                    // deletion when related watch events trigger
                    // reconciliation for a deleted object.
                    let is_not_found = match &e {
                        kube::runtime::controller::Error::ObjectNotFound(_) => true,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) => {
                            err.is_not_found()
                        }
                        _ => false,
                    };
                    if is_not_found {
                        debug!("Object no longer exists (likely deleted): {:?}", e);
                    } else {
                        error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    // This should never complete in normal operation
    error!("Controller stream ended unexpectedly");
}
