//! node-healthcheck-operator - detects unhealthy nodes and drives external
//! remediators to repair them.
//!
//! Startup wires together structured logging, the Kubernetes client,
//! operator-level leader election, the health endpoints, the controller,
//! and (when certificates are mounted) the admission webhook.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use node_healthcheck_operator::controller::gates::ClusterVersionUpgradeChecker;
use node_healthcheck_operator::health::{HealthState, run_health_server};
use node_healthcheck_operator::run_controller;
use node_healthcheck_operator::{WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, run_webhook_server};

/// Leader-election lease. Distinct from the per-node remediation leases:
/// this one elects the single controller instance, those serialize
/// remediation per node across NHC objects.
const LEADER_LEASE_NAME: &str = "node-healthcheck-operator-leader";
const LEADER_LEASE_TTL: Duration = Duration::from_secs(15);
const LEADER_RENEW_EVERY: Duration = Duration::from_secs(5);

/// How long shutdown waits for a reconcile mid-flight to land its status
/// patch before the process exits.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("node_healthcheck_operator=info".parse()?)
                .add_directive("kube=info".parse()?)
                .add_directive("kube_leader_election=info".parse()?),
        )
        .json()
        .init();

    info!("Starting node-healthcheck-operator");

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let identity = pod_identity();
    let namespace = operator_namespace();
    info!(
        holder_id = %identity,
        namespace = %namespace,
        lease_name = LEADER_LEASE_NAME,
        "Initializing leader election"
    );

    let health_state = Arc::new(HealthState::new());

    // Probes must answer before leadership is settled, so the health
    // server starts first
    let health_handle = {
        let health_state = health_state.clone();
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state).await {
                error!("Health server error: {}", e);
            }
        })
    };

    // Two live controllers would race each other on remediation CR
    // creation and fight over the per-node leases, so everything past this
    // point runs only on the elected leader
    wait_for_leadership(&leader_lock(&client, &namespace, &identity)).await;
    let renewal_handle = keep_leadership(leader_lock(&client, &namespace, &identity));

    let controller_handle = {
        let health_state = health_state.clone();
        let controller_client = client.clone();
        // get_opt on a missing ClusterVersion yields "not upgrading", so
        // the checker is safe on vanilla Kubernetes too
        let upgrade_checker = Arc::new(ClusterVersionUpgradeChecker::new(client.clone()));
        tokio::spawn(async move {
            run_controller(controller_client, Some(health_state), upgrade_checker).await;
        })
    };

    let webhook_handle =
        if Path::new(WEBHOOK_CERT_PATH).exists() && Path::new(WEBHOOK_KEY_PATH).exists() {
            info!("TLS certificates found, starting webhook server");
            let webhook_client = client.clone();
            Some(tokio::spawn(async move {
                if let Err(e) =
                    run_webhook_server(webhook_client, WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH).await
                {
                    error!("Webhook server error: {}", e);
                }
            }))
        } else {
            info!("Webhook certificates not found, webhook server disabled");
            None
        };

    // Run until a task dies or a shutdown signal arrives
    tokio::select! {
        result = controller_handle => {
            if let Err(e) = result {
                error!("Controller task panicked: {}", e);
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        result = async {
            match webhook_handle {
                Some(handle) => handle.await,
                None => std::future::pending().await,
            }
        } => {
            if let Err(e) = result {
                error!("Webhook server task panicked: {}", e);
            }
        }
        // The renewal task never returns normally; reaching this branch
        // means it panicked
        Err(e) = renewal_handle => {
            error!("Leadership renewal task panicked: {}", e);
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal");

            // Fail the readiness probe first, then let any reconcile in
            // flight finish its status patch
            health_state.set_ready(false).await;
            info!(
                drain_secs = SHUTDOWN_DRAIN.as_secs(),
                "Draining in-flight reconciliations"
            );
            tokio::time::sleep(SHUTDOWN_DRAIN).await;
        }
    }

    info!("Operator stopped");
    Ok(())
}

/// Identity recorded as the lease holder: the pod name, or the hostname
/// when running outside a pod.
fn pod_identity() -> String {
    std::env::var("POD_NAME").unwrap_or_else(|_| {
        warn!("POD_NAME not set, using hostname");
        hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    })
}

/// Namespace holding the leader lease.
fn operator_namespace() -> String {
    std::env::var("POD_NAMESPACE").unwrap_or_else(|_| {
        warn!("POD_NAMESPACE not set, using 'default'");
        "default".to_string()
    })
}

fn leader_lock(client: &Client, namespace: &str, identity: &str) -> LeaseLock {
    LeaseLock::new(
        client.clone(),
        namespace,
        LeaseLockParams {
            holder_id: identity.to_string(),
            lease_name: LEADER_LEASE_NAME.to_string(),
            lease_ttl: LEADER_LEASE_TTL,
        },
    )
}

/// Block until this instance holds the leader lease.
async fn wait_for_leadership(lock: &LeaseLock) {
    info!("Waiting to acquire leadership...");
    loop {
        match lock.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {
                info!("Acquired leadership");
                return;
            }
            Ok(_) => info!("Another instance is leader, waiting..."),
            Err(e) => warn!("Failed to acquire lease: {}, retrying...", e),
        }
        tokio::time::sleep(LEADER_RENEW_EVERY).await;
    }
}

/// Spawn the renewal loop. A stale leader must not keep annotating or
/// deleting remediation CRs, so losing the lease terminates the process;
/// the restarted pod re-enters the election with no in-memory state to
/// reconcile (everything lives in the NHC status and the CRs).
fn keep_leadership(lock: LeaseLock) -> JoinHandle<()> {
    #[allow(clippy::exit)]
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(LEADER_RENEW_EVERY).await;
            match lock.try_acquire_or_renew().await {
                Ok(result) if result.acquired_lease => {}
                Ok(_) => {
                    error!("Leadership lost, shutting down");
                    std::process::exit(1);
                }
                Err(e) => {
                    error!("Failed to renew leader lease: {}, shutting down", e);
                    std::process::exit(1);
                }
            }
        }
    })
}

/// Resolves on SIGTERM or Ctrl+C. Without these handlers the operator has
/// no clean stop path, so registration failures panic at startup.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
