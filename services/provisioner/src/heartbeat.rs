//! Background loops: capacity heartbeats and health passes.
//!
//! The provisioner sends periodic heartbeats to the server to:
//! - Indicate the provisioner is alive
//! - Report total capacity and the workers each tenant uses
//!
//! A separate loop runs the registry health pass so dead workers are
//! restarted even when nobody asks for status.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::client::{HeartbeatOutcome, Registration, ServerClient};
use crate::registry::ProvisionerRegistry;

/// Run the heartbeat loop until shutdown.
///
/// Registration is retried on every tick until it succeeds, and repeated
/// whenever the server stops recognizing this provisioner.
pub async fn run_heartbeat_loop(
    client: ServerClient,
    registration: Registration,
    registry: Arc<ProvisionerRegistry>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    info!(
        provisioner_id = %registry.provisioner_id(),
        interval_secs = interval.as_secs(),
        "Starting heartbeat loop"
    );

    let mut registered = false;
    let mut consecutive_failures = 0u32;
    let mut interval_timer = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = interval_timer.tick() => {
                if !registered {
                    match client.register(&registration).await {
                        Ok(()) => {
                            info!(capacity = registration.capacity_total, "Registered with server");
                            registered = true;
                        }
                        Err(e) => {
                            warn!(error = %e, "Registration failed, will retry");
                            continue;
                        }
                    }
                }

                let report = registry.heartbeat().await;
                let used = report.used_total();

                match client.send_heartbeat(&report).await {
                    Ok(HeartbeatOutcome::Accepted) => {
                        consecutive_failures = 0;
                        debug!(
                            total = report.total,
                            used,
                            tenants = report.used.len(),
                            "Heartbeat acknowledged"
                        );
                    }
                    Ok(HeartbeatOutcome::Unregistered) => {
                        warn!("Server does not recognize this provisioner, re-registering");
                        registered = false;
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        if consecutive_failures <= 3 {
                            warn!(error = %e, consecutive_failures, "Heartbeat failed");
                        } else {
                            error!(error = %e, consecutive_failures, "Heartbeat failed repeatedly");
                        }
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Heartbeat loop shutting down");
                    break;
                }
            }
        }
    }

    Ok(())
}

/// Run the health pass loop until shutdown.
pub async fn run_status_loop(
    registry: Arc<ProvisionerRegistry>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval_timer = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = interval_timer.tick() => {
                let report = registry.status().await;

                for tenant in report.tenants.iter().filter(|t| !t.is_healthy()) {
                    warn!(
                        tenant_id = %tenant.tenant_id,
                        desired = tenant.desired,
                        running = tenant.running,
                        degraded = tenant.degraded.len(),
                        "Tenant worker pool is not at full strength"
                    );
                }
                for failure in &report.failures {
                    error!(
                        tenant_id = %failure.tenant_id,
                        error = %failure.error,
                        "Tenant health check failed"
                    );
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Status loop shutting down");
                    break;
                }
            }
        }
    }
}
