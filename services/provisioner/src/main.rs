//! Loom Multi-Tenant Provisioner
//!
//! Keeps per-tenant worker pools alive on this host and reports capacity
//! to the Loom server.
//!
//! ## Architecture
//!
//! - **Registry**: Tracks tenant managers and routes add/update/delete
//! - **Heartbeat Loop**: Registers with the server and reports capacity
//! - **Status Loop**: Periodic health pass that restarts dead workers
//! - **Operator API**: HTTP endpoints for tenant management
//! - **Runtime**: Worker processes in prod, in-process mock in dev

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use loom_provisioner::api::{self, AppState};
use loom_provisioner::client::{Registration, ServerClient};
use loom_provisioner::config::Config;
use loom_provisioner::heartbeat;
use loom_provisioner::process::{ProcessRuntime, ProcessRuntimeConfig};
use loom_provisioner::tenant::{PoolFactory, RestartPolicy};
use loom_provisioner::{MockRuntime, ProvisionerId, ProvisionerRegistry, WorkerRuntime};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting Loom provisioner");

    let provisioner_id = ProvisionerId::detect()?;
    info!(
        provisioner_id = %provisioner_id,
        server_uri = %config.server_uri,
        listen_addr = %config.listen_addr,
        capacity = config.capacity_total,
        "Configuration loaded"
    );

    // Create the worker runtime
    let runtime: Arc<dyn WorkerRuntime> = match &config.worker_command {
        Some(command) => {
            let runtime_config =
                ProcessRuntimeConfig::from_command_line(command, &config.server_uri)?;
            info!(program = ?runtime_config.program, "Using process worker runtime");
            Arc::new(ProcessRuntime::new(runtime_config))
        }
        None => {
            warn!("LOOM_WORKER_COMMAND not set, using mock worker runtime");
            Arc::new(MockRuntime::new())
        }
    };

    let registry = Arc::new(ProvisionerRegistry::new(
        provisioner_id.clone(),
        config.registry_settings(),
    ));
    let factory = PoolFactory::new(runtime, RestartPolicy::default());

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start the heartbeat loop
    let registration = Registration {
        id: provisioner_id.clone(),
        host: provisioner_id.host().to_string(),
        port: config.listen_addr.port(),
        capacity_total: config.capacity_total,
    };
    let client = ServerClient::new(&config, provisioner_id)?;
    let heartbeat_handle = tokio::spawn(heartbeat::run_heartbeat_loop(
        client,
        registration,
        Arc::clone(&registry),
        Duration::from_secs(config.heartbeat_interval_secs),
        shutdown_rx.clone(),
    ));

    // Start the health pass loop
    let status_handle = tokio::spawn(heartbeat::run_status_loop(
        Arc::clone(&registry),
        Duration::from_secs(config.status_interval_secs),
        shutdown_rx.clone(),
    ));

    // Start the operator API
    let app = api::create_router(AppState {
        registry: Arc::clone(&registry),
        factory,
    });
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!(listen_addr = %config.listen_addr, "Operator API listening");

    let mut api_handle = tokio::spawn({
        let mut shutdown_rx = shutdown_rx.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.wait_for(|stop| *stop).await;
                })
                .await
        }
    });

    // Wait for shutdown signal, or for any long-running task to stop
    let mut api_stopped = false;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = heartbeat_handle => {
            match result {
                Ok(Ok(())) => info!("Heartbeat loop exited normally"),
                Ok(Err(e)) => error!(error = %e, "Heartbeat loop error"),
                Err(e) => error!(error = %e, "Heartbeat task panicked"),
            }
        }
        _ = status_handle => {
            info!("Status loop exited");
        }
        result = &mut api_handle => {
            api_stopped = true;
            log_api_exit(result);
        }
    }

    // Signal shutdown to all loops
    let _ = shutdown_tx.send(true);

    if !api_stopped {
        log_api_exit(api_handle.await);
    }

    // Tear down every tenant's workers
    registry.shutdown().await;

    info!("Provisioner shutdown complete");
    Ok(())
}

fn log_api_exit(result: Result<std::io::Result<()>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => info!("Operator API stopped"),
        Ok(Err(e)) => error!(error = %e, "Operator API error"),
        Err(e) => error!(error = %e, "Operator API task panicked"),
    }
}
