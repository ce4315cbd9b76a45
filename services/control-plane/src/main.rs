//! hostpilot control plane
//!
//! Tracks desired vs. actual lifecycle state of managed applications and
//! drives hosts toward the desired state through their agents.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use hostpilot_control_plane::{
    api,
    bootstrap::{BootstrapConfig, Bootstrapper, SshConnector},
    cleanup::{CleanupWorker, CleanupWorkerConfig},
    config,
    dispatch::{DispatchConfig, Dispatcher, HttpTransport},
    lifecycle::{Lifecycle, LifecycleConfig},
    state::AppState,
    store::{KindStores, KvStore, MemoryStore, SqliteStore},
};
use hostpilot_reconcile::{DISPATCH_RETRY, SSH_PROBE_RETRY};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SSH_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Prefer RUST_LOG, fall back to HOSTPILOT_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting hostpilot control plane");
    info!(listen_addr = %config.listen_addr, "Configuration loaded");

    let kv: Arc<dyn KvStore> = match &config.store_path {
        Some(path) => match SqliteStore::open(path) {
            Ok(store) => {
                info!(path = %path.display(), "Opened SQLite store");
                Arc::new(store)
            }
            Err(e) => {
                error!(error = %e, path = %path.display(), "Failed to open store");
                return Err(e.into());
            }
        },
        None => {
            warn!("HOSTPILOT_STORE_PATH unset, state is kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };
    let stores = KindStores::new(
        kv,
        &config.database_prefix,
        &config.middleware_prefix,
        &config.changed_subprefix,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dispatcher = Dispatcher::new(
        Arc::new(HttpTransport::new(config.dispatch_timeout)?),
        DispatchConfig {
            agent_port: config.agent_port,
            operator_ip: config.operator_ip.clone(),
            operator_port: config.operator_port,
            retry: DISPATCH_RETRY,
        },
    );
    let bootstrapper = Bootstrapper::new(
        Arc::new(SshConnector::new(SSH_CONNECT_TIMEOUT, &config.remote_tmp)),
        BootstrapConfig {
            bundle_dir: config.bundle_dir.clone(),
            bundle_name: config.bundle_name.clone(),
            remote_tmp: config.remote_tmp.clone(),
            ssh_port: config.ssh_port,
            probe: SSH_PROBE_RETRY,
        },
    );
    let lifecycle = Lifecycle::new(
        stores.clone(),
        dispatcher,
        bootstrapper,
        LifecycleConfig {
            agent_start_delay: config.agent_start_delay,
        },
        shutdown_rx.clone(),
    );

    // Start cleanup worker in background
    let cleanup_worker = CleanupWorker::new(
        stores,
        CleanupWorkerConfig {
            retention_days: config.changed_retention_days,
            ..Default::default()
        },
    );
    let cleanup_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            cleanup_worker.run(shutdown_rx).await;
        }
    });

    let app = api::create_router(AppState::new(lifecycle));

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    // Spawn the server with graceful shutdown
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to shut down...");
    if let Err(e) = tokio::time::timeout(Duration::from_secs(10), cleanup_handle).await {
        warn!(error = %e, "Cleanup worker did not shut down in time");
    }

    info!("Control plane shutdown complete");
    Ok(())
}
