//! hostpilot agent
//!
//! Serves the action API and, once an application has been installed, keeps
//! its health check loop running. A loop saved by a previous run is resumed
//! at startup.

use std::sync::Arc;

use anyhow::{Context, Result};
use hostpilot_agent::{
    api,
    config::Config,
    health::{HealthChecker, HttpHealthReporter, ScriptCheckRunner},
    scripts::{HttpScriptSource, ScriptResolver},
    ActionHandler,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        listen_addr = %config.listen_addr,
        work_dir = %config.work_dir.display(),
        "Starting hostpilot agent"
    );

    let checker = Arc::new(HealthChecker::new(
        &config.work_dir,
        Arc::new(ScriptCheckRunner),
        Arc::new(HttpHealthReporter::new(config.http_timeout).context("health reporter")?),
    ));
    match checker.resume().await {
        Ok(true) => info!("Health check loop resumed"),
        Ok(false) => {}
        Err(e) => warn!(error = %e, "Could not resume health check loop"),
    }

    let resolver = ScriptResolver::new(
        &config.work_dir,
        Arc::new(HttpScriptSource::new(config.http_timeout).context("script source")?),
    );
    let handler = Arc::new(ActionHandler::new(resolver, Arc::clone(&checker)));

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "Agent API listening");

    let served = axum::serve(listener, api::router(handler))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Received shutdown signal");
        })
        .await;

    checker.stop().await;

    served.context("agent server")?;
    info!("Agent shutdown complete");
    Ok(())
}
