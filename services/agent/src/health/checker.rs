//! The health check loop and its handle.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hostpilot_model::{CheckParams, HealthReport};
use hostpilot_reconcile::{
    ExponentialBackoff, LinearBackoff, HEALTH_EXEC_CAP, HEALTH_INITIAL_PERIOD, HEALTH_REPORT_CAP,
    HEALTH_REPORT_STEP,
};
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::params::{self, CheckParamsError};
use super::payload::extract_report;
use crate::exec::{self, ExecError, OutputCapture};

// =============================================================================
// Seams
// =============================================================================

/// Runs the check script once and returns what it printed.
#[async_trait]
pub trait CheckRunner: Send + Sync {
    async fn run_check(&self, params: &CheckParams) -> Result<String, ExecError>;
}

/// Runs the check script with `sh` in the saved work directory.
pub struct ScriptCheckRunner;

#[async_trait]
impl CheckRunner for ScriptCheckRunner {
    async fn run_check(&self, params: &CheckParams) -> Result<String, ExecError> {
        let capture = OutputCapture::new();
        exec::run_script(
            Path::new(&params.script_path),
            &params.args,
            Path::new(&params.work_dir),
            Some(&capture),
        )
        .await?;
        Ok(capture.contents().await)
    }
}

#[derive(Debug, Error)]
#[error("health report to {url} failed: {message}")]
pub struct ReportError {
    pub url: String,
    pub message: String,
}

/// Delivers a report to the control plane, returning the HTTP status.
#[async_trait]
pub trait HealthReporter: Send + Sync {
    async fn report(&self, url: &str, report: &HealthReport) -> Result<u16, ReportError>;
}

pub struct HttpHealthReporter {
    client: reqwest::Client,
}

impl HttpHealthReporter {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthReporter for HttpHealthReporter {
    async fn report(&self, url: &str, report: &HealthReport) -> Result<u16, ReportError> {
        let response = self
            .client
            .put(url)
            .json(report)
            .send()
            .await
            .map_err(|e| ReportError {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        Ok(response.status().as_u16())
    }
}

// =============================================================================
// Handle
// =============================================================================

struct RunningLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Owns the agent's single health check loop.
pub struct HealthChecker {
    work_dir: PathBuf,
    runner: Arc<dyn CheckRunner>,
    reporter: Arc<dyn HealthReporter>,
    running: Mutex<Option<RunningLoop>>,
}

impl HealthChecker {
    pub fn new(
        work_dir: impl Into<PathBuf>,
        runner: Arc<dyn CheckRunner>,
        reporter: Arc<dyn HealthReporter>,
    ) -> Self {
        Self {
            work_dir: work_dir.into(),
            runner,
            reporter,
            running: Mutex::new(None),
        }
    }

    /// Persist `params` and start the loop.
    ///
    /// Returns `false` without touching anything if a loop is already running.
    pub async fn start(&self, params: CheckParams) -> Result<bool, CheckParamsError> {
        let mut running = self.running.lock().await;
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            debug!(name = %params.name, "Health check loop already running");
            return Ok(false);
        }

        params::save(&self.work_dir, &params).await?;
        *running = Some(self.spawn(params));
        Ok(true)
    }

    /// Restart the loop from `checkInfo.json`, if one was saved.
    pub async fn resume(&self) -> Result<bool, CheckParamsError> {
        let Some(params) = params::load(&self.work_dir).await? else {
            debug!("No saved health check parameters");
            return Ok(false);
        };

        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(false);
        }
        info!(name = %params.name, kind = %params.kind, "Resuming health check loop");
        *running = Some(self.spawn(params));
        Ok(true)
    }

    /// Stop the loop and wait for it to exit. Saved parameters are kept so
    /// the next agent start resumes it.
    pub async fn stop(&self) -> bool {
        let Some(running) = self.running.lock().await.take() else {
            return false;
        };
        let _ = running.shutdown.send(true);
        if let Err(e) = running.handle.await {
            warn!(error = %e, "Health check loop task failed");
        }
        true
    }

    /// Stop the loop and delete the saved parameters.
    pub async fn forget(&self) -> Result<(), CheckParamsError> {
        self.stop().await;
        params::remove(&self.work_dir).await
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    fn spawn(&self, params: CheckParams) -> RunningLoop {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let health_loop = HealthLoop {
            params,
            runner: self.runner.clone(),
            reporter: self.reporter.clone(),
        };
        let handle = tokio::spawn(async move { health_loop.run(shutdown_rx).await });
        RunningLoop { shutdown, handle }
    }
}

// =============================================================================
// Loop
// =============================================================================

struct HealthLoop {
    params: CheckParams,
    runner: Arc<dyn CheckRunner>,
    reporter: Arc<dyn HealthReporter>,
}

impl HealthLoop {
    #[instrument(skip_all, fields(name = %self.params.name, kind = %self.params.kind))]
    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let url = self.params.report_url();
        let mut exec_period = ExponentialBackoff::new(HEALTH_INITIAL_PERIOD, HEALTH_EXEC_CAP);
        let mut report_period =
            LinearBackoff::new(HEALTH_INITIAL_PERIOD, HEALTH_REPORT_STEP, HEALTH_REPORT_CAP);

        info!(url = %url, "Health check loop started");

        loop {
            let wait = tokio::select! {
                wait = self.tick(&url, &mut exec_period, &mut report_period) => wait,
                _ = shutdown.changed() => break,
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Health check loop stopped");
    }

    /// One check-and-report round. Returns how long to sleep afterwards.
    async fn tick(
        &self,
        url: &str,
        exec_period: &mut ExponentialBackoff,
        report_period: &mut LinearBackoff,
    ) -> Duration {
        let output = match self.runner.run_check(&self.params).await {
            Ok(output) => output,
            Err(e) => {
                let period = exec_period.on_failure();
                warn!(error = %e, wait_secs = period.as_secs(), "Check script failed");
                return period;
            }
        };

        let Some(report) = extract_report(&output) else {
            let period = exec_period.current();
            warn!(output = %output.trim(), wait_secs = period.as_secs(), "Check output has no valid report");
            return period;
        };
        exec_period.reset();

        match self.reporter.report(url, &report).await {
            Ok(status) if status == StatusCode::ACCEPTED.as_u16() => {
                report_period.reset();
                debug!(code = %report.code, "Health report accepted");
            }
            Ok(status) => {
                let period = report_period.on_failure();
                warn!(status, wait_secs = period.as_secs(), "Health report rejected");
            }
            Err(e) => {
                let period = report_period.on_failure();
                warn!(error = %e, wait_secs = period.as_secs(), "Health report failed");
            }
        }
        report_period.current()
    }
}
