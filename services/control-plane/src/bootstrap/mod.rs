//! Agent bootstrap over SSH.
//!
//! Before the first install on a host, the control plane copies the agent
//! bundle to the host and starts the agent as the application's user. The
//! host may still be booting, so connection attempts are retried on a fixed
//! schedule; once connected, every failure is final.

mod ssh;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use hostpilot_model::{Credential, Host, LifecycleError};
use hostpilot_reconcile::RetrySchedule;
use thiserror::Error;
use tracing::{info, instrument, warn};

pub use ssh::SshConnector;
use ssh::shell_quote;

// =============================================================================
// Remote execution seam
// =============================================================================

/// Remote transport errors.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The host could not be reached. Retryable.
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("authentication failed for user {0}")]
    Auth(String),

    #[error("failed to read {}: {source}", path.display())]
    LocalFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("remote command exited with status {status:?}: {output}")]
    Exit { status: Option<u32>, output: String },

    #[error("ssh error: {0}")]
    Protocol(String),
}

/// Opens sessions to remote hosts.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        login: &Credential,
    ) -> Result<Box<dyn RemoteSession>, RemoteError>;
}

/// An authenticated session on one host.
#[async_trait]
pub trait RemoteSession: Send {
    /// Copy a local file to `remote_path`.
    async fn upload(&mut self, local_path: &Path, remote_path: &str) -> Result<(), RemoteError>;

    /// Run `command` and return its combined output. With `run_as`, the
    /// command runs as that user instead of the login user.
    async fn exec(&mut self, command: &str, run_as: Option<&Credential>)
        -> Result<String, RemoteError>;

    async fn close(&mut self) -> Result<(), RemoteError>;
}

// =============================================================================
// Bootstrapper
// =============================================================================

/// Bootstrap errors.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("host {0} has no credentials")]
    MissingCredentials(String),

    #[error("host {host} unreachable over ssh after {attempts} attempts: {source}")]
    Unreachable {
        host: String,
        attempts: u32,
        #[source]
        source: RemoteError,
    },

    #[error("ssh login to {host} failed: {source}")]
    Login {
        host: String,
        #[source]
        source: RemoteError,
    },

    #[error("uploading agent bundle failed: {0}")]
    Upload(#[source] RemoteError),

    #[error("starting agent failed: {0}")]
    Launch(#[source] RemoteError),
}

impl From<BootstrapError> for LifecycleError {
    fn from(err: BootstrapError) -> Self {
        match err {
            BootstrapError::MissingCredentials(_) => {
                LifecycleError::InvalidArgument(err.to_string())
            }
            BootstrapError::Unreachable { .. } => LifecycleError::Connectivity(err.to_string()),
            BootstrapError::Login { .. }
            | BootstrapError::Upload(_)
            | BootstrapError::Launch(_) => LifecycleError::RemoteExecution(err.to_string()),
        }
    }
}

/// Bootstrap settings.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Local directory holding the agent bundle.
    pub bundle_dir: PathBuf,
    pub bundle_name: String,
    /// Remote directory the bundle is copied to and unpacked in.
    pub remote_tmp: String,
    pub ssh_port: u16,
    pub probe: RetrySchedule,
}

/// Installs and starts the agent on hosts.
#[derive(Clone)]
pub struct Bootstrapper {
    connector: Arc<dyn RemoteConnector>,
    config: BootstrapConfig,
}

impl Bootstrapper {
    pub fn new(connector: Arc<dyn RemoteConnector>, config: BootstrapConfig) -> Self {
        Self { connector, config }
    }

    /// Copy the agent bundle to `host` and start the agent as `auth[0]`.
    #[instrument(skip(self, host), fields(host = %host.ip))]
    pub async fn install(&self, host: &Host) -> Result<(), BootstrapError> {
        let (Some(agent), Some(login)) = (host.agent_login(), host.ssh_login()) else {
            return Err(BootstrapError::MissingCredentials(host.ip.clone()));
        };

        let mut session = self.connect_with_retry(&host.ip, login).await?;
        let result = self.deploy(session.as_mut(), login, agent).await;
        if let Err(e) = session.close().await {
            warn!(error = %e, "Failed to close ssh session");
        }
        result
    }

    async fn connect_with_retry(
        &self,
        ip: &str,
        login: &Credential,
    ) -> Result<Box<dyn RemoteSession>, BootstrapError> {
        let mut retry = 0;
        loop {
            match self.connector.connect(ip, self.config.ssh_port, login).await {
                Ok(session) => return Ok(session),
                Err(RemoteError::Connect(message)) => {
                    let Some(delay) = self.config.probe.delay_before_retry(retry) else {
                        return Err(BootstrapError::Unreachable {
                            host: ip.to_string(),
                            attempts: retry + 1,
                            source: RemoteError::Connect(message),
                        });
                    };
                    warn!(
                        attempt = retry + 1,
                        max_attempts = self.config.probe.max_attempts,
                        error = %message,
                        "SSH not reachable yet, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(source) => {
                    return Err(BootstrapError::Login {
                        host: ip.to_string(),
                        source,
                    })
                }
            }
        }
    }

    async fn deploy(
        &self,
        session: &mut dyn RemoteSession,
        login: &Credential,
        agent: &Credential,
    ) -> Result<(), BootstrapError> {
        let remote_tmp = self.config.remote_tmp.trim_end_matches('/');
        let local_bundle = self.config.bundle_dir.join(&self.config.bundle_name);
        let remote_bundle = format!("{remote_tmp}/{}", self.config.bundle_name);

        session
            .upload(&local_bundle, &remote_bundle)
            .await
            .map_err(BootstrapError::Upload)?;
        info!(remote = %remote_bundle, "Uploaded agent bundle");

        let run_as = (agent.username != login.username).then_some(agent);
        let launch = format!(
            "tar -xzf {} -C {} && sh {}",
            shell_quote(&remote_bundle),
            shell_quote(&format!("{remote_tmp}/")),
            shell_quote(&format!("{remote_tmp}/agent/agent.sh")),
        );
        let output = session
            .exec(&launch, run_as)
            .await
            .map_err(BootstrapError::Launch)?;
        info!(user = %agent.username, output = %output.trim(), "Agent started");

        Ok(())
    }
}
