//! Agent dispatch.
//!
//! Sends lifecycle actions to a host's agent over HTTP. Connectivity failures
//! (the agent is not listening yet, or the host is unreachable) are retried
//! on a doubling schedule; anything the agent answers with is final.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hostpilot_model::{Action, AgentActionRequest, ApplicationResource, LifecycleError};
use hostpilot_reconcile::RetrySchedule;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Longest agent error body carried into a `DispatchError`.
pub const MAX_ERROR_BODY: usize = 512;

// =============================================================================
// Transport
// =============================================================================

/// Raw agent response.
#[derive(Debug, Clone)]
pub struct AgentResponse {
    pub status: u16,
    pub body: String,
}

/// Transport-level failure, classified for retry.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// No connection could be established.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The request failed after the connection was made.
    #[error("request failed: {0}")]
    Request(String),
}

/// How actions reach an agent.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn post_action(
        &self,
        url: &str,
        request: &AgentActionRequest,
    ) -> Result<AgentResponse, TransportError>;
}

/// reqwest-backed transport.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// `timeout` bounds a whole request, including script execution on the agent.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AgentTransport for HttpTransport {
    async fn post_action(
        &self,
        url: &str,
        request: &AgentActionRequest,
    ) -> Result<AgentResponse, TransportError> {
        let classify = |e: reqwest::Error| {
            if e.is_connect() {
                TransportError::Connect(e.to_string())
            } else {
                TransportError::Request(e.to_string())
            }
        };

        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(classify)?;
        let status = response.status().as_u16();
        let body = read_prefix(response, MAX_ERROR_BODY).await;
        Ok(AgentResponse { status, body })
    }
}

/// Read at most `limit` bytes of the body. The rest is never buffered.
async fn read_prefix(mut response: reqwest::Response, limit: usize) -> String {
    let mut buf = Vec::new();
    while buf.len() < limit {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let take = chunk.len().min(limit - buf.len());
                buf.extend_from_slice(&chunk[..take]);
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "Failed reading agent response body");
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Dispatch errors.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no {0} script configured")]
    MissingScript(Action),

    #[error("agent at {url} unreachable after {attempts} attempts: {message}")]
    Connectivity {
        url: String,
        attempts: u32,
        message: String,
    },

    #[error("agent rejected {action} with status {status}: {message}")]
    Rejected {
        action: Action,
        status: u16,
        message: String,
    },

    #[error("agent request failed: {0}")]
    Transport(String),
}

impl From<DispatchError> for LifecycleError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::MissingScript(_) => LifecycleError::InvalidArgument(err.to_string()),
            DispatchError::Connectivity { .. } => LifecycleError::Connectivity(err.to_string()),
            DispatchError::Rejected { .. } | DispatchError::Transport(_) => {
                LifecycleError::RemoteExecution(err.to_string())
            }
        }
    }
}

/// Dispatcher settings.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub agent_port: u16,
    /// Where agents send health reports.
    pub operator_ip: String,
    pub operator_port: u16,
    pub retry: RetrySchedule,
}

/// Sends lifecycle actions to agents.
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn AgentTransport>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn AgentTransport>, config: DispatchConfig) -> Self {
        Self { transport, config }
    }

    /// Ask the agent on `host_ip` to run `action` for `resource`.
    #[instrument(skip(self, resource), fields(name = %resource.name))]
    pub async fn send_action(
        &self,
        host_ip: &str,
        action: Action,
        resource: &ApplicationResource,
    ) -> Result<(), DispatchError> {
        let request = AgentActionRequest::from_resource(
            resource,
            self.config.operator_ip.clone(),
            self.config.operator_port,
        );
        if request.script_for(action).is_empty() {
            return Err(DispatchError::MissingScript(action));
        }

        let url = format!("http://{}:{}/{}", host_ip, self.config.agent_port, action);
        debug!(url = %url, "Dispatching action to agent");

        let mut retry = 0;
        loop {
            match self.transport.post_action(&url, &request).await {
                Ok(response) if response.status == 200 => {
                    info!(url = %url, "Agent completed action");
                    return Ok(());
                }
                Ok(response) => {
                    warn!(url = %url, status = response.status, "Agent rejected action");
                    return Err(DispatchError::Rejected {
                        action,
                        status: response.status,
                        message: truncate_utf8(&response.body, MAX_ERROR_BODY).to_string(),
                    });
                }
                Err(TransportError::Connect(message)) => {
                    let Some(delay) = self.config.retry.delay_before_retry(retry) else {
                        return Err(DispatchError::Connectivity {
                            url,
                            attempts: retry + 1,
                            message,
                        });
                    };
                    warn!(
                        url = %url,
                        attempt = retry + 1,
                        delay_secs = delay.as_secs(),
                        error = %message,
                        "Agent unreachable, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(TransportError::Request(message)) => {
                    return Err(DispatchError::Transport(message));
                }
            }
        }
    }
}

/// Longest prefix of `s` that fits in `max` bytes on a char boundary.
fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
