//! Lifecycle action handling.

use std::sync::Arc;

use hostpilot_model::{Action, AgentActionRequest, CheckParams};
use thiserror::Error;
use tracing::{info, instrument};

use crate::exec::{self, ExecError};
use crate::health::{CheckParamsError, HealthChecker};
use crate::scripts::{ScriptError, ScriptResolver};

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    CheckParams(#[from] CheckParamsError),
}

impl ActionError {
    /// Whether the request itself was at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ActionError::InvalidArgument(_) | ActionError::Script(ScriptError::InvalidName(_))
        )
    }
}

/// Runs lifecycle scripts for the application this agent manages.
pub struct ActionHandler {
    resolver: ScriptResolver,
    checker: Arc<HealthChecker>,
}

impl ActionHandler {
    pub fn new(resolver: ScriptResolver, checker: Arc<HealthChecker>) -> Self {
        Self { resolver, checker }
    }

    /// Run `action` for `request`.
    ///
    /// `check` returns once the health check loop is started; every other
    /// action returns after its script exits.
    #[instrument(skip(self, request), fields(name = %request.name, kind = %request.kind))]
    pub async fn handle(&self, action: Action, request: &AgentActionRequest) -> Result<(), ActionError> {
        let script_name = request.script_for(action);
        if script_name.is_empty() {
            return Err(ActionError::InvalidArgument(format!(
                "no {action} script configured"
            )));
        }

        let script_path = self.resolver.resolve(script_name, &request.repo_url).await?;
        let work_dir = self.resolver.work_dir();
        let args = request.script_args();

        if action == Action::Check {
            let params = CheckParams {
                name: request.name.clone(),
                kind: request.kind,
                operator_ip: request.operator_ip.clone(),
                operator_port: request.operator_port,
                work_dir: work_dir.display().to_string(),
                script_path: script_path.display().to_string(),
                args,
            };
            let started = self.checker.start(params).await?;
            info!(started, "Health check requested");
            return Ok(());
        }

        info!(script = %script_path.display(), "Running lifecycle script");
        exec::run_script(&script_path, &args, work_dir, None).await?;

        if action == Action::Uninstall {
            self.checker.forget().await?;
            info!("Health check loop stopped after uninstall");
        }

        info!("Lifecycle script finished");
        Ok(())
    }
}
