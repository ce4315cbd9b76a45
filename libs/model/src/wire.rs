//! Wire payloads exchanged between the control plane and the agent.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::resource::ApplicationResource;
use crate::types::{Action, Kind};

/// Metadata key carrying the script repository URL.
pub const REPO_URL_KEY: &str = "REPO_URL";

/// Metadata key carrying the package file name.
pub const PACKAGE_KEY: &str = "PACKAGE";

/// Health report code meaning "healthy".
pub const HEALTHY_CODE: &str = "0";

/// Everything the agent needs to drive one application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentActionRequest {
    pub name: String,
    pub kind: Kind,
    /// Where the agent sends health reports.
    pub operator_ip: String,
    pub operator_port: u16,
    pub repo_url: String,
    #[serde(default)]
    pub install: String,
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub stop: String,
    #[serde(default)]
    pub restart: String,
    #[serde(default)]
    pub uninstall: String,
    #[serde(default)]
    pub check: String,
    #[serde(default)]
    pub package: String,
    /// Passed to every script as `key=value` arguments.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl AgentActionRequest {
    /// Build a request for `resource`, injecting `REPO_URL` and `PACKAGE`
    /// into the metadata when absent.
    pub fn from_resource(
        resource: &ApplicationResource,
        operator_ip: impl Into<String>,
        operator_port: u16,
    ) -> Self {
        let spec = &resource.spec;
        let mut metadata = spec.metadata.clone();
        metadata
            .entry(REPO_URL_KEY.to_string())
            .or_insert_with(|| spec.repo_url.clone());
        metadata
            .entry(PACKAGE_KEY.to_string())
            .or_insert_with(|| spec.package.clone());

        Self {
            name: resource.name.clone(),
            kind: resource.kind,
            operator_ip: operator_ip.into(),
            operator_port,
            repo_url: spec.repo_url.clone(),
            install: spec.scripts.install.clone(),
            start: spec.scripts.start.clone(),
            stop: spec.scripts.stop.clone(),
            restart: spec.scripts.restart.clone(),
            uninstall: spec.scripts.uninstall.clone(),
            check: spec.scripts.check.clone(),
            package: spec.package.clone(),
            metadata,
        }
    }

    /// Script file name for `action`.
    pub fn script_for(&self, action: Action) -> &str {
        match action {
            Action::Install => &self.install,
            Action::Start => &self.start,
            Action::Stop => &self.stop,
            Action::Restart => &self.restart,
            Action::Uninstall => &self.uninstall,
            Action::Check => &self.check,
        }
    }

    /// Metadata rendered as a single `k1=v1 k2=v2` argument string.
    ///
    /// Map iteration order is unspecified; scripts must not depend on it.
    pub fn script_args(&self) -> String {
        self.metadata
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Health check loop parameters, persisted by the agent so the loop can be
/// resumed after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckParams {
    pub name: String,
    pub kind: Kind,
    pub operator_ip: String,
    pub operator_port: u16,
    pub work_dir: String,
    pub script_path: String,
    pub args: String,
}

impl CheckParams {
    /// Control plane endpoint receiving health reports for this application.
    pub fn report_url(&self) -> String {
        format!(
            "http://{}:{}/apis/v1alpha1/{}/{}/check",
            self.operator_ip, self.operator_port, self.kind, self.name
        )
    }
}

/// Output of a check script, e.g. `{"code": "0", "msg": "ok"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub code: String,
    pub msg: String,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.code == HEALTHY_CODE
    }
}

/// Agent success body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentReply {
    pub msg: String,
}

/// Agent error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentErrorReply {
    pub error: String,
}
