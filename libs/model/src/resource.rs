//! The application resource document.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LifecycleError;
use crate::types::{Action, Kind, Status};

/// Metadata key stamped with the creation time.
pub const CREATED_AT_KEY: &str = "CreateAt";

/// Route words that cannot be used as resource names.
pub const RESERVED_NAMES: [&str; 3] = ["create", "status", "check"];

/// One managed application instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationResource {
    /// Unique name within the kind, e.g. `mysql-5.7-192.168.19.100`.
    pub name: String,

    /// Set by the control plane from the request path.
    #[serde(default = "default_kind")]
    pub kind: Kind,

    /// Target hosts. Only the first host is managed.
    pub hosts: Vec<Host>,

    pub spec: AppSpec,

    #[serde(default)]
    pub status: ResourceStatus,
}

fn default_kind() -> Kind {
    Kind::Database
}

impl ApplicationResource {
    /// Validate a resource name for use as a store key and path segment.
    pub fn validate_name(name: &str) -> Result<(), LifecycleError> {
        if name.is_empty() {
            return Err(LifecycleError::InvalidArgument(
                "resource name must not be empty".to_string(),
            ));
        }
        if name.contains('/') {
            return Err(LifecycleError::InvalidArgument(format!(
                "resource name must not contain '/': {name}"
            )));
        }
        if RESERVED_NAMES.contains(&name) {
            return Err(LifecycleError::InvalidArgument(format!(
                "resource name is reserved: {name}"
            )));
        }
        Ok(())
    }

    /// The host the agent runs on.
    pub fn primary_host(&self) -> Option<&Host> {
        self.hosts.first()
    }
}

/// A target host and its login credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub ip: String,

    /// `auth[0]` is the user the agent runs as; an optional `auth[1]` is a
    /// separate SSH login used only during bootstrap.
    #[serde(default)]
    pub auth: Vec<Credential>,
}

impl Host {
    /// The user the agent runs as.
    pub fn agent_login(&self) -> Option<&Credential> {
        self.auth.first()
    }

    /// The login used to reach the host over SSH.
    pub fn ssh_login(&self) -> Option<&Credential> {
        self.auth.get(1).or_else(|| self.auth.first())
    }
}

/// Username/password pair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// What to install and how to drive it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSpec {
    /// Base URL the agent fetches scripts from, e.g. `http://192.168.19.101:8080/`.
    pub repo_url: String,

    #[serde(default)]
    pub scripts: ScriptSet,

    /// Package file name passed to scripts as `PACKAGE`.
    #[serde(default)]
    pub package: String,

    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Script file name per action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptSet {
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
}

impl ScriptSet {
    pub fn for_action(&self, action: Action) -> &str {
        match action {
            Action::Install => &self.install,
            Action::Start => &self.start,
            Action::Stop => &self.stop,
            Action::Restart => &self.restart,
            Action::Uninstall => &self.uninstall,
            Action::Check => &self.check,
        }
    }
}

/// Desired and observed lifecycle state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStatus {
    pub expect: Status,
    pub realtime: Status,

    /// Incremented on every dispatched transition.
    #[serde(default)]
    pub generation: u64,

    /// Identifies the transition flow in progress. A completing flow only
    /// applies its outcome while this still holds its id, which also holds
    /// across a delete and recreate under the same name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<Uuid>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action: Option<Action>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}
