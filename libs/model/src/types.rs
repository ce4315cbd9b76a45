//! Closed enums for kinds, statuses and actions.
//!
//! Every enum serializes to the same lowercase/kebab-case string it parses
//! from, so path segments, JSON bodies and store documents agree.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

// =============================================================================
// Kind
// =============================================================================

/// Category of managed application. Each kind has its own store namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Database,
    Middleware,
}

impl Kind {
    pub const ALL: [Kind; 2] = [Kind::Database, Kind::Middleware];

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Database => "database",
            Kind::Middleware => "middleware",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "database" => Ok(Kind::Database),
            "middleware" => Ok(Kind::Middleware),
            other => Err(ParseError::new("kind", other)),
        }
    }
}

// =============================================================================
// Status
// =============================================================================

/// Lifecycle status of a managed application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    #[default]
    NotInstalled,
    Installing,
    Running,
    Starting,
    Stopping,
    Stopped,
    Restarting,
    Failed,
    Unknown,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::NotInstalled => "not-installed",
            Status::Installing => "installing",
            Status::Running => "running",
            Status::Starting => "starting",
            Status::Stopping => "stopping",
            Status::Stopped => "stopped",
            Status::Restarting => "restarting",
            Status::Failed => "failed",
            Status::Unknown => "unknown",
        }
    }

    /// Returns true for the interim statuses held while an action is in flight.
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            Status::Installing | Status::Starting | Status::Stopping | Status::Restarting
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not-installed" => Ok(Status::NotInstalled),
            "installing" => Ok(Status::Installing),
            "running" => Ok(Status::Running),
            "starting" => Ok(Status::Starting),
            "stopping" => Ok(Status::Stopping),
            "stopped" => Ok(Status::Stopped),
            "restarting" => Ok(Status::Restarting),
            "failed" => Ok(Status::Failed),
            "unknown" => Ok(Status::Unknown),
            other => Err(ParseError::new("status", other)),
        }
    }
}

// =============================================================================
// ExpectRequest
// =============================================================================

/// An expect value a caller may request.
///
/// `Restart` is not a status: it asks for a restart of a running application
/// and is stored as `Running` once accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExpectRequest {
    NotInstalled,
    Running,
    Stopped,
    Restart,
}

impl ExpectRequest {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpectRequest::NotInstalled => "not-installed",
            ExpectRequest::Running => "running",
            ExpectRequest::Stopped => "stopped",
            ExpectRequest::Restart => "restart",
        }
    }

    /// The expect status persisted once this request is accepted.
    pub fn stored_expect(&self) -> Status {
        match self {
            ExpectRequest::NotInstalled => Status::NotInstalled,
            ExpectRequest::Running | ExpectRequest::Restart => Status::Running,
            ExpectRequest::Stopped => Status::Stopped,
        }
    }
}

impl fmt::Display for ExpectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExpectRequest {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not-installed" => Ok(ExpectRequest::NotInstalled),
            "running" => Ok(ExpectRequest::Running),
            "stopped" => Ok(ExpectRequest::Stopped),
            "restart" => Ok(ExpectRequest::Restart),
            other => Err(ParseError::new("expect status", other)),
        }
    }
}

// =============================================================================
// Action
// =============================================================================

/// A lifecycle action executed by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Install,
    Start,
    Stop,
    Restart,
    Uninstall,
    Check,
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::Install,
        Action::Start,
        Action::Stop,
        Action::Restart,
        Action::Uninstall,
        Action::Check,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Install => "install",
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Restart => "restart",
            Action::Uninstall => "uninstall",
            Action::Check => "check",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| ParseError::new("action", s))
    }
}
