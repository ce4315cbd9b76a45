//! Configuration for the agent.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the action API listens on.
    pub listen_addr: SocketAddr,

    /// Directory scripts are fetched into and run from. Also holds
    /// `checkInfo.json`.
    pub work_dir: PathBuf,

    /// Timeout for script fetches and health reports.
    pub http_timeout: Duration,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let listen_addr = lookup("HOSTPILOT_AGENT_LISTEN_ADDR")
            .unwrap_or_else(|| "0.0.0.0:3335".to_string())
            .parse()
            .context("HOSTPILOT_AGENT_LISTEN_ADDR")?;

        let work_dir = lookup("HOSTPILOT_AGENT_WORK_DIR")
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/opt/app"));

        let http_timeout = Duration::from_secs(
            lookup("HOSTPILOT_AGENT_HTTP_TIMEOUT_SECS")
                .unwrap_or_else(|| "30".to_string())
                .parse()
                .context("HOSTPILOT_AGENT_HTTP_TIMEOUT_SECS")?,
        );

        let log_level = lookup("HOSTPILOT_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            listen_addr,
            work_dir,
            http_timeout,
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config.listen_addr.port(), 3335);
        assert_eq!(config.work_dir, PathBuf::from("/opt/app"));
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_work_dir_override() {
        let config = Config::from_lookup(|key| {
            (key == "HOSTPILOT_AGENT_WORK_DIR").then(|| "/srv/agent".to_string())
        })
        .unwrap();
        assert_eq!(config.work_dir, PathBuf::from("/srv/agent"));
    }

    #[test]
    fn test_bad_listen_addr() {
        let err = Config::from_lookup(|key| {
            (key == "HOSTPILOT_AGENT_LISTEN_ADDR").then(|| "nowhere".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("HOSTPILOT_AGENT_LISTEN_ADDR"));
    }
}
