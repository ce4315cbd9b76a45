use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    /// SQLite file for durable state; in-memory when unset.
    pub store_path: Option<PathBuf>,
    pub database_prefix: String,
    pub middleware_prefix: String,
    pub changed_subprefix: String,
    pub changed_retention_days: u32,
    pub bundle_dir: PathBuf,
    pub bundle_name: String,
    pub remote_tmp: String,
    pub ssh_port: u16,
    pub agent_port: u16,
    /// Address agents report health to.
    pub operator_ip: String,
    pub operator_port: u16,
    pub agent_start_delay: Duration,
    pub dispatch_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let listen_addr = var("HOSTPILOT_LISTEN_ADDR", "0.0.0.0:3334")
            .parse()
            .context("HOSTPILOT_LISTEN_ADDR")?;

        let log_level = var("HOSTPILOT_LOG_LEVEL", "info");

        let store_path = lookup("HOSTPILOT_STORE_PATH")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);

        let database_prefix = var("HOSTPILOT_DATABASE_PREFIX", "/hostpilot/database");
        let middleware_prefix = var("HOSTPILOT_MIDDLEWARE_PREFIX", "/hostpilot/middleware");
        let changed_subprefix = var("HOSTPILOT_CHANGED_SUBPREFIX", "changed");
        let changed_retention_days = var("HOSTPILOT_CHANGED_RETENTION_DAYS", "7")
            .parse()
            .context("HOSTPILOT_CHANGED_RETENTION_DAYS")?;

        let bundle_dir = PathBuf::from(var("HOSTPILOT_BUNDLE_DIR", "/opt/app"));
        let bundle_name = var("HOSTPILOT_BUNDLE_NAME", "agent.tar.gz");
        let remote_tmp = var("HOSTPILOT_REMOTE_TMP", "/tmp");
        let ssh_port = var("HOSTPILOT_SSH_PORT", "22")
            .parse()
            .context("HOSTPILOT_SSH_PORT")?;

        let agent_port = var("HOSTPILOT_AGENT_PORT", "3335")
            .parse()
            .context("HOSTPILOT_AGENT_PORT")?;
        let operator_ip = var("HOSTPILOT_OPERATOR_IP", "127.0.0.1");
        let operator_port = var("HOSTPILOT_OPERATOR_PORT", "3334")
            .parse()
            .context("HOSTPILOT_OPERATOR_PORT")?;

        let agent_start_delay = Duration::from_secs(
            var("HOSTPILOT_AGENT_START_DELAY_SECS", "5")
                .parse()
                .context("HOSTPILOT_AGENT_START_DELAY_SECS")?,
        );
        let dispatch_timeout = Duration::from_secs(
            var("HOSTPILOT_DISPATCH_TIMEOUT_SECS", "1800")
                .parse()
                .context("HOSTPILOT_DISPATCH_TIMEOUT_SECS")?,
        );

        Ok(Self {
            listen_addr,
            log_level,
            store_path,
            database_prefix,
            middleware_prefix,
            changed_subprefix,
            changed_retention_days,
            bundle_dir,
            bundle_name,
            remote_tmp,
            ssh_port,
            agent_port,
            operator_ip,
            operator_port,
            agent_start_delay,
            dispatch_timeout,
        })
    }
}
