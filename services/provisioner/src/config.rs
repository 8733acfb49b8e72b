//! Configuration for the provisioner.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::registry::RegistrySettings;

/// Provisioner configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Loom server base URI.
    pub server_uri: String,

    /// Address the operator API listens on.
    pub listen_addr: SocketAddr,

    /// Total worker capacity reported in heartbeats.
    pub capacity_total: u32,

    /// Per-tenant worker ceiling.
    pub max_tenant_workers: usize,

    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,

    /// Health pass interval in seconds.
    pub status_interval_secs: u64,

    /// Bound on spawn/update/delete/check operations, in seconds.
    pub operation_timeout_secs: u64,

    /// Worker command line. `None` runs the in-process mock runtime.
    pub worker_command: Option<String>,

    /// User id sent to the server.
    pub api_user: String,

    /// Tenant id sent to the server.
    pub api_tenant: String,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_uri: "http://localhost:55054".to_string(),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 55056)),
            capacity_total: 1000,
            max_tenant_workers: 100,
            heartbeat_interval_secs: 10,
            status_interval_secs: 10,
            operation_timeout_secs: 60,
            worker_command: None,
            api_user: "admin".to_string(),
            api_tenant: "superadmin".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let server_uri = lookup("LOOM_SERVER_URI")
            .map(|uri| uri.trim_end_matches('/').to_string())
            .unwrap_or(defaults.server_uri);

        let worker_command = lookup("LOOM_WORKER_COMMAND").filter(|cmd| !cmd.trim().is_empty());

        Ok(Self {
            server_uri,
            listen_addr: parse_var(&lookup, "LOOM_PROVISIONER_LISTEN_ADDR", defaults.listen_addr)?,
            capacity_total: parse_var(
                &lookup,
                "LOOM_PROVISIONER_CAPACITY",
                defaults.capacity_total,
            )?,
            max_tenant_workers: parse_var(
                &lookup,
                "LOOM_PROVISIONER_MAX_TENANT_WORKERS",
                defaults.max_tenant_workers,
            )?,
            heartbeat_interval_secs: parse_var(
                &lookup,
                "LOOM_HEARTBEAT_INTERVAL",
                defaults.heartbeat_interval_secs,
            )?,
            status_interval_secs: parse_var(
                &lookup,
                "LOOM_STATUS_INTERVAL",
                defaults.status_interval_secs,
            )?,
            operation_timeout_secs: parse_var(
                &lookup,
                "LOOM_OPERATION_TIMEOUT",
                defaults.operation_timeout_secs,
            )?,
            worker_command,
            api_user: lookup("LOOM_API_USER").unwrap_or(defaults.api_user),
            api_tenant: lookup("LOOM_TENANT").unwrap_or(defaults.api_tenant),
            log_level: lookup("LOOM_LOG_LEVEL").unwrap_or(defaults.log_level),
        })
    }

    /// Registry settings derived from this configuration.
    pub fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            capacity_total: self.capacity_total,
            max_tenant_workers: self.max_tenant_workers,
            operation_timeout: Duration::from_secs(self.operation_timeout_secs),
        }
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}
