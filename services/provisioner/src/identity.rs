//! Provisioner identity.
//!
//! Every provisioner process is identified by `{hostname}.{pid}`. The
//! identity is computed once when the registry is built and copied into
//! every tenant manager the registry owns.

use std::fmt;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Process-wide provisioner identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProvisionerId(String);

impl ProvisionerId {
    /// Build an identity from a host name and process id.
    pub fn new(host: &str, pid: u32) -> Self {
        Self(format!("{}.{}", host.to_lowercase(), pid))
    }

    /// Detect the identity of the current process.
    pub fn detect() -> Result<Self> {
        let host = nix::unistd::gethostname().context("Failed to read hostname")?;
        let host = host
            .into_string()
            .map_err(|raw| anyhow::anyhow!("Hostname is not valid UTF-8: {:?}", raw))?;

        Ok(Self::new(&host, std::process::id()))
    }

    /// Host part of the identity.
    pub fn host(&self) -> &str {
        self.0.rsplit_once('.').map(|(host, _)| host).unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProvisionerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
