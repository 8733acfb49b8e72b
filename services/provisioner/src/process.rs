//! Process-backed worker runtime.
//!
//! Each worker is one child process running the configured worker
//! command. The child learns who it works for through its environment:
//!
//! - `LOOM_SERVER_URI`: server to take tasks from
//! - `LOOM_TENANT`: tenant id
//! - `LOOM_PROVISIONER_ID`: owning provisioner
//! - `LOOM_WORKER_NAME`: worker name

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::runtime::{WorkerHandle, WorkerHealth, WorkerRuntime, WorkerSpec};

/// Grace period between kill and reap.
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the process runtime.
#[derive(Debug, Clone)]
pub struct ProcessRuntimeConfig {
    /// Worker program.
    pub program: PathBuf,

    /// Arguments passed to every worker.
    pub args: Vec<String>,

    /// Server URI handed to workers.
    pub server_uri: String,
}

impl ProcessRuntimeConfig {
    /// Parse a whitespace-separated command line into program and args.
    pub fn from_command_line(command: &str, server_uri: &str) -> Result<Self> {
        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| anyhow!("Worker command is empty"))?;

        Ok(Self {
            program: PathBuf::from(program),
            args: parts.map(str::to_string).collect(),
            server_uri: server_uri.to_string(),
        })
    }
}

/// Runs every worker as a child process.
pub struct ProcessRuntime {
    config: ProcessRuntimeConfig,
    children: Mutex<HashMap<String, Child>>,
}

impl ProcessRuntime {
    pub fn new(config: ProcessRuntimeConfig) -> Self {
        Self {
            config,
            children: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl WorkerRuntime for ProcessRuntime {
    async fn start_worker(&self, spec: &WorkerSpec) -> Result<WorkerHandle> {
        let child = Command::new(&self.config.program)
            .args(&self.config.args)
            .envs(&spec.env)
            .env("LOOM_SERVER_URI", &self.config.server_uri)
            .env("LOOM_TENANT", &spec.tenant_id)
            .env("LOOM_PROVISIONER_ID", &spec.provisioner_id)
            .env("LOOM_WORKER_NAME", &spec.name)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {:?}", self.config.program))?;

        let pid = child.id();
        info!(worker = %spec.name, tenant_id = %spec.tenant_id, pid, "Started worker process");

        self.children.lock().await.insert(spec.name.clone(), child);

        Ok(WorkerHandle {
            name: spec.name.clone(),
            pid,
            started_at: Utc::now(),
        })
    }

    async fn stop_worker(&self, handle: &WorkerHandle) -> Result<()> {
        let Some(mut child) = self.children.lock().await.remove(&handle.name) else {
            debug!(worker = %handle.name, "Worker process already gone");
            return Ok(());
        };

        if child.try_wait()?.is_some() {
            return Ok(());
        }

        child
            .start_kill()
            .with_context(|| format!("Failed to signal worker {}", handle.name))?;

        match tokio::time::timeout(STOP_TIMEOUT, child.wait()).await {
            Ok(status) => {
                let status = status?;
                debug!(worker = %handle.name, ?status, "Worker process stopped");
                Ok(())
            }
            Err(_) => {
                warn!(worker = %handle.name, "Worker process did not exit after kill");
                Err(anyhow!("worker {} did not exit within {:?}", handle.name, STOP_TIMEOUT))
            }
        }
    }

    async fn check_worker(&self, handle: &WorkerHandle) -> Result<WorkerHealth> {
        let mut children = self.children.lock().await;
        let Some(child) = children.get_mut(&handle.name) else {
            return Ok(WorkerHealth::Exited { code: None });
        };

        match child.try_wait()? {
            Some(status) => {
                children.remove(&handle.name);
                Ok(WorkerHealth::Exited {
                    code: status.code(),
                })
            }
            None => Ok(WorkerHealth::Running),
        }
    }
}
