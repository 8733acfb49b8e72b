//! Worker runtime interface and mock implementation.
//!
//! The runtime abstracts worker lifecycle operations:
//! - Starting/stopping provisioning workers
//! - Liveness checks
//!
//! A mock implementation is provided for testing and development. The
//! process-backed runtime lives in `process`.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Everything a runtime needs to bring one worker up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    /// Worker name, unique within the provisioner.
    pub name: String,

    /// Tenant the worker provisions for.
    pub tenant_id: String,

    /// Identity of the owning provisioner.
    pub provisioner_id: String,

    /// Extra environment for the worker.
    pub env: BTreeMap<String, String>,
}

/// Handle to a running worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    /// Worker name.
    pub name: String,

    /// OS process id, if the worker is a process.
    pub pid: Option<u32>,

    /// When the worker was started.
    pub started_at: DateTime<Utc>,
}

/// Result of a liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerHealth {
    Running,
    Exited { code: Option<i32> },
}

/// Worker runtime interface.
#[async_trait]
pub trait WorkerRuntime: Send + Sync {
    /// Start a worker for the given spec.
    async fn start_worker(&self, spec: &WorkerSpec) -> Result<WorkerHandle>;

    /// Stop a running worker.
    async fn stop_worker(&self, handle: &WorkerHandle) -> Result<()>;

    /// Check whether a worker is still alive.
    async fn check_worker(&self, handle: &WorkerHandle) -> Result<WorkerHealth>;
}

/// Mock runtime for testing and development.
pub struct MockRuntime {
    /// Live workers by name (false once killed).
    workers: RwLock<HashMap<String, bool>>,

    /// Total number of successful starts.
    start_counter: AtomicU64,

    /// Whether workers should "fail" to start.
    fail_starts: AtomicBool,

    /// Simulated startup delay.
    start_delay: Duration,
}

impl MockRuntime {
    /// Create a new mock runtime.
    pub fn new() -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            start_counter: AtomicU64::new(0),
            fail_starts: AtomicBool::new(false),
            start_delay: Duration::ZERO,
        }
    }

    /// Create a mock runtime that fails all starts.
    pub fn failing() -> Self {
        let runtime = Self::new();
        runtime.set_fail_starts(true);
        runtime
    }

    /// Create a mock runtime whose starts take `delay`.
    pub fn with_start_delay(delay: Duration) -> Self {
        Self {
            start_delay: delay,
            ..Self::new()
        }
    }

    /// Toggle start failures.
    pub fn set_fail_starts(&self, fail: bool) {
        self.fail_starts.store(fail, Ordering::SeqCst);
    }

    /// Simulate a worker crash.
    pub async fn kill(&self, name: &str) -> bool {
        let mut workers = self.workers.write().await;
        match workers.get_mut(name) {
            Some(alive) => {
                *alive = false;
                true
            }
            None => false,
        }
    }

    /// Names of workers that are currently alive, sorted.
    pub async fn live_workers(&self) -> Vec<String> {
        let workers = self.workers.read().await;
        let mut names: Vec<String> = workers
            .iter()
            .filter(|(_, alive)| **alive)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Total number of successful starts.
    pub fn start_count(&self) -> u64 {
        self.start_counter.load(Ordering::SeqCst)
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkerRuntime for MockRuntime {
    async fn start_worker(&self, spec: &WorkerSpec) -> Result<WorkerHandle> {
        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }

        if self.fail_starts.load(Ordering::SeqCst) {
            anyhow::bail!("Mock runtime configured to fail");
        }

        info!(
            worker = %spec.name,
            tenant_id = %spec.tenant_id,
            provisioner_id = %spec.provisioner_id,
            "[MOCK] Starting worker"
        );

        self.workers.write().await.insert(spec.name.clone(), true);
        self.start_counter.fetch_add(1, Ordering::SeqCst);

        Ok(WorkerHandle {
            name: spec.name.clone(),
            pid: None,
            started_at: Utc::now(),
        })
    }

    async fn stop_worker(&self, handle: &WorkerHandle) -> Result<()> {
        info!(worker = %handle.name, "[MOCK] Stopping worker");
        self.workers.write().await.remove(&handle.name);
        Ok(())
    }

    async fn check_worker(&self, handle: &WorkerHandle) -> Result<WorkerHealth> {
        debug!(worker = %handle.name, "[MOCK] Checking worker");

        let workers = self.workers.read().await;
        match workers.get(&handle.name) {
            Some(true) => Ok(WorkerHealth::Running),
            Some(false) => Ok(WorkerHealth::Exited { code: Some(1) }),
            None => Ok(WorkerHealth::Exited { code: None }),
        }
    }
}
