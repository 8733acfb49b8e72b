//! Tenant managers.
//!
//! A tenant manager owns the worker pool of one tenant. The registry only
//! sees the [`TenantManager`] trait; [`WorkerPoolTenant`] is the
//! implementation used by the provisioner daemon.
//!
//! ## Lifecycle
//!
//! ```text
//! Uninitialized ──spawn──> Spawning ──> Active <──> Updating
//!       ^                     │           │
//!       └──── spawn failed ───┘           └──delete──> Deleted
//! ```

mod policy;
mod pool;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TenantError;
use crate::identity::ProvisionerId;

pub use policy::{BackoffPolicy, RestartPolicy};
pub use pool::{PoolFactory, WorkerPoolTenant};

/// Definition of a tenant as submitted by an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantSpec {
    /// Tenant id.
    pub id: String,

    /// Number of workers to keep running.
    pub workers: usize,

    /// Extra environment handed to every worker.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl TenantSpec {
    pub fn new(id: impl Into<String>, workers: usize) -> Self {
        Self {
            id: id.into(),
            workers,
            env: BTreeMap::new(),
        }
    }
}

/// Tenant manager lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    Spawning,
    Active,
    Updating,
    Deleted,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Uninitialized => write!(f, "uninitialized"),
            LifecycleState::Spawning => write!(f, "spawning"),
            LifecycleState::Active => write!(f, "active"),
            LifecycleState::Updating => write!(f, "updating"),
            LifecycleState::Deleted => write!(f, "deleted"),
        }
    }
}

/// Result of one health pass over a tenant's worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantHealth {
    pub tenant_id: String,
    pub state: LifecycleState,
    /// Workers the tenant should have.
    pub desired: usize,
    /// Workers alive after the pass.
    pub running: usize,
    /// Workers restarted during the pass.
    pub restarted: Vec<String>,
    /// Workers that exhausted their restart budget.
    pub degraded: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

impl TenantHealth {
    /// A tenant is healthy when every desired worker is running.
    pub fn is_healthy(&self) -> bool {
        self.running == self.desired && self.degraded.is_empty()
    }
}

/// Capability set the registry requires from a tenant manager.
#[async_trait]
pub trait TenantManager: Send + Sync {
    /// Tenant id.
    fn id(&self) -> &str;

    /// Identity of the owning provisioner, once the registry has set it.
    fn provisioner_id(&self) -> Option<&ProvisionerId>;

    /// Set by the registry when the manager is added.
    fn set_provisioner_id(&mut self, provisioner_id: ProvisionerId);

    /// Current definition of the tenant.
    async fn spec(&self) -> TenantSpec;

    /// Current lifecycle state.
    async fn state(&self) -> LifecycleState;

    /// Bring the initial worker pool online.
    async fn spawn(&self) -> Result<(), TenantError>;

    /// Reconcile the live pool with the definition carried by `incoming`.
    async fn update(&self, incoming: &dyn TenantManager) -> Result<(), TenantError>;

    /// Tear down every worker.
    async fn delete(&self) -> Result<(), TenantError>;

    /// Detect dead workers and restart them. Idempotent.
    async fn check_threads(&self) -> TenantHealth;

    /// Number of live workers.
    fn num_workers(&self) -> usize;
}
