//! Provisioner registry.
//!
//! The registry tracks every tenant manager owned by this provisioner:
//! - Stamps each manager with the process-wide provisioner identity
//! - Routes tenant definitions to spawn (new tenant) or update (known tenant)
//! - Runs health passes and aggregates capacity for heartbeats
//!
//! ## Locking
//!
//! The tenant map lock is only held for lookups, inserts and removals.
//! Lifecycle operations on the same tenant id are serialized by a per-id
//! lock, so a slow spawn or teardown only blocks callers working on that
//! tenant. Every tenant operation runs as its own task and the caller
//! waits at most the configured timeout for it. A timed-out operation
//! still runs to completion, so pool state and worker teardown are never
//! cut off midway.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, error, info, warn};

use crate::error::{ProvisionerError, TenantError, TenantOperation};
use crate::identity::ProvisionerId;
use crate::tenant::{LifecycleState, TenantHealth, TenantManager};

/// Registry tunables.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Total worker capacity reported in heartbeats.
    pub capacity_total: u32,

    /// Largest worker count a single tenant may ask for.
    pub max_tenant_workers: usize,

    /// Upper bound on any single tenant operation.
    pub operation_timeout: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            capacity_total: 1000,
            max_tenant_workers: 100,
            operation_timeout: Duration::from_secs(60),
        }
    }
}

/// Capacity report sent to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatReport {
    /// Total worker capacity of this provisioner.
    pub total: u32,

    /// Live workers per tenant.
    pub used: BTreeMap<String, usize>,
}

impl HeartbeatReport {
    /// Sum of all used capacity.
    pub fn used_total(&self) -> usize {
        self.used.values().sum()
    }
}

/// A tenant whose health pass did not complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckFailure {
    pub tenant_id: String,
    pub error: String,
}

/// Aggregated result of one health pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub provisioner_id: ProvisionerId,
    pub checked_at: DateTime<Utc>,
    pub tenants: Vec<TenantHealth>,
    pub failures: Vec<CheckFailure>,
}

impl StatusReport {
    pub fn is_healthy(&self) -> bool {
        self.failures.is_empty() && self.tenants.iter().all(TenantHealth::is_healthy)
    }
}

/// Short description of a registered tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSummary {
    pub id: String,
    pub workers: usize,
    pub state: LifecycleState,
}

/// Which path `add_tenant` took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// A new tenant was spawned and registered.
    Created,
    /// An existing tenant was updated in place.
    Updated,
}

/// Process-wide registry of tenant managers.
pub struct ProvisionerRegistry {
    provisioner_id: ProvisionerId,
    settings: RegistrySettings,
    tenants: RwLock<HashMap<String, Arc<dyn TenantManager>>>,
    tenant_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ProvisionerRegistry {
    /// Create an empty registry.
    pub fn new(provisioner_id: ProvisionerId, settings: RegistrySettings) -> Self {
        info!(
            provisioner_id = %provisioner_id,
            capacity = settings.capacity_total,
            "Provisioner registry initialized"
        );
        Self {
            provisioner_id,
            settings,
            tenants: RwLock::new(HashMap::new()),
            tenant_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn provisioner_id(&self) -> &ProvisionerId {
        &self.provisioner_id
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    /// Add a tenant, or update it in place if the id is already registered.
    pub async fn add_tenant(
        &self,
        mut tenant: Box<dyn TenantManager>,
    ) -> Result<AddOutcome, ProvisionerError> {
        if tenant.id().trim().is_empty() {
            return Err(ProvisionerError::MissingId);
        }
        let id = tenant.id().to_string();
        self.validate(tenant.as_ref()).await?;

        info!(tenant_id = %id, "Adding/editing tenant");
        tenant.set_provisioner_id(self.provisioner_id.clone());

        let guard = self.lock_tenant(&id).await;
        let existing = self.tenants.read().await.get(&id).cloned();

        let result = match existing {
            Some(existing) => {
                info!(tenant_id = %id, "Editing tenant");
                let incoming: Arc<dyn TenantManager> = Arc::from(tenant);
                self.bounded(&id, TenantOperation::Update, async move {
                    existing.update(incoming.as_ref()).await
                })
                .await
                .map(|()| AddOutcome::Updated)
            }
            None => {
                info!(tenant_id = %id, "Adding new tenant");
                let tenant: Arc<dyn TenantManager> = Arc::from(tenant);
                let spawning = Arc::clone(&tenant);
                match self
                    .bounded(&id, TenantOperation::Spawn, async move { spawning.spawn().await })
                    .await
                {
                    Ok(()) => {
                        self.tenants.write().await.insert(id.clone(), tenant);
                        Ok(AddOutcome::Created)
                    }
                    Err(e) => {
                        if matches!(e, ProvisionerError::Timeout { .. }) {
                            self.abandon(&id, tenant).await;
                        }
                        Err(e)
                    }
                }
            }
        };

        self.unlock_tenant(&id, guard).await;
        result
    }

    /// Remove a tenant and tear down its workers.
    ///
    /// The tenant is deregistered before teardown starts. If teardown fails
    /// the error is returned, but the tenant stays deregistered.
    pub async fn delete_tenant(&self, id: &str) -> Result<(), ProvisionerError> {
        let guard = self.lock_tenant(id).await;
        let removed = self.tenants.write().await.remove(id);

        let result = match removed {
            Some(tenant) => {
                info!(tenant_id = %id, "Deleting tenant");
                let result = self
                    .bounded(id, TenantOperation::Delete, async move { tenant.delete().await })
                    .await;
                if let Err(e) = &result {
                    error!(tenant_id = %id, error = %e, "Tenant deregistered but teardown failed");
                }
                result
            }
            None => Err(ProvisionerError::NotFound(id.to_string())),
        };

        self.unlock_tenant(id, guard).await;
        result
    }

    /// Run a health pass over every tenant.
    pub async fn status(&self) -> StatusReport {
        let snapshot = self.snapshot().await;
        let timeout = self.settings.operation_timeout;

        let checks = snapshot.into_iter().map(|(id, tenant)| async move {
            let task = tokio::spawn(async move { tenant.check_threads().await });
            let result = tokio::time::timeout(timeout, task).await;
            (id, result)
        });

        let mut tenants = Vec::new();
        let mut failures = Vec::new();
        for (tenant_id, result) in join_all(checks).await {
            match result {
                Ok(Ok(health)) => tenants.push(health),
                Ok(Err(e)) => {
                    error!(tenant_id = %tenant_id, error = %e, "Health check task failed");
                    failures.push(CheckFailure {
                        tenant_id,
                        error: e.to_string(),
                    });
                }
                Err(_) => {
                    let err = ProvisionerError::Timeout {
                        tenant_id: tenant_id.clone(),
                        operation: TenantOperation::CheckThreads,
                        timeout,
                    };
                    warn!(tenant_id = %tenant_id, error = %err, "Health check did not complete");
                    failures.push(CheckFailure {
                        tenant_id,
                        error: err.to_string(),
                    });
                }
            }
        }

        tenants.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
        debug!(tenants = tenants.len(), failures = failures.len(), "Health pass complete");

        StatusReport {
            provisioner_id: self.provisioner_id.clone(),
            checked_at: Utc::now(),
            tenants,
            failures,
        }
    }

    /// Report total capacity and the workers used by each tenant.
    pub async fn heartbeat(&self) -> HeartbeatReport {
        let tenants = self.tenants.read().await;
        let used = tenants
            .iter()
            .map(|(id, tenant)| (id.clone(), tenant.num_workers()))
            .collect();

        HeartbeatReport {
            total: self.settings.capacity_total,
            used,
        }
    }

    /// Summaries of all registered tenants, sorted by id.
    pub async fn summaries(&self) -> Vec<TenantSummary> {
        let mut summaries = Vec::new();
        for (id, tenant) in self.snapshot().await {
            summaries.push(TenantSummary {
                id,
                workers: tenant.num_workers(),
                state: tenant.state().await,
            });
        }
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    /// Look up a registered tenant.
    pub async fn get(&self, id: &str) -> Option<Arc<dyn TenantManager>> {
        self.tenants.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.tenants.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tenants.read().await.is_empty()
    }

    /// Delete every tenant. Failures are logged and skipped.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.tenants.read().await.keys().cloned().collect();
        info!(tenants = ids.len(), "Shutting down all tenants");

        for id in ids {
            match self.delete_tenant(&id).await {
                Ok(()) | Err(ProvisionerError::NotFound(_)) => {}
                Err(e) => {
                    warn!(tenant_id = %id, error = %e, "Tenant teardown failed during shutdown")
                }
            }
        }
    }

    async fn validate(&self, tenant: &dyn TenantManager) -> Result<(), ProvisionerError> {
        let id = tenant.id();
        if id.contains('/') || id.chars().any(char::is_whitespace) {
            return Err(ProvisionerError::InvalidArgument(format!(
                "tenant id '{}' may not contain '/' or whitespace",
                id
            )));
        }

        let spec = tenant.spec().await;
        if spec.id != id {
            return Err(ProvisionerError::InvalidArgument(format!(
                "tenant manager '{}' carries a definition for '{}'",
                id, spec.id
            )));
        }
        if spec.workers > self.settings.max_tenant_workers {
            return Err(ProvisionerError::InvalidArgument(format!(
                "tenant '{}' requests {} workers, limit is {}",
                id, spec.workers, self.settings.max_tenant_workers
            )));
        }

        Ok(())
    }

    /// Run a tenant operation as its own task, waiting at most the
    /// operation timeout for it.
    ///
    /// On timeout the task is left to finish in the background, so a pool
    /// is never abandoned halfway through its own bookkeeping.
    async fn bounded<T, F>(
        &self,
        tenant_id: &str,
        operation: TenantOperation,
        fut: F,
    ) -> Result<T, ProvisionerError>
    where
        F: Future<Output = Result<T, TenantError>> + Send + 'static,
        T: Send + 'static,
    {
        let task = tokio::spawn(fut);
        match tokio::time::timeout(self.settings.operation_timeout, task).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(source))) => Err(ProvisionerError::ProvisioningFailure {
                tenant_id: tenant_id.to_string(),
                operation,
                source,
            }),
            Ok(Err(join_error)) => Err(ProvisionerError::ProvisioningFailure {
                tenant_id: tenant_id.to_string(),
                operation,
                source: TenantError::Aborted(join_error.to_string()),
            }),
            Err(_) => {
                warn!(
                    tenant_id = %tenant_id,
                    %operation,
                    "Tenant operation timed out, letting it finish in the background"
                );
                Err(ProvisionerError::Timeout {
                    tenant_id: tenant_id.to_string(),
                    operation,
                    timeout: self.settings.operation_timeout,
                })
            }
        }
    }

    /// Clean up after a spawn that timed out and will not be registered.
    async fn abandon(&self, id: &str, tenant: Arc<dyn TenantManager>) {
        warn!(tenant_id = %id, "Spawn timed out, tearing down partial worker pool");
        let result = self
            .bounded(id, TenantOperation::Delete, async move { tenant.delete().await })
            .await;
        if let Err(e) = result {
            error!(tenant_id = %id, error = %e, "Partial worker pool could not be torn down");
        }
    }

    async fn snapshot(&self) -> Vec<(String, Arc<dyn TenantManager>)> {
        self.tenants
            .read()
            .await
            .iter()
            .map(|(id, tenant)| (id.clone(), Arc::clone(tenant)))
            .collect()
    }

    async fn lock_tenant(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.tenant_locks.lock().await;
            Arc::clone(locks.entry(id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Release a per-tenant lock, dropping its entry if nobody else waits on it.
    async fn unlock_tenant(&self, id: &str, guard: OwnedMutexGuard<()>) {
        let mut locks = self.tenant_locks.lock().await;
        if let Some(lock) = locks.get(id) {
            // One reference held by the map, one by our guard.
            if Arc::strong_count(lock) <= 2 {
                locks.remove(id);
            }
        }
        drop(guard);
    }
}
