//! Worker pool tenant manager.
//!
//! Keeps `spec.workers` workers alive for one tenant on top of a
//! [`WorkerRuntime`]. All pool mutations go through one async mutex, so
//! operations on the same tenant are serialized while different tenants
//! never contend. The live worker count is mirrored into an atomic so
//! capacity reads never wait on pool work.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::policy::RestartPolicy;
use super::{LifecycleState, TenantHealth, TenantManager, TenantSpec};
use crate::error::{TenantError, TenantOperation};
use crate::identity::ProvisionerId;
use crate::runtime::{WorkerHandle, WorkerHealth, WorkerRuntime, WorkerSpec};

/// One worker position in the pool. The name survives restarts.
#[derive(Debug)]
struct WorkerSlot {
    name: String,
    handle: Option<WorkerHandle>,
    restarts: Vec<Instant>,
    retry_at: Option<Instant>,
    degraded: bool,
}

impl WorkerSlot {
    fn empty(name: String) -> Self {
        Self {
            name,
            handle: None,
            restarts: Vec::new(),
            retry_at: None,
            degraded: false,
        }
    }
}

#[derive(Debug)]
struct PoolState {
    spec: TenantSpec,
    state: LifecycleState,
    workers: Vec<WorkerSlot>,
    next_index: u64,
}

/// Tenant manager backed by a pool of runtime workers.
pub struct WorkerPoolTenant {
    id: String,
    provisioner_id: Option<ProvisionerId>,
    runtime: Arc<dyn WorkerRuntime>,
    restart_policy: RestartPolicy,
    pool: Mutex<PoolState>,
    running: AtomicUsize,
}

impl WorkerPoolTenant {
    pub fn new(
        spec: TenantSpec,
        runtime: Arc<dyn WorkerRuntime>,
        restart_policy: RestartPolicy,
    ) -> Self {
        Self {
            id: spec.id.clone(),
            provisioner_id: None,
            runtime,
            restart_policy,
            pool: Mutex::new(PoolState {
                spec,
                state: LifecycleState::Uninitialized,
                workers: Vec::new(),
                next_index: 0,
            }),
            running: AtomicUsize::new(0),
        }
    }

    /// Names of the workers currently tracked, in index order.
    pub async fn worker_names(&self) -> Vec<String> {
        let pool = self.pool.lock().await;
        pool.workers.iter().map(|slot| slot.name.clone()).collect()
    }

    fn next_worker_name(&self, pool: &mut PoolState) -> String {
        let index = pool.next_index;
        pool.next_index += 1;
        match &self.provisioner_id {
            Some(provisioner_id) => format!("{}.{}.{}", provisioner_id, self.id, index),
            None => format!("{}.{}", self.id, index),
        }
    }

    fn worker_spec(&self, spec: &TenantSpec, name: &str) -> WorkerSpec {
        WorkerSpec {
            name: name.to_string(),
            tenant_id: self.id.clone(),
            provisioner_id: self
                .provisioner_id
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            env: spec.env.clone(),
        }
    }

    /// Start a fresh worker under a new name.
    async fn launch(&self, pool: &mut PoolState) -> Result<WorkerSlot, TenantError> {
        let name = self.next_worker_name(pool);
        let worker_spec = self.worker_spec(&pool.spec, &name);

        let handle = self
            .runtime
            .start_worker(&worker_spec)
            .await
            .map_err(|source| TenantError::WorkerStart {
                worker: name.clone(),
                source,
            })?;

        let mut slot = WorkerSlot::empty(name);
        slot.handle = Some(handle);
        Ok(slot)
    }

    /// Stop every slot, continuing past failures. Returns the first failure.
    async fn stop_slots(&self, slots: Vec<WorkerSlot>) -> Result<(), TenantError> {
        let mut first_error = None;

        for slot in slots {
            let Some(handle) = slot.handle else {
                continue;
            };

            if let Err(source) = self.runtime.stop_worker(&handle).await {
                warn!(
                    tenant_id = %self.id,
                    worker = %slot.name,
                    error = %source,
                    "Failed to stop worker"
                );
                first_error.get_or_insert(TenantError::WorkerStop {
                    worker: slot.name,
                    source,
                });
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Converge the pool to `spec`, which has already been adopted.
    async fn reconcile(&self, pool: &mut PoolState, env_changed: bool) -> Result<(), TenantError> {
        if env_changed {
            info!(tenant_id = %self.id, "Worker environment changed, replacing workers");
            let old = std::mem::take(&mut pool.workers);
            self.stop_slots(old).await?;
        }

        let desired = pool.spec.workers;
        if pool.workers.len() > desired {
            let excess = pool.workers.split_off(desired);
            info!(
                tenant_id = %self.id,
                stopping = excess.len(),
                desired,
                "Scaling worker pool down"
            );
            self.stop_slots(excess.into_iter().rev().collect()).await?;
        }

        while pool.workers.len() < desired {
            let slot = self.launch(pool).await?;
            debug!(tenant_id = %self.id, worker = %slot.name, "Scaled worker pool up");
            pool.workers.push(slot);
        }

        Ok(())
    }

    fn sync_count(&self, pool: &PoolState) {
        let running = pool.workers.iter().filter(|slot| slot.handle.is_some()).count();
        self.running.store(running, Ordering::SeqCst);
    }
}

#[async_trait]
impl TenantManager for WorkerPoolTenant {
    fn id(&self) -> &str {
        &self.id
    }

    fn provisioner_id(&self) -> Option<&ProvisionerId> {
        self.provisioner_id.as_ref()
    }

    fn set_provisioner_id(&mut self, provisioner_id: ProvisionerId) {
        self.provisioner_id = Some(provisioner_id);
    }

    async fn spec(&self) -> TenantSpec {
        self.pool.lock().await.spec.clone()
    }

    async fn state(&self) -> LifecycleState {
        self.pool.lock().await.state
    }

    async fn spawn(&self) -> Result<(), TenantError> {
        let mut guard = self.pool.lock().await;
        let pool = &mut *guard;

        if pool.state != LifecycleState::Uninitialized {
            return Err(TenantError::InvalidState {
                operation: TenantOperation::Spawn,
                state: pool.state,
            });
        }

        pool.state = LifecycleState::Spawning;
        info!(tenant_id = %self.id, workers = pool.spec.workers, "Spawning worker pool");

        while pool.workers.len() < pool.spec.workers {
            match self.launch(pool).await {
                Ok(slot) => {
                    pool.workers.push(slot);
                    self.sync_count(pool);
                }
                Err(e) => {
                    error!(
                        tenant_id = %self.id,
                        error = %e,
                        "Worker pool failed to come up, rolling back"
                    );
                    let started = std::mem::take(&mut pool.workers);
                    if let Err(stop_err) = self.stop_slots(started).await {
                        warn!(
                            tenant_id = %self.id,
                            error = %stop_err,
                            "Rollback left a worker behind"
                        );
                    }
                    pool.state = LifecycleState::Uninitialized;
                    self.sync_count(pool);
                    return Err(e);
                }
            }
        }

        pool.state = LifecycleState::Active;
        self.sync_count(pool);
        info!(tenant_id = %self.id, running = pool.workers.len(), "Worker pool active");
        Ok(())
    }

    async fn update(&self, incoming: &dyn TenantManager) -> Result<(), TenantError> {
        let spec = incoming.spec().await;
        if spec.id != self.id {
            return Err(TenantError::IdMismatch {
                existing: self.id.clone(),
                incoming: spec.id,
            });
        }

        let mut guard = self.pool.lock().await;
        let pool = &mut *guard;

        if pool.state != LifecycleState::Active {
            return Err(TenantError::InvalidState {
                operation: TenantOperation::Update,
                state: pool.state,
            });
        }

        info!(
            tenant_id = %self.id,
            from_workers = pool.spec.workers,
            to_workers = spec.workers,
            "Updating worker pool"
        );

        pool.state = LifecycleState::Updating;
        let env_changed = pool.spec.env != spec.env;
        pool.spec = spec;

        let result = self.reconcile(pool, env_changed).await;

        pool.state = LifecycleState::Active;
        self.sync_count(pool);

        if let Err(e) = &result {
            warn!(tenant_id = %self.id, error = %e, "Worker pool update incomplete");
        }
        result
    }

    async fn delete(&self) -> Result<(), TenantError> {
        let mut guard = self.pool.lock().await;
        let pool = &mut *guard;

        if pool.state == LifecycleState::Deleted {
            return Ok(());
        }

        info!(tenant_id = %self.id, workers = pool.workers.len(), "Tearing down worker pool");

        let slots = std::mem::take(&mut pool.workers);
        let result = self.stop_slots(slots).await;

        pool.state = LifecycleState::Deleted;
        self.sync_count(pool);
        result
    }

    async fn check_threads(&self) -> TenantHealth {
        let mut guard = self.pool.lock().await;
        let pool = &mut *guard;
        let now = Instant::now();
        let mut restarted = Vec::new();

        if pool.state == LifecycleState::Active {
            while pool.workers.len() < pool.spec.workers {
                let name = self.next_worker_name(pool);
                pool.workers.push(WorkerSlot::empty(name));
            }

            for slot in pool.workers.iter_mut() {
                if let Some(handle) = &slot.handle {
                    match self.runtime.check_worker(handle).await {
                        Ok(WorkerHealth::Running) => continue,
                        Ok(WorkerHealth::Exited { code }) => {
                            warn!(
                                tenant_id = %self.id,
                                worker = %slot.name,
                                ?code,
                                "Worker exited"
                            );
                            slot.handle = None;
                            let recent = self.restart_policy.prune(&mut slot.restarts, now);
                            slot.retry_at =
                                Some(now + self.restart_policy.backoff.delay(recent as u32));
                        }
                        Err(e) => {
                            warn!(
                                tenant_id = %self.id,
                                worker = %slot.name,
                                error = %e,
                                "Worker check failed"
                            );
                            continue;
                        }
                    }
                }

                if slot.degraded || slot.retry_at.is_some_and(|at| at > now) {
                    continue;
                }

                let recent = self.restart_policy.prune(&mut slot.restarts, now);
                if !self.restart_policy.allows(recent) {
                    warn!(
                        tenant_id = %self.id,
                        worker = %slot.name,
                        restarts = recent,
                        "Worker exceeded max restarts, marking as degraded"
                    );
                    slot.degraded = true;
                    continue;
                }

                slot.restarts.push(now);
                let worker_spec = self.worker_spec(&pool.spec, &slot.name);
                match self.runtime.start_worker(&worker_spec).await {
                    Ok(handle) => {
                        info!(tenant_id = %self.id, worker = %slot.name, "Restarted worker");
                        slot.handle = Some(handle);
                        slot.retry_at = None;
                        restarted.push(slot.name.clone());
                    }
                    Err(e) => {
                        warn!(
                            tenant_id = %self.id,
                            worker = %slot.name,
                            error = %e,
                            "Worker restart failed"
                        );
                        slot.retry_at =
                            Some(now + self.restart_policy.backoff.delay(recent as u32));
                    }
                }
            }

            self.sync_count(pool);
        }

        let degraded = pool
            .workers
            .iter()
            .filter(|slot| slot.degraded)
            .map(|slot| slot.name.clone())
            .collect();

        TenantHealth {
            tenant_id: self.id.clone(),
            state: pool.state,
            desired: pool.spec.workers,
            running: self.running.load(Ordering::SeqCst),
            restarted,
            degraded,
            checked_at: Utc::now(),
        }
    }

    fn num_workers(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }
}

/// Builds worker pool tenants that share one runtime and restart policy.
#[derive(Clone)]
pub struct PoolFactory {
    runtime: Arc<dyn WorkerRuntime>,
    restart_policy: RestartPolicy,
}

impl PoolFactory {
    pub fn new(runtime: Arc<dyn WorkerRuntime>, restart_policy: RestartPolicy) -> Self {
        Self {
            runtime,
            restart_policy,
        }
    }

    pub fn build(&self, spec: TenantSpec) -> Box<dyn TenantManager> {
        Box::new(WorkerPoolTenant::new(
            spec,
            Arc::clone(&self.runtime),
            self.restart_policy.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;
    use crate::tenant::BackoffPolicy;

    fn pool(spec: TenantSpec, runtime: Arc<MockRuntime>) -> WorkerPoolTenant {
        let mut tenant = WorkerPoolTenant::new(
            spec,
            runtime,
            RestartPolicy {
                max_restarts: 2,
                window: std::time::Duration::from_secs(60),
                backoff: BackoffPolicy::immediate(),
            },
        );
        tenant.set_provisioner_id(ProvisionerId::new("host1", 123));
        tenant
    }

    #[tokio::test]
    async fn test_worker_names_include_identity() {
        let runtime = Arc::new(MockRuntime::new());
        let tenant = pool(TenantSpec::new("t1", 2), runtime.clone());

        tenant.spawn().await.unwrap();

        assert_eq!(
            tenant.worker_names().await,
            vec!["host1.123.t1.0".to_string(), "host1.123.t1.1".to_string()]
        );
        assert_eq!(runtime.live_workers().await.len(), 2);
    }

    #[tokio::test]
    async fn test_spawn_twice_is_rejected() {
        let runtime = Arc::new(MockRuntime::new());
        let tenant = pool(TenantSpec::new("t1", 1), runtime);

        tenant.spawn().await.unwrap();
        let err = tenant.spawn().await.unwrap_err();
        assert!(matches!(
            err,
            TenantError::InvalidState {
                operation: TenantOperation::Spawn,
                state: LifecycleState::Active,
            }
        ));
    }

    #[tokio::test]
    async fn test_update_rejects_other_tenant() {
        let runtime = Arc::new(MockRuntime::new());
        let tenant = pool(TenantSpec::new("t1", 1), runtime.clone());
        let other = pool(TenantSpec::new("t2", 1), runtime);

        tenant.spawn().await.unwrap();
        let err = tenant.update(&other).await.unwrap_err();
        assert!(matches!(err, TenantError::IdMismatch { .. }));
    }

    #[tokio::test]
    async fn test_check_threads_is_noop_before_spawn() {
        let runtime = Arc::new(MockRuntime::new());
        let tenant = pool(TenantSpec::new("t1", 3), runtime.clone());

        let health = tenant.check_threads().await;
        assert_eq!(health.state, LifecycleState::Uninitialized);
        assert_eq!(health.running, 0);
        assert_eq!(runtime.start_count(), 0);
    }
}
