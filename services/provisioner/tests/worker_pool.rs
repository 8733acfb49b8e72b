//! Worker pool lifecycle tests against the mock runtime, alone and
//! behind the registry.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use loom_provisioner::runtime::{WorkerHandle, WorkerHealth, WorkerSpec};
use loom_provisioner::tenant::{BackoffPolicy, RestartPolicy};
use loom_provisioner::{
    AddOutcome, LifecycleState, MockRuntime, PoolFactory, ProvisionerError, ProvisionerId,
    ProvisionerRegistry, RegistrySettings, TenantError, TenantManager, TenantOperation,
    TenantSpec, WorkerPoolTenant, WorkerRuntime,
};

fn restart_policy(max_restarts: u32) -> RestartPolicy {
    RestartPolicy {
        max_restarts,
        window: Duration::from_secs(60),
        backoff: BackoffPolicy::immediate(),
    }
}

fn tenant(spec: TenantSpec, runtime: Arc<dyn WorkerRuntime>) -> WorkerPoolTenant {
    let mut tenant = WorkerPoolTenant::new(spec, runtime, restart_policy(2));
    tenant.set_provisioner_id(ProvisionerId::new("host1", 123));
    tenant
}

/// Delegates to a mock runtime but refuses starts past a limit.
struct LimitedRuntime {
    inner: MockRuntime,
    remaining: AtomicUsize,
}

impl LimitedRuntime {
    fn new(limit: usize) -> Self {
        Self {
            inner: MockRuntime::new(),
            remaining: AtomicUsize::new(limit),
        }
    }
}

#[async_trait]
impl WorkerRuntime for LimitedRuntime {
    async fn start_worker(&self, spec: &WorkerSpec) -> Result<WorkerHandle> {
        let left = self.remaining.load(Ordering::SeqCst);
        if left == 0 {
            anyhow::bail!("host out of worker slots");
        }
        self.remaining.store(left - 1, Ordering::SeqCst);
        self.inner.start_worker(spec).await
    }

    async fn stop_worker(&self, handle: &WorkerHandle) -> Result<()> {
        self.inner.stop_worker(handle).await
    }

    async fn check_worker(&self, handle: &WorkerHandle) -> Result<WorkerHealth> {
        self.inner.check_worker(handle).await
    }
}

/// Delegates to a mock runtime but takes a while to stop each worker.
struct SlowStopRuntime {
    inner: MockRuntime,
    stop_delay: Duration,
}

#[async_trait]
impl WorkerRuntime for SlowStopRuntime {
    async fn start_worker(&self, spec: &WorkerSpec) -> Result<WorkerHandle> {
        self.inner.start_worker(spec).await
    }

    async fn stop_worker(&self, handle: &WorkerHandle) -> Result<()> {
        tokio::time::sleep(self.stop_delay).await;
        self.inner.stop_worker(handle).await
    }

    async fn check_worker(&self, handle: &WorkerHandle) -> Result<WorkerHealth> {
        self.inner.check_worker(handle).await
    }
}

fn registry_with_timeout(timeout: Duration) -> ProvisionerRegistry {
    ProvisionerRegistry::new(
        ProvisionerId::new("host1", 123),
        RegistrySettings {
            operation_timeout: timeout,
            ..RegistrySettings::default()
        },
    )
}

#[tokio::test]
async fn test_spawn_brings_pool_online() {
    let runtime = Arc::new(MockRuntime::new());
    let pool = tenant(TenantSpec::new("t1", 3), runtime.clone());

    pool.spawn().await.unwrap();

    assert_eq!(pool.state().await, LifecycleState::Active);
    assert_eq!(pool.num_workers(), 3);
    assert_eq!(
        runtime.live_workers().await,
        vec![
            "host1.123.t1.0".to_string(),
            "host1.123.t1.1".to_string(),
            "host1.123.t1.2".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_partial_spawn_is_rolled_back() {
    let runtime = Arc::new(LimitedRuntime::new(2));
    let pool = tenant(TenantSpec::new("t1", 4), runtime.clone());

    let err = pool.spawn().await.unwrap_err();

    assert!(matches!(
        err,
        TenantError::WorkerStart { ref worker, .. } if worker == "host1.123.t1.2"
    ));
    assert_eq!(pool.state().await, LifecycleState::Uninitialized);
    assert_eq!(pool.num_workers(), 0);
    assert!(runtime.inner.live_workers().await.is_empty());
}

#[tokio::test]
async fn test_update_scales_up_and_down() {
    let runtime = Arc::new(MockRuntime::new());
    let pool = tenant(TenantSpec::new("t1", 2), runtime.clone());
    pool.spawn().await.unwrap();

    pool.update(&tenant(TenantSpec::new("t1", 4), runtime.clone()))
        .await
        .unwrap();
    assert_eq!(pool.num_workers(), 4);
    assert_eq!(runtime.live_workers().await.len(), 4);

    pool.update(&tenant(TenantSpec::new("t1", 1), runtime.clone()))
        .await
        .unwrap();
    assert_eq!(pool.num_workers(), 1);
    assert_eq!(pool.worker_names().await, vec!["host1.123.t1.0".to_string()]);
    assert_eq!(runtime.live_workers().await, vec!["host1.123.t1.0".to_string()]);
    assert_eq!(pool.spec().await.workers, 1);
}

#[tokio::test]
async fn test_env_change_replaces_workers() {
    let runtime = Arc::new(MockRuntime::new());
    let pool = tenant(TenantSpec::new("t1", 2), runtime.clone());
    pool.spawn().await.unwrap();

    let mut spec = TenantSpec::new("t1", 2);
    spec.env = BTreeMap::from([("LOOM_BATCH_SIZE".to_string(), "50".to_string())]);
    pool.update(&tenant(spec.clone(), runtime.clone())).await.unwrap();

    assert_eq!(pool.spec().await, spec);
    assert_eq!(
        runtime.live_workers().await,
        vec!["host1.123.t1.2".to_string(), "host1.123.t1.3".to_string()]
    );
    assert_eq!(runtime.start_count(), 4);
}

#[tokio::test]
async fn test_update_before_spawn_is_rejected() {
    let runtime = Arc::new(MockRuntime::new());
    let pool = tenant(TenantSpec::new("t1", 2), runtime.clone());

    let err = pool
        .update(&tenant(TenantSpec::new("t1", 3), runtime))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TenantError::InvalidState {
            operation: TenantOperation::Update,
            state: LifecycleState::Uninitialized,
        }
    ));
}

#[tokio::test]
async fn test_check_threads_restarts_dead_worker() {
    let runtime = Arc::new(MockRuntime::new());
    let pool = tenant(TenantSpec::new("t1", 2), runtime.clone());
    pool.spawn().await.unwrap();

    assert!(runtime.kill("host1.123.t1.1").await);

    let health = pool.check_threads().await;
    assert_eq!(health.restarted, vec!["host1.123.t1.1".to_string()]);
    assert_eq!(health.running, 2);
    assert!(health.is_healthy());
    assert_eq!(runtime.live_workers().await.len(), 2);

    // A second pass with everything alive changes nothing.
    let health = pool.check_threads().await;
    assert!(health.restarted.is_empty());
    assert_eq!(runtime.start_count(), 3);
}

#[tokio::test]
async fn test_worker_is_degraded_after_max_restarts() {
    let runtime = Arc::new(MockRuntime::new());
    let pool = tenant(TenantSpec::new("t1", 1), runtime.clone());
    pool.spawn().await.unwrap();

    for _ in 0..2 {
        runtime.kill("host1.123.t1.0").await;
        let health = pool.check_threads().await;
        assert_eq!(health.restarted.len(), 1);
    }

    runtime.kill("host1.123.t1.0").await;
    let health = pool.check_threads().await;

    assert!(health.restarted.is_empty());
    assert_eq!(health.degraded, vec!["host1.123.t1.0".to_string()]);
    assert_eq!(health.running, 0);
    assert!(!health.is_healthy());
    assert_eq!(pool.num_workers(), 0);
}

#[tokio::test]
async fn test_failed_restart_is_retried_on_next_pass() {
    let runtime = Arc::new(MockRuntime::new());
    let pool = tenant(TenantSpec::new("t1", 1), runtime.clone());
    pool.spawn().await.unwrap();

    runtime.kill("host1.123.t1.0").await;
    runtime.set_fail_starts(true);
    let health = pool.check_threads().await;
    assert_eq!(health.running, 0);

    runtime.set_fail_starts(false);
    let health = pool.check_threads().await;
    assert_eq!(health.restarted, vec!["host1.123.t1.0".to_string()]);
    assert_eq!(health.running, 1);
}

#[tokio::test]
async fn test_delete_stops_everything_and_is_idempotent() {
    let runtime = Arc::new(MockRuntime::new());
    let pool = tenant(TenantSpec::new("t1", 3), runtime.clone());
    pool.spawn().await.unwrap();

    pool.delete().await.unwrap();
    assert_eq!(pool.state().await, LifecycleState::Deleted);
    assert_eq!(pool.num_workers(), 0);
    assert!(runtime.live_workers().await.is_empty());

    pool.delete().await.unwrap();

    let health = pool.check_threads().await;
    assert_eq!(health.state, LifecycleState::Deleted);
    assert!(health.restarted.is_empty());
}

#[tokio::test]
async fn test_registry_drives_worker_pools() {
    let runtime = Arc::new(MockRuntime::new());
    let factory = PoolFactory::new(runtime.clone(), restart_policy(5));
    let registry =
        ProvisionerRegistry::new(ProvisionerId::new("host1", 123), RegistrySettings::default());

    registry.add_tenant(factory.build(TenantSpec::new("t1", 2))).await.unwrap();
    registry.add_tenant(factory.build(TenantSpec::new("t2", 1))).await.unwrap();
    registry.add_tenant(factory.build(TenantSpec::new("t1", 3))).await.unwrap();

    let report = registry.heartbeat().await;
    assert_eq!(report.used.get("t1"), Some(&3));
    assert_eq!(report.used.get("t2"), Some(&1));
    assert_eq!(report.used_total(), 4);
    assert!(runtime.live_workers().await.contains(&"host1.123.t2.0".to_string()));

    runtime.kill("host1.123.t1.0").await;
    let status = registry.status().await;
    assert!(status.is_healthy());
    assert_eq!(status.tenants[0].restarted, vec!["host1.123.t1.0".to_string()]);

    registry.delete_tenant("t1").await.unwrap();
    assert_eq!(runtime.live_workers().await, vec!["host1.123.t2.0".to_string()]);
}

#[tokio::test]
async fn test_slow_worker_start_times_out_and_cleans_up() {
    let runtime = Arc::new(MockRuntime::with_start_delay(Duration::from_millis(200)));
    let factory = PoolFactory::new(runtime.clone(), restart_policy(5));
    let registry = registry_with_timeout(Duration::from_millis(300));

    let err = registry
        .add_tenant(factory.build(TenantSpec::new("t1", 3)))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ProvisionerError::Timeout {
            operation: TenantOperation::Spawn,
            ..
        }
    ));
    assert!(registry.is_empty().await);

    // The spawn and the teardown behind it finish in the background.
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert!(runtime.live_workers().await.is_empty());
}

#[tokio::test]
async fn test_timed_out_update_still_settles_the_pool() {
    let runtime = Arc::new(MockRuntime::with_start_delay(Duration::from_millis(300)));
    let factory = PoolFactory::new(runtime.clone(), restart_policy(5));
    let registry = registry_with_timeout(Duration::from_millis(100));

    registry.add_tenant(factory.build(TenantSpec::new("t1", 0))).await.unwrap();
    let err = registry
        .add_tenant(factory.build(TenantSpec::new("t1", 2)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProvisionerError::Timeout {
            operation: TenantOperation::Update,
            ..
        }
    ));

    tokio::time::sleep(Duration::from_millis(1000)).await;
    let pool = registry.get("t1").await.unwrap();
    assert_eq!(pool.state().await, LifecycleState::Active);
    assert_eq!(pool.num_workers(), 2);
    assert_eq!(runtime.live_workers().await.len(), 2);

    let outcome = registry
        .add_tenant(factory.build(TenantSpec::new("t1", 1)))
        .await
        .unwrap();
    assert_eq!(outcome, AddOutcome::Updated);
    assert_eq!(pool.num_workers(), 1);
    assert_eq!(runtime.live_workers().await, vec!["host1.123.t1.0".to_string()]);
}

#[tokio::test]
async fn test_timed_out_delete_still_stops_workers() {
    let runtime = Arc::new(SlowStopRuntime {
        inner: MockRuntime::new(),
        stop_delay: Duration::from_millis(100),
    });
    let factory = PoolFactory::new(runtime.clone(), restart_policy(5));
    let registry = registry_with_timeout(Duration::from_millis(150));

    registry.add_tenant(factory.build(TenantSpec::new("t1", 3))).await.unwrap();
    assert_eq!(runtime.inner.live_workers().await.len(), 3);

    let err = registry.delete_tenant("t1").await.unwrap_err();
    assert!(matches!(
        err,
        ProvisionerError::Timeout {
            operation: TenantOperation::Delete,
            ..
        }
    ));
    assert!(registry.is_empty().await);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(runtime.inner.live_workers().await.is_empty());
}
