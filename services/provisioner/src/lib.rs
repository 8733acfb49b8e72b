//! Loom Multi-Tenant Provisioner Library
//!
//! The provisioner runs on each provisioning host and keeps a pool of
//! workers alive for every tenant it has been assigned. It reports its
//! capacity to the Loom server through periodic heartbeats.
//!
//! ## Architecture
//!
//! ```text
//! ProvisionerRegistry            (tenant id -> manager, identity, capacity)
//! └── WorkerPoolTenant(id)       (per-tenant worker pool)
//!     └── WorkerRuntime          (mock in dev, child processes in prod)
//! ```
//!
//! ## Modules
//!
//! - `registry`: tenant map, lifecycle routing, health and heartbeat reports
//! - `tenant`: tenant manager contract and the worker pool implementation
//! - `runtime` / `process`: worker runtimes
//! - `client` / `heartbeat`: server registration and background loops
//! - `api`: operator HTTP API

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod identity;
pub mod process;
pub mod registry;
pub mod runtime;
pub mod tenant;

// Re-export commonly used types
pub use error::{ProvisionerError, TenantError, TenantOperation};
pub use identity::ProvisionerId;
pub use registry::{
    AddOutcome, HeartbeatReport, ProvisionerRegistry, RegistrySettings, StatusReport,
};
pub use runtime::{MockRuntime, WorkerRuntime};
pub use tenant::{LifecycleState, PoolFactory, TenantManager, TenantSpec, WorkerPoolTenant};
