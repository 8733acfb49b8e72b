//! Error types for registry and tenant operations.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::tenant::LifecycleState;

/// Tenant lifecycle operation, used to label failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantOperation {
    Spawn,
    Update,
    Delete,
    CheckThreads,
}

impl fmt::Display for TenantOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TenantOperation::Spawn => write!(f, "spawn"),
            TenantOperation::Update => write!(f, "update"),
            TenantOperation::Delete => write!(f, "delete"),
            TenantOperation::CheckThreads => write!(f, "check_threads"),
        }
    }
}

/// Errors raised by the provisioner registry.
#[derive(Debug, Error)]
pub enum ProvisionerError {
    /// The tenant definition is malformed.
    #[error("invalid tenant definition: {0}")]
    InvalidArgument(String),

    /// The tenant manager has no id.
    #[error("cannot add a tenant manager without an id")]
    MissingId,

    /// No tenant with this id is registered.
    #[error("tenant not found: {0}")]
    NotFound(String),

    /// The tenant manager failed to carry out a lifecycle operation.
    #[error("{operation} failed for tenant {tenant_id}: {source}")]
    ProvisioningFailure {
        tenant_id: String,
        operation: TenantOperation,
        #[source]
        source: TenantError,
    },

    /// The tenant manager did not finish within the operation timeout.
    #[error("{operation} timed out for tenant {tenant_id} after {timeout:?}")]
    Timeout {
        tenant_id: String,
        operation: TenantOperation,
        timeout: Duration,
    },
}

impl ProvisionerError {
    /// Returns true if the error is a client-side mistake rather than a
    /// provisioning failure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ProvisionerError::InvalidArgument(_)
                | ProvisionerError::MissingId
                | ProvisionerError::NotFound(_)
        )
    }
}

/// Errors raised by a tenant manager while driving its worker pool.
#[derive(Debug, Error)]
pub enum TenantError {
    /// The operation is not allowed from the manager's current state.
    #[error("cannot {operation} while tenant is {state}")]
    InvalidState {
        operation: TenantOperation,
        state: LifecycleState,
    },

    /// An update carried a definition for a different tenant.
    #[error("definition for tenant {incoming} cannot update tenant {existing}")]
    IdMismatch { existing: String, incoming: String },

    /// A worker could not be started.
    #[error("failed to start worker {worker}: {source}")]
    WorkerStart {
        worker: String,
        #[source]
        source: anyhow::Error,
    },

    /// A worker could not be stopped.
    #[error("failed to stop worker {worker}: {source}")]
    WorkerStop {
        worker: String,
        #[source]
        source: anyhow::Error,
    },

    /// The task running the operation panicked or was cancelled.
    #[error("tenant operation aborted: {0}")]
    Aborted(String),
}
