//! Operator HTTP API.
//!
//! - `GET /status`: run a health pass and return the report
//! - `GET /heartbeat`: current capacity report
//! - `GET /v1/tenants`: registered tenants
//! - `PUT /v1/tenants/{id}`: add or update a tenant
//! - `DELETE /v1/tenants/{id}`: remove a tenant

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::error::ProvisionerError;
use crate::registry::{
    AddOutcome, HeartbeatReport, ProvisionerRegistry, StatusReport, TenantSummary,
};
use crate::tenant::{PoolFactory, TenantSpec};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ProvisionerRegistry>,
    pub factory: PoolFactory,
}

/// Body of `PUT /v1/tenants/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct TenantRequest {
    /// Optional; must match the path when present.
    #[serde(default)]
    pub id: Option<String>,
    pub workers: usize,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// JSON error body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Error returned by API handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code: code.to_string(),
                message: message.into(),
            },
        }
    }
}

impl From<ProvisionerError> for ApiError {
    fn from(err: ProvisionerError) -> Self {
        let message = err.to_string();
        match err {
            ProvisionerError::InvalidArgument(_) => {
                Self::new(StatusCode::BAD_REQUEST, "invalid_argument", message)
            }
            ProvisionerError::MissingId => {
                Self::new(StatusCode::BAD_REQUEST, "missing_id", message)
            }
            ProvisionerError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "not_found", message),
            ProvisionerError::ProvisioningFailure { .. } => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "provisioning_failure", message)
            }
            ProvisionerError::Timeout { .. } => {
                Self::new(StatusCode::GATEWAY_TIMEOUT, "timeout", message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(code = %self.body.code, message = %self.body.message, "Request failed");
        }
        (self.status, Json(self.body)).into_response()
    }
}

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/heartbeat", get(heartbeat))
        .route("/v1/tenants", get(list_tenants))
        .route("/v1/tenants/{id}", put(put_tenant).delete(delete_tenant))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn status(State(state): State<AppState>) -> Json<StatusReport> {
    Json(state.registry.status().await)
}

async fn heartbeat(State(state): State<AppState>) -> Json<HeartbeatReport> {
    Json(state.registry.heartbeat().await)
}

async fn list_tenants(State(state): State<AppState>) -> Json<Vec<TenantSummary>> {
    Json(state.registry.summaries().await)
}

async fn put_tenant(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<TenantRequest>,
) -> Result<StatusCode, ApiError> {
    if let Some(body_id) = request.id.as_deref() {
        if body_id != id {
            return Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                "invalid_argument",
                format!("tenant id '{}' in body does not match path '{}'", body_id, id),
            ));
        }
    }

    let spec = TenantSpec {
        id,
        workers: request.workers,
        env: request.env,
    };

    match state.registry.add_tenant(state.factory.build(spec)).await? {
        AddOutcome::Created => Ok(StatusCode::CREATED),
        AddOutcome::Updated => Ok(StatusCode::OK),
    }
}

async fn delete_tenant(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.registry.delete_tenant(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
