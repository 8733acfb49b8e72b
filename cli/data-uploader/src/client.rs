//! HTTP client for the Loom server's plugin resource API.

use std::collections::HashMap;

use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;

use crate::error::UploaderError;
use crate::resource::ResourceFormat;
use crate::target::RemoteTarget;

/// Header carrying the calling user.
pub const USER_HEADER: &str = "X-Loom-UserID";

/// Header carrying the calling tenant.
pub const TENANT_HEADER: &str = "X-Loom-TenantID";

/// Plugin description returned by `GET /v1/loom/{type}/{name}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PluginResponse {
    #[serde(default)]
    resource_types: HashMap<String, ResourceTypeResponse>,
}

#[derive(Debug, Deserialize)]
struct ResourceTypeResponse {
    #[serde(default)]
    format: Option<String>,
}

/// Body returned by a successful upload.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadReceipt {
    pub version: serde_json::Value,
}

impl UploadReceipt {
    /// Version as it appears in URLs.
    pub fn version_label(&self) -> String {
        match &self.version {
            serde_json::Value::String(version) => version.clone(),
            other => other.to_string(),
        }
    }
}

/// Client for one server, user and tenant.
#[derive(Debug, Clone)]
pub struct LoomClient {
    client: reqwest::Client,
    base_url: String,
}

impl LoomClient {
    pub fn new(base_url: &str, user: &str, tenant: &str) -> Result<Self, UploaderError> {
        let mut headers = HeaderMap::new();
        for (name, value) in [(USER_HEADER, user), (TENANT_HEADER, tenant)] {
            headers.insert(
                HeaderName::from_bytes(name.as_bytes()).context("Invalid header name")?,
                HeaderValue::from_str(value)
                    .with_context(|| format!("Invalid {} value: {}", name, value))?,
            );
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Build a URL for an endpoint.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Check that the server answers at all.
    pub async fn check_status(&self) -> Result<(), UploaderError> {
        let uri = self.url("status");
        let response = self.client.get(&uri).send().await?;
        ensure_ok(&response, uri)
    }

    /// Ask the owning plugin which format it expects for the target's
    /// resource type.
    pub async fn resource_format(
        &self,
        target: &RemoteTarget,
    ) -> Result<ResourceFormat, UploaderError> {
        let uri = self.url(&format!("v1/loom/{}", target.plugin_path()));
        let response = self.client.get(&uri).send().await?;
        ensure_ok(&response, uri.clone())?;

        let plugin: PluginResponse = response.json().await.map_err(|e| {
            UploaderError::Other(anyhow::anyhow!("Failed to parse plugin response: {}", e))
        })?;

        let resource_type = plugin
            .resource_types
            .get(&target.resource_type)
            .ok_or_else(|| UploaderError::UnknownResourceType {
                plugin: target.plugin_path(),
                resource_type: target.resource_type.clone(),
                uri,
            })?;

        match resource_type.format.as_deref() {
            Some(format) => format.parse(),
            None => Err(UploaderError::MissingFormat {
                plugin: target.plugin_path(),
                resource_type: target.resource_type.clone(),
            }),
        }
    }

    /// Upload a new version of the resource. Returns the upload URI and
    /// the server's receipt.
    pub async fn upload(
        &self,
        target: &RemoteTarget,
        body: Vec<u8>,
    ) -> Result<(String, UploadReceipt), UploaderError> {
        let uri = self.url(&format!("v1/loom/{}", target.resource_path()));
        let response = self.client.post(&uri).body(body).send().await?;
        ensure_ok(&response, uri.clone())?;

        let receipt = response.json().await.map_err(|e| {
            UploaderError::Other(anyhow::anyhow!("Failed to parse upload response: {}", e))
        })?;
        Ok((uri, receipt))
    }

    /// Stage an uploaded version. Returns the stage URI.
    pub async fn stage(
        &self,
        target: &RemoteTarget,
        version: &str,
    ) -> Result<String, UploaderError> {
        let uri = self.url(&format!(
            "v1/loom/{}/versions/{}/stage",
            target.resource_path(),
            version
        ));
        let response = self.client.post(&uri).send().await?;
        ensure_ok(&response, uri.clone())?;
        Ok(uri)
    }

    /// Push every staged resource live.
    pub async fn sync(&self) -> Result<(), UploaderError> {
        let uri = self.url("v1/loom/sync");
        let response = self.client.post(&uri).send().await?;
        ensure_ok(&response, uri)
    }
}

fn ensure_ok(response: &reqwest::Response, uri: String) -> Result<(), UploaderError> {
    let status = response.status().as_u16();
    if status == 200 {
        Ok(())
    } else {
        Err(UploaderError::Server { status, uri })
    }
}
