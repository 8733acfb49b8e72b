//! Loom server client for the provisioner.
//!
//! Provides methods for communicating with the server:
//! - Registering this provisioner and its capacity
//! - Sending capacity heartbeats

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::Config;
use crate::identity::ProvisionerId;
use crate::registry::HeartbeatReport;

/// Header carrying the calling user.
pub const USER_HEADER: &str = "X-Loom-UserID";

/// Header carrying the calling tenant.
pub const TENANT_HEADER: &str = "X-Loom-TenantID";

/// Registration payload describing this provisioner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub id: ProvisionerId,
    pub host: String,
    pub port: u16,
    pub capacity_total: u32,
}

/// How the server answered a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    Accepted,
    /// The server does not know this provisioner and wants it to register.
    Unregistered,
}

/// Loom server API client.
pub struct ServerClient {
    client: reqwest::Client,
    base_url: String,
    provisioner_id: ProvisionerId,
}

impl ServerClient {
    /// Create a new server client.
    pub fn new(config: &Config, provisioner_id: ProvisionerId) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_HEADER,
            HeaderValue::from_str(&config.api_user).context("Invalid API user")?,
        );
        headers.insert(
            TENANT_HEADER,
            HeaderValue::from_str(&config.api_tenant).context("Invalid API tenant")?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.server_uri.trim_end_matches('/').to_string(),
            provisioner_id,
        })
    }

    /// Register this provisioner with the server.
    pub async fn register(&self, registration: &Registration) -> Result<()> {
        let url = format!("{}/v2/provisioners/{}", self.base_url, self.provisioner_id);
        debug!(url = %url, capacity = registration.capacity_total, "Registering provisioner");

        let response = self.client.put(&url).json(registration).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Failed to register provisioner");
            anyhow::bail!("Failed to register provisioner: {} - {}", status, body);
        }

        Ok(())
    }

    /// Send a capacity heartbeat.
    pub async fn send_heartbeat(&self, report: &HeartbeatReport) -> Result<HeartbeatOutcome> {
        let url = format!(
            "{}/v2/provisioners/{}/heartbeat",
            self.base_url, self.provisioner_id
        );

        let response = self
            .client
            .put(&url)
            .json(report)
            .timeout(Duration::from_secs(5))
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(HeartbeatOutcome::Accepted),
            StatusCode::NOT_FOUND => Ok(HeartbeatOutcome::Unregistered),
            status => anyhow::bail!("Heartbeat failed with status: {}", status),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn test_client(server: &MockServer) -> ServerClient {
        let config = Config {
            server_uri: server.uri(),
            ..Config::default()
        };
        ServerClient::new(&config, ProvisionerId::new("host1", 123)).unwrap()
    }

    #[tokio::test]
    async fn test_register_sends_camel_case_payload() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v2/provisioners/host1.123"))
            .and(header(USER_HEADER, "admin"))
            .and(header(TENANT_HEADER, "superadmin"))
            .and(body_json(serde_json::json!({
                "id": "host1.123",
                "host": "host1",
                "port": 55056,
                "capacityTotal": 1000
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        client
            .register(&Registration {
                id: ProvisionerId::new("host1", 123),
                host: "host1".to_string(),
                port: 55056,
                capacity_total: 1000,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_register_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let err = client
            .register(&Registration {
                id: ProvisionerId::new("host1", 123),
                host: "host1".to_string(),
                port: 55056,
                capacity_total: 1000,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_heartbeat_outcomes() {
        let server = MockServer::start().await;
        let report = HeartbeatReport {
            total: 1000,
            used: BTreeMap::from([("t1".to_string(), 2)]),
        };

        Mock::given(method("PUT"))
            .and(path("/v2/provisioners/host1.123/heartbeat"))
            .and(body_json(serde_json::json!({"total": 1000, "used": {"t1": 2}})))
            .respond_with(ResponseTemplate::new(200))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v2/provisioners/host1.123/heartbeat"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = test_client(&server);
        assert_eq!(
            client.send_heartbeat(&report).await.unwrap(),
            HeartbeatOutcome::Accepted
        );
        assert_eq!(
            client.send_heartbeat(&report).await.unwrap(),
            HeartbeatOutcome::Unregistered
        );
    }
}
