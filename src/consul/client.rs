//! ConsulApi — HTTP client for the Consul catalog and health endpoints.
//!
//! The trait is the polymorphic surface the sync engine works against;
//! integration tests substitute an in-memory implementation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::{SyncError, SyncResult};

/// Server-side timeout for blocking catalog queries, in seconds.
pub const WAIT_TIME_SECS: u64 = 10;

/// One catalog entry of `/v1/catalog/service/:name`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CatalogService {
    pub node: String,
    pub address: String,
    pub service_address: String,
    pub service_port: u16,
    #[serde(rename = "ServiceID")]
    pub service_id: String,
    pub service_meta: HashMap<String, String>,
}

/// One check of `/v1/health/checks/:service`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct HealthCheck {
    pub status: String,
    #[serde(rename = "ServiceID")]
    pub service_id: String,
    #[serde(rename = "CheckID")]
    pub check_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentService {
    #[serde(rename = "ID")]
    pub id: String,
    pub service: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub meta: HashMap<String, String>,
    pub address: String,
    #[serde(skip_serializing_if = "port_is_unset")]
    pub port: u16,
}

fn port_is_unset(port: &u16) -> bool {
    *port == 0
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentCheck {
    #[serde(rename = "CheckID")]
    pub check_id: String,
    #[serde(rename = "ServiceID")]
    pub service_id: String,
    pub node: String,
    pub name: String,
    pub status: String,
}

/// Body of `PUT /v1/catalog/register`; used both for service entries and
/// for attaching checks to them.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CatalogRegistration {
    pub node: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub address: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub node_meta: HashMap<String, String>,
    pub skip_node_update: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<AgentService>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check: Option<AgentCheck>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CatalogDeregistration {
    node: String,
    #[serde(rename = "ServiceID")]
    service_id: String,
}

#[async_trait]
pub trait ConsulApi: Send + Sync {
    /// Blocking catalog listing: returns once the catalog's version index
    /// exceeds `wait_index` (or the server-side wait elapses), with the
    /// current `name -> tags` map and the new index.
    async fn list_services(
        &self,
        wait_index: u64,
    ) -> SyncResult<(HashMap<String, Vec<String>>, u64)>;

    async fn list_nodes(&self, service: &str, tag: &str) -> SyncResult<Vec<CatalogService>>;

    async fn list_checks(&self, service: &str) -> SyncResult<Vec<HealthCheck>>;

    async fn register(&self, registration: &CatalogRegistration) -> SyncResult<()>;

    async fn deregister(&self, node: &str, service_id: &str) -> SyncResult<()>;
}

/// HTTP implementation against a Consul agent.
pub struct HttpConsul {
    client: reqwest::Client,
    base_url: String,
    token: String,
    stale: bool,
    namespace: String,
    partition: String,
}

impl HttpConsul {
    pub fn new(
        addr: &str,
        token: &str,
        stale: bool,
        namespace: &str,
        partition: &str,
    ) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            // Must outlast the server-side blocking-query wait.
            .timeout(Duration::from_secs(WAIT_TIME_SECS * 3))
            .build()
            .map_err(|e| SyncError::Transient(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: addr.trim_end_matches('/').to_string(),
            token: token.to_string(),
            stale,
            namespace: namespace.to_string(),
            partition: partition.to_string(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if !self.token.is_empty() {
            request = request.header("X-Consul-Token", &self.token);
        }
        if !self.namespace.is_empty() {
            request = request.query(&[("ns", self.namespace.as_str())]);
        }
        if !self.partition.is_empty() {
            request = request.query(&[("partition", self.partition.as_str())]);
        }
        request
    }

    fn query_request(&self, path: &str) -> reqwest::RequestBuilder {
        let mut request = self.request(reqwest::Method::GET, path);
        if self.stale {
            request = request.query(&[("stale", "")]);
        }
        request
    }

    async fn check_status(response: reqwest::Response) -> SyncResult<reqwest::Response> {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SyncError::NotFound(format!("consul returned {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Transient(format!(
                "consul returned {status}: {body}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl ConsulApi for HttpConsul {
    async fn list_services(
        &self,
        wait_index: u64,
    ) -> SyncResult<(HashMap<String, Vec<String>>, u64)> {
        let response = self
            .query_request("/v1/catalog/services")
            .query(&[
                ("index", wait_index.to_string()),
                ("wait", format!("{WAIT_TIME_SECS}s")),
            ])
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let index = response
            .headers()
            .get("X-Consul-Index")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(wait_index);
        let services = response.json().await?;

        Ok((services, index))
    }

    async fn list_nodes(&self, service: &str, tag: &str) -> SyncResult<Vec<CatalogService>> {
        let mut request = self.query_request(&format!("/v1/catalog/service/{service}"));
        if !tag.is_empty() {
            request = request.query(&[("tag", tag)]);
        }
        let response = Self::check_status(request.send().await?).await?;
        Ok(response.json().await?)
    }

    async fn list_checks(&self, service: &str) -> SyncResult<Vec<HealthCheck>> {
        let response = self
            .query_request(&format!("/v1/health/checks/{service}"))
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        Ok(response.json().await?)
    }

    async fn register(&self, registration: &CatalogRegistration) -> SyncResult<()> {
        let response = self
            .request(reqwest::Method::PUT, "/v1/catalog/register")
            .json(registration)
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn deregister(&self, node: &str, service_id: &str) -> SyncResult<()> {
        let body = CatalogDeregistration {
            node: node.to_string(),
            service_id: service_id.to_string(),
        };
        let response = self
            .request(reqwest::Method::PUT, "/v1/catalog/deregister")
            .json(&body)
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }
}
