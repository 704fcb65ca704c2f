//! CloudMapApi — AWS Cloud Map (servicediscovery) client surface.
//!
//! The trait exposes the handful of operations the sync engine needs over
//! plain domain types; the SDK implementation maps paginated responses and
//! the two tolerated error classes (already-exists, instance-not-found)
//! into them.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_servicediscovery::error::{DisplayErrorContext, SdkError};
use aws_sdk_servicediscovery::types::{
    DnsConfig, DnsRecord, FilterCondition, HealthCheckCustomConfig, HealthStatus,
    HealthStatusFilter, NamespaceType, RecordType, ServiceFilter, ServiceFilterName,
};

use crate::catalog::service::{AWS_SERVICE_DESCRIPTION, Health};
use crate::common::{SyncError, SyncResult};

/// The single Cloud Map namespace being mirrored.
#[derive(Debug, Clone, Default)]
pub struct CloudNamespace {
    pub id: String,
    pub name: String,
    /// HTTP-type namespaces have no DNS records.
    pub is_http: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CloudService {
    pub id: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Default)]
pub struct CloudInstance {
    pub id: String,
    pub attributes: HashMap<String, String>,
}

#[async_trait]
pub trait CloudMapApi: Send + Sync {
    async fn get_namespace(&self, id: &str) -> SyncResult<CloudNamespace>;

    async fn list_services(&self, namespace_id: &str) -> SyncResult<Vec<CloudService>>;

    async fn list_instances(&self, service_id: &str) -> SyncResult<Vec<CloudInstance>>;

    /// Healthy endpoints only; preferred over `list_instances` when building
    /// the snapshot because it does not paginate through dead records.
    async fn discover_instances(
        &self,
        namespace_name: &str,
        service_name: &str,
    ) -> SyncResult<Vec<CloudInstance>>;

    /// Per-instance health. A vanished instance is a non-error and yields
    /// whatever statuses were collected up to that point.
    async fn instance_health(&self, service_id: &str) -> SyncResult<HashMap<String, Health>>;

    /// Create an imported service carrying the sentinel description.
    /// Returns the new service ID, or [`SyncError::AlreadyExists`].
    async fn create_service(
        &self,
        name: &str,
        namespace: &CloudNamespace,
        dns_ttl: i64,
    ) -> SyncResult<String>;

    async fn register_instance(
        &self,
        service_id: &str,
        instance_id: &str,
        attributes: HashMap<String, String>,
    ) -> SyncResult<()>;

    async fn deregister_instance(&self, service_id: &str, instance_id: &str) -> SyncResult<()>;

    async fn delete_service(&self, service_id: &str) -> SyncResult<()>;
}

/// SDK-backed implementation.
pub struct CloudMap {
    client: aws_sdk_servicediscovery::Client,
}

impl CloudMap {
    pub fn new(client: aws_sdk_servicediscovery::Client) -> Self {
        Self { client }
    }
}

fn sdk_error<E>(err: SdkError<E>) -> SyncError
where
    E: std::error::Error + Send + Sync + 'static,
{
    SyncError::Transient(DisplayErrorContext(err).to_string())
}

fn build_error(err: impl std::fmt::Display) -> SyncError {
    SyncError::Transient(format!("invalid cloud map request: {err}"))
}

fn health_from_aws(status: &HealthStatus) -> Health {
    match status {
        HealthStatus::Healthy => Health::Passing,
        HealthStatus::Unhealthy => Health::Critical,
        _ => Health::Unknown,
    }
}

#[async_trait]
impl CloudMapApi for CloudMap {
    async fn get_namespace(&self, id: &str) -> SyncResult<CloudNamespace> {
        let output = self
            .client
            .get_namespace()
            .id(id)
            .send()
            .await
            .map_err(sdk_error)?;

        let namespace = output
            .namespace()
            .ok_or_else(|| SyncError::NotFound(format!("namespace {id}")))?;

        Ok(CloudNamespace {
            id: namespace.id().unwrap_or_default().to_string(),
            name: namespace.name().unwrap_or_default().to_string(),
            is_http: matches!(namespace.r#type(), Some(NamespaceType::Http)),
        })
    }

    async fn list_services(&self, namespace_id: &str) -> SyncResult<Vec<CloudService>> {
        let filter = ServiceFilter::builder()
            .name(ServiceFilterName::NamespaceId)
            .condition(FilterCondition::Eq)
            .values(namespace_id)
            .build()
            .map_err(build_error)?;

        let mut pages = self
            .client
            .list_services()
            .filters(filter)
            .into_paginator()
            .send();

        let mut services = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(sdk_error)?;
            for summary in page.services() {
                services.push(CloudService {
                    id: summary.id().unwrap_or_default().to_string(),
                    name: summary.name().unwrap_or_default().to_string(),
                    description: summary.description().unwrap_or_default().to_string(),
                });
            }
        }
        Ok(services)
    }

    async fn list_instances(&self, service_id: &str) -> SyncResult<Vec<CloudInstance>> {
        let mut pages = self
            .client
            .list_instances()
            .service_id(service_id)
            .into_paginator()
            .send();

        let mut instances = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(sdk_error)?;
            for summary in page.instances() {
                instances.push(CloudInstance {
                    id: summary.id().unwrap_or_default().to_string(),
                    attributes: summary.attributes().cloned().unwrap_or_default(),
                });
            }
        }
        Ok(instances)
    }

    async fn discover_instances(
        &self,
        namespace_name: &str,
        service_name: &str,
    ) -> SyncResult<Vec<CloudInstance>> {
        let output = self
            .client
            .discover_instances()
            .namespace_name(namespace_name)
            .service_name(service_name)
            .health_status(HealthStatusFilter::Healthy)
            .send()
            .await
            .map_err(sdk_error)?;

        Ok(output
            .instances()
            .iter()
            .map(|summary| CloudInstance {
                id: summary.instance_id().unwrap_or_default().to_string(),
                attributes: summary.attributes().cloned().unwrap_or_default(),
            })
            .collect())
    }

    async fn instance_health(&self, service_id: &str) -> SyncResult<HashMap<String, Health>> {
        let mut pages = self
            .client
            .get_instances_health_status()
            .service_id(service_id)
            .into_paginator()
            .send();

        let mut healths = HashMap::new();
        while let Some(page) = pages.next().await {
            match page {
                Ok(page) => {
                    for (instance_id, status) in page.status().cloned().unwrap_or_default() {
                        healths.insert(instance_id, health_from_aws(&status));
                    }
                }
                Err(err) => {
                    let service_error = err.into_service_error();
                    // The instance vanished between listing and health
                    // lookup; whatever was collected so far stands.
                    if service_error.is_instance_not_found() {
                        break;
                    }
                    return Err(SyncError::Transient(
                        DisplayErrorContext(service_error).to_string(),
                    ));
                }
            }
        }
        Ok(healths)
    }

    async fn create_service(
        &self,
        name: &str,
        namespace: &CloudNamespace,
        dns_ttl: i64,
    ) -> SyncResult<String> {
        let mut request = self
            .client
            .create_service()
            .name(name)
            .namespace_id(&namespace.id)
            .description(AWS_SERVICE_DESCRIPTION)
            .health_check_custom_config(HealthCheckCustomConfig::builder().build());

        if !namespace.is_http {
            let record = DnsRecord::builder()
                .r#type(RecordType::Srv)
                .ttl(dns_ttl)
                .build()
                .map_err(build_error)?;
            let dns_config = DnsConfig::builder()
                .dns_records(record)
                .build()
                .map_err(build_error)?;
            request = request.dns_config(dns_config);
        }

        match request.send().await {
            Ok(output) => Ok(output
                .service()
                .and_then(|service| service.id())
                .unwrap_or_default()
                .to_string()),
            Err(err) => {
                let service_error = err.into_service_error();
                if service_error.is_service_already_exists() {
                    Err(SyncError::AlreadyExists(format!("service {name}")))
                } else {
                    Err(SyncError::Transient(
                        DisplayErrorContext(service_error).to_string(),
                    ))
                }
            }
        }
    }

    async fn register_instance(
        &self,
        service_id: &str,
        instance_id: &str,
        attributes: HashMap<String, String>,
    ) -> SyncResult<()> {
        self.client
            .register_instance()
            .service_id(service_id)
            .instance_id(instance_id)
            .set_attributes(Some(attributes))
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn deregister_instance(&self, service_id: &str, instance_id: &str) -> SyncResult<()> {
        self.client
            .deregister_instance()
            .service_id(service_id)
            .instance_id(instance_id)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn delete_service(&self, service_id: &str) -> SyncResult<()> {
        self.client
            .delete_service()
            .id(service_id)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }
}
