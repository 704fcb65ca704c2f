//! Cloud Map side of the sync engine.
//!
//! [`AwsSource`] owns the Cloud Map snapshot, the interval fetch loop that
//! rebuilds it, and the create/remove appliers the Consul -> Cloud Map
//! reconciler drives against the namespace.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::aws::client::{CloudInstance, CloudMapApi, CloudNamespace, CloudService};
use crate::catalog::service::{
    AWS_INSTANCE_IPV4, AWS_INSTANCE_PORT, AWS_SERVICE_DESCRIPTION, HealthMap, Node, NodeMap,
    Service, ServiceMap, instance_id,
};
use crate::catalog::snapshot::Snapshot;
use crate::common::{SyncError, SyncResult};

pub struct AwsSource {
    api: Arc<dyn CloudMapApi>,
    store: Snapshot,
    trigger: mpsc::Sender<()>,
    namespace: CloudNamespace,
    /// Prefix prepended to Consul-sourced services written into Cloud Map,
    /// and stripped again when the fetcher sees the sentinel description.
    aws_prefix: String,
    poll_interval: Duration,
    dns_ttl: i64,
}

impl AwsSource {
    pub fn new(
        api: Arc<dyn CloudMapApi>,
        store: Snapshot,
        trigger: mpsc::Sender<()>,
        namespace: CloudNamespace,
        aws_prefix: impl Into<String>,
        poll_interval: Duration,
        dns_ttl: i64,
    ) -> Self {
        Self {
            api,
            store,
            trigger,
            namespace,
            aws_prefix: aws_prefix.into(),
            poll_interval,
            dns_ttl,
        }
    }

    /// Current Cloud Map snapshot.
    pub fn services(&self) -> ServiceMap {
        self.store.get_all()
    }

    // ========================================================================
    // Fetching
    // ========================================================================

    /// Interval poll loop. A failed poll keeps the previous snapshot and
    /// does not pulse the trigger.
    pub async fn run_fetch(self: Arc<Self>, cancel: CancellationToken) -> SyncResult<()> {
        loop {
            match self.fetch_once().await {
                Ok(()) => {
                    let _ = self.trigger.try_send(());
                }
                Err(e) => {
                    tracing::error!(error = %e, "error fetching from cloud map");
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// One poll pass: list the namespace, enumerate healthy endpoints and
    /// health per service, then atomic snapshot publication. Failures of
    /// individual instance/health queries are logged and leave the partial
    /// service in place without instance data.
    pub async fn fetch_once(&self) -> SyncResult<()> {
        let raw = self.api.list_services(&self.namespace.id).await?;
        let mut services = self.transform_services(raw);

        for (key, service) in services.iter_mut() {
            // Imported services were registered under their prefixed name;
            // that is the name Cloud Map discovery knows them by.
            let discovery_name = if service.from_consul {
                format!("{}{}", self.aws_prefix, service.name)
            } else {
                service.name.clone()
            };

            let instances = match self
                .api
                .discover_instances(&self.namespace.name, &discovery_name)
                .await
            {
                Ok(instances) => instances,
                Err(e) => {
                    tracing::error!(error = %e, service = %key, "cannot discover instances");
                    continue;
                }
            };

            let nodes = transform_nodes(instances);
            if nodes.is_empty() {
                continue;
            }
            service.nodes = nodes;

            match self.api.instance_health(&service.aws_id).await {
                Ok(healths) => {
                    service.healths = if service.from_consul {
                        self.rekey_healths(&service.name, &service.aws_id, healths)
                    } else {
                        healths
                    };
                }
                Err(e) => {
                    tracing::error!(error = %e, service = %key, "cannot fetch instance health");
                }
            }
        }

        self.store.set_all(services);
        Ok(())
    }

    /// Service summaries -> skeleton services keyed by canonical name.
    /// Imported services are recognized by the sentinel description and
    /// lose their Cloud-Map-side prefix.
    fn transform_services(&self, raw: Vec<CloudService>) -> ServiceMap {
        let mut services = ServiceMap::with_capacity(raw.len());
        for summary in raw {
            let from_consul = summary.description == AWS_SERVICE_DESCRIPTION;
            let name = if from_consul {
                summary
                    .name
                    .strip_prefix(&self.aws_prefix)
                    .unwrap_or(&summary.name)
                    .to_string()
            } else {
                summary.name.clone()
            };
            services.insert(
                name.clone(),
                Service {
                    id: summary.id.clone(),
                    name,
                    aws_id: summary.id,
                    aws_namespace: self.namespace.id.clone(),
                    from_consul,
                    ..Default::default()
                },
            );
        }
        services
    }

    /// Rewrite an imported service's health keys into the synthetic
    /// `serviceId_host_port` identifier, resolving each Cloud Map instance
    /// ID through the previously published snapshot. Instances the snapshot
    /// does not know yet drop out until the next poll.
    fn rekey_healths(&self, name: &str, aws_id: &str, healths: HealthMap) -> HealthMap {
        let mut rekeyed = HealthMap::new();
        for (cloud_instance_id, health) in healths {
            if let Some(node) = self.store.node_for_aws_id(name, &cloud_instance_id) {
                rekeyed.insert(instance_id(aws_id, &node.host, node.port), health);
            }
        }
        rekeyed
    }

    // ========================================================================
    // Applying (Consul -> Cloud Map direction)
    // ========================================================================

    /// Create the given Consul-sourced services in the namespace and
    /// register their instances. Instance registrations run concurrently
    /// per service and are all joined before returning, so the next fetch
    /// observes this cycle's writes. Returns the number of services created.
    pub async fn apply_create(&self, services: ServiceMap) -> usize {
        let mut count = 0;
        for (key, service) in services {
            if service.from_aws {
                continue;
            }
            let name = format!("{}{}", self.aws_prefix, key);

            let mut aws_id = service.aws_id.clone();
            if aws_id.is_empty() {
                match self
                    .api
                    .create_service(&name, &self.namespace, self.dns_ttl)
                    .await
                {
                    Ok(id) => {
                        aws_id = id;
                        count += 1;
                    }
                    Err(SyncError::AlreadyExists(_)) => {
                        // Created by an earlier cycle whose fetch has not
                        // caught up yet; the next poll adopts its ID.
                        tracing::info!(service = %name, "service already exists");
                        continue;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, service = %name, "cannot create service in cloud map");
                        continue;
                    }
                }
            }

            let mut registrations = Vec::new();
            for (host, ports) in &service.nodes {
                for node in ports.values() {
                    let api = self.api.clone();
                    let service_id = aws_id.clone();
                    let host = host.clone();
                    let node = node.clone();
                    registrations.push(tokio::spawn(async move {
                        let id = instance_id(&service_id, &host, node.port);
                        let attributes = instance_attributes(&host, &node);
                        if let Err(e) = api.register_instance(&service_id, &id, attributes).await {
                            tracing::error!(error = %e, instance = %id, "cannot register instance");
                        }
                    }));
                }
            }
            for handle in registrations {
                let _ = handle.await;
            }
        }
        count
    }

    /// Remove previously imported services whose Consul source has shrunk
    /// or disappeared. All instance deregistrations are joined first; a
    /// service itself is only deleted when the diffed host set is not
    /// smaller than the snapshot's, i.e. when the whole service vanished
    /// rather than a subset of its endpoints.
    pub async fn apply_remove(&self, services: ServiceMap) -> usize {
        let mut deregistrations = Vec::new();
        for (_, service) in &services {
            if !service.from_consul || service.aws_id.is_empty() {
                continue;
            }
            for (host, ports) in &service.nodes {
                for node in ports.values() {
                    let api = self.api.clone();
                    let service_id = service.aws_id.clone();
                    let id = instance_id(&service.aws_id, host, node.port);
                    deregistrations.push(tokio::spawn(async move {
                        if let Err(e) = api.deregister_instance(&service_id, &id).await {
                            tracing::error!(error = %e, instance = %id, "cannot remove instance");
                        }
                    }));
                }
            }
        }
        for handle in deregistrations {
            let _ = handle.await;
        }

        let mut count = 0;
        for (key, service) in &services {
            if !service.from_consul || service.aws_id.is_empty() {
                continue;
            }
            let snapshot_hosts = self
                .store
                .get(key)
                .map(|s| s.nodes.len())
                .unwrap_or_default();
            if service.nodes.len() < snapshot_hosts {
                continue;
            }
            match self.api.delete_service(&service.aws_id).await {
                Ok(()) => count += 1,
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        service = %key,
                        id = %service.aws_id,
                        "cannot remove service"
                    );
                }
            }
        }
        count
    }
}

/// Instance summaries -> `host -> port -> node`. The host comes from the
/// `AWS_INSTANCE_IPV4` attribute; an absent or malformed port yields 0.
fn transform_nodes(instances: Vec<CloudInstance>) -> NodeMap {
    let mut nodes = NodeMap::new();
    for instance in instances {
        let host = instance
            .attributes
            .get(AWS_INSTANCE_IPV4)
            .cloned()
            .unwrap_or_default();
        let port = instance
            .attributes
            .get(AWS_INSTANCE_PORT)
            .and_then(|p| p.parse().ok())
            .unwrap_or(0);
        nodes.entry(host.clone()).or_default().insert(
            port,
            Node {
                port,
                host,
                aws_id: instance.id,
                attributes: instance.attributes,
                ..Default::default()
            },
        );
    }
    nodes
}

/// Attributes for a registered instance: the source node's attribute map
/// with the canonical endpoint overriding whatever it claimed.
fn instance_attributes(host: &str, node: &Node) -> HashMap<String, String> {
    let mut attributes = node.attributes.clone();
    attributes.insert(AWS_INSTANCE_IPV4.to_string(), host.to_string());
    attributes.insert(AWS_INSTANCE_PORT.to_string(), node.port.to_string());
    attributes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::service::Health;
    use async_trait::async_trait;

    struct StubApi;

    #[async_trait]
    impl CloudMapApi for StubApi {
        async fn get_namespace(&self, _: &str) -> SyncResult<CloudNamespace> {
            Err(SyncError::Transient("stub".into()))
        }
        async fn list_services(&self, _: &str) -> SyncResult<Vec<CloudService>> {
            Err(SyncError::Transient("stub".into()))
        }
        async fn list_instances(&self, _: &str) -> SyncResult<Vec<CloudInstance>> {
            Err(SyncError::Transient("stub".into()))
        }
        async fn discover_instances(&self, _: &str, _: &str) -> SyncResult<Vec<CloudInstance>> {
            Err(SyncError::Transient("stub".into()))
        }
        async fn instance_health(&self, _: &str) -> SyncResult<HashMap<String, Health>> {
            Err(SyncError::Transient("stub".into()))
        }
        async fn create_service(
            &self,
            _: &str,
            _: &CloudNamespace,
            _: i64,
        ) -> SyncResult<String> {
            Err(SyncError::Transient("stub".into()))
        }
        async fn register_instance(
            &self,
            _: &str,
            _: &str,
            _: HashMap<String, String>,
        ) -> SyncResult<()> {
            Err(SyncError::Transient("stub".into()))
        }
        async fn deregister_instance(&self, _: &str, _: &str) -> SyncResult<()> {
            Err(SyncError::Transient("stub".into()))
        }
        async fn delete_service(&self, _: &str) -> SyncResult<()> {
            Err(SyncError::Transient("stub".into()))
        }
    }

    fn test_source(prefix: &str) -> AwsSource {
        let (tx, _rx) = mpsc::channel(1);
        AwsSource::new(
            Arc::new(StubApi),
            Snapshot::new(),
            tx,
            CloudNamespace {
                id: "ns-1".to_string(),
                name: "external".to_string(),
                is_http: false,
            },
            prefix,
            Duration::from_secs(30),
            60,
        )
    }

    #[test]
    fn test_transform_services_sentinel_description() {
        let source = test_source("aws_");
        let raw = vec![
            CloudService {
                id: "srv-1".to_string(),
                name: "web".to_string(),
                description: "a web thing".to_string(),
            },
            CloudService {
                id: "srv-2".to_string(),
                name: "aws_redis".to_string(),
                description: AWS_SERVICE_DESCRIPTION.to_string(),
            },
        ];

        let services = source.transform_services(raw);

        let native = &services["web"];
        assert_eq!(native.aws_id, "srv-1");
        assert_eq!(native.aws_namespace, "ns-1");
        assert!(!native.from_consul);

        let imported = &services["redis"];
        assert_eq!(imported.aws_id, "srv-2");
        assert_eq!(imported.name, "redis");
        assert!(imported.from_consul);
    }

    #[test]
    fn test_transform_nodes_port_parsing() {
        let raw = vec![
            CloudInstance {
                id: "i1".to_string(),
                attributes: HashMap::from([
                    (AWS_INSTANCE_IPV4.to_string(), "1.1.1.1".to_string()),
                    (AWS_INSTANCE_PORT.to_string(), "1".to_string()),
                ]),
            },
            CloudInstance {
                id: "i2".to_string(),
                attributes: HashMap::from([
                    (AWS_INSTANCE_IPV4.to_string(), "1.1.1.2".to_string()),
                    (AWS_INSTANCE_PORT.to_string(), "A".to_string()),
                ]),
            },
            CloudInstance {
                id: "i3".to_string(),
                attributes: HashMap::from([(
                    AWS_INSTANCE_IPV4.to_string(),
                    "1.1.1.3".to_string(),
                )]),
            },
        ];

        let nodes = transform_nodes(raw);
        assert_eq!(nodes["1.1.1.1"][&1].aws_id, "i1");
        // Malformed and missing ports both default to 0.
        assert_eq!(nodes["1.1.1.2"][&0].aws_id, "i2");
        assert_eq!(nodes["1.1.1.3"][&0].aws_id, "i3");
    }

    #[test]
    fn test_rekey_healths_to_synthetic_ids() {
        let source = test_source("aws_");

        let mut service = Service::default();
        service.nodes.entry("1.1.1.1".to_string()).or_default().insert(
            6379,
            Node {
                port: 6379,
                host: "1.1.1.1".to_string(),
                aws_id: "srv-2_1.1.1.1_6379".to_string(),
                ..Default::default()
            },
        );
        source
            .store
            .set_all(HashMap::from([("redis".to_string(), service)]));

        let healths = HashMap::from([
            ("srv-2_1.1.1.1_6379".to_string(), Health::Passing),
            // Not in the snapshot yet: dropped until the next poll.
            ("srv-2_2.2.2.2_6379".to_string(), Health::Critical),
        ]);

        let rekeyed = source.rekey_healths("redis", "srv-2", healths);
        assert_eq!(
            rekeyed,
            HashMap::from([("srv-2_1.1.1.1_6379".to_string(), Health::Passing)])
        );
    }

    #[test]
    fn test_instance_attributes_override_endpoint() {
        let node = Node {
            host: "1.1.1.1".to_string(),
            port: 6379,
            attributes: HashMap::from([
                ("BARFU".to_string(), "FUBAR".to_string()),
                (AWS_INSTANCE_IPV4.to_string(), "9.9.9.9".to_string()),
            ]),
            ..Default::default()
        };

        let attributes = instance_attributes("1.1.1.1", &node);
        assert_eq!(attributes[AWS_INSTANCE_IPV4], "1.1.1.1");
        assert_eq!(attributes[AWS_INSTANCE_PORT], "6379");
        assert_eq!(attributes["BARFU"], "FUBAR");
    }
}
