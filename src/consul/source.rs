//! Consul side of the sync engine.
//!
//! [`ConsulSource`] owns the Consul snapshot and everything that mutates it:
//! the long-poll fetch loop that rebuilds it, and the create/remove appliers
//! the Cloud Map -> Consul reconciler drives against the Consul catalog.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::catalog::service::{
    CONSUL_AWS_ID, CONSUL_AWS_NODE_NAME, CONSUL_AWS_NS, CONSUL_AWS_TAG, CONSUL_SOURCE_KEY, Health,
    HealthMap, Node, NodeMap, Service, ServiceMap, host_port_from_id, instance_id,
};
use crate::catalog::snapshot::Snapshot;
use crate::common::{SyncError, SyncResult};
use crate::consul::client::{
    AgentCheck, AgentService, CatalogRegistration, CatalogService, ConsulApi, HealthCheck,
};

/// Consecutive long-poll failures tolerated before the fetch loop gives up.
const MAX_CONSECUTIVE_ERRORS: u32 = 10;
/// Pause between failed long-poll attempts.
const RETRY_DELAY: Duration = Duration::from_millis(500);

pub struct ConsulSource {
    api: Arc<dyn ConsulApi>,
    store: Snapshot,
    trigger: mpsc::Sender<()>,
    /// Prefix prepended to Cloud-Map-sourced services written into Consul,
    /// and stripped again when the fetcher sees the `aws` tag.
    consul_prefix: String,
}

impl ConsulSource {
    pub fn new(
        api: Arc<dyn ConsulApi>,
        store: Snapshot,
        trigger: mpsc::Sender<()>,
        consul_prefix: impl Into<String>,
    ) -> Self {
        Self {
            api,
            store,
            trigger,
            consul_prefix: consul_prefix.into(),
        }
    }

    /// Current Consul snapshot.
    pub fn services(&self) -> ServiceMap {
        self.store.get_all()
    }

    // ========================================================================
    // Fetching
    // ========================================================================

    /// Long-poll loop rebuilding the Consul snapshot whenever the catalog
    /// index advances. Gives up with [`SyncError::FatalFetch`] after
    /// [`MAX_CONSECUTIVE_ERRORS`] failures in a row, which unwinds the
    /// whole sync through the orchestrator.
    pub async fn run_fetch(self: Arc<Self>, cancel: CancellationToken) -> SyncResult<()> {
        let mut wait_index: u64 = 1;
        let mut consecutive_errors: u32 = 0;
        loop {
            match self.fetch_once(wait_index).await {
                Ok(new_index) => {
                    consecutive_errors = 0;
                    wait_index = new_index;
                    // Coalesce: the pulse is dropped when the reconciler is
                    // still working off the previous one.
                    let _ = self.trigger.try_send(());
                }
                Err(e) => {
                    tracing::error!(error = %e, "error fetching from consul");
                    consecutive_errors += 1;
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        return Err(SyncError::FatalFetch(consecutive_errors));
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(RETRY_DELAY) => {}
                    }
                }
            }
            if cancel.is_cancelled() {
                return Ok(());
            }
        }
    }

    /// One fetch pass: blocking catalog listing, then nodes and checks per
    /// service, then atomic snapshot publication. Returns the new index.
    pub async fn fetch_once(&self, wait_index: u64) -> SyncResult<u64> {
        let (raw, new_index) = self.api.list_services(wait_index).await?;

        let mut services = ServiceMap::new();
        for (name, service) in self.transform_services(raw) {
            if service.from_aws || service.tags.is_empty() {
                // Imported services are keyed bare: their `aws` tag is the
                // provenance marker, not a tag-segmented variant, and the
                // cross-registry key must match the Cloud Map side.
                let mapped = self.map_service_with_tag(&name, service, "").await;
                services.insert(name, mapped);
            } else {
                // Tag fan-out: each tag-segmented variant of a native
                // service is mirrored independently under "<tag>.<name>".
                for tag in service.tags.clone() {
                    let mapped = self.map_service_with_tag(&name, service.clone(), &tag).await;
                    services.insert(format!("{tag}.{name}"), mapped);
                }
            }
        }

        self.store.set_all(services);
        Ok(new_index)
    }

    /// Catalog listing -> skeleton services keyed by canonical name.
    /// Imported services are recognized by the `aws` tag and lose their
    /// Consul-side prefix.
    fn transform_services(&self, raw: HashMap<String, Vec<String>>) -> ServiceMap {
        let mut services = ServiceMap::with_capacity(raw.len());
        for (registry_name, tags) in raw {
            let from_aws = tags.iter().any(|t| t == CONSUL_AWS_TAG);
            let name = if from_aws {
                registry_name
                    .strip_prefix(&self.consul_prefix)
                    .unwrap_or(&registry_name)
                    .to_string()
            } else {
                registry_name.clone()
            };
            services.insert(
                name.clone(),
                Service {
                    id: registry_name.clone(),
                    name,
                    consul_id: registry_name,
                    from_aws,
                    tags,
                    ..Default::default()
                },
            );
        }
        services
    }

    /// Fill one service's nodes and healths. Queries go by the prefixed
    /// registry name; imported services additionally get their healths
    /// rekeyed into Cloud Map instance IDs.
    async fn map_service_with_tag(&self, canonical: &str, mut service: Service, tag: &str) -> Service {
        let registry_name = if service.from_aws {
            format!("{}{}", self.consul_prefix, canonical)
        } else {
            canonical.to_string()
        };

        match self.api.list_nodes(&registry_name, tag).await {
            Ok(raw) => service.nodes = transform_nodes(raw),
            Err(e) => {
                tracing::error!(error = %e, service = %registry_name, "error fetching nodes");
                return service;
            }
        }

        match self.api.list_checks(&registry_name).await {
            Ok(raw) => service.healths = transform_health(raw),
            Err(e) => {
                tracing::error!(error = %e, service = %registry_name, "error fetching health");
            }
        }

        if service.from_aws {
            let healths = std::mem::take(&mut service.healths);
            service.healths = self.rekey_healths(&service.name, healths);
        }

        service
    }

    /// Rewrite an imported service's health keys from the synthetic Consul
    /// check service-ID into the Cloud Map instance ID recorded in the
    /// previously published snapshot, so the diff against the Cloud Map
    /// snapshot compares the same identity space. Unknown instances drop out.
    fn rekey_healths(&self, name: &str, healths: HealthMap) -> HealthMap {
        let mut rekeyed = HealthMap::new();
        for (check_service_id, health) in healths {
            let (host, port) = host_port_from_id(&check_service_id);
            if let Some(aws_id) = self.store.aws_id_for(name, &host, port) {
                rekeyed.insert(aws_id, health);
            }
        }
        rekeyed
    }

    // ========================================================================
    // Applying (Cloud Map -> Consul direction)
    // ========================================================================

    /// Register the given Cloud-Map-sourced services into the Consul
    /// catalog. Node registrations run concurrently and are joined before
    /// the check registrations, which resolve their nodes through the
    /// snapshot. Returns the number of successful writes.
    pub async fn apply_create(&self, services: ServiceMap) -> usize {
        let mut count = 0;
        for (key, service) in services {
            if service.from_consul {
                continue;
            }
            let name = format!("{}{}", self.consul_prefix, key);

            let mut registrations = Vec::new();
            for (host, ports) in &service.nodes {
                for node in ports.values() {
                    let api = self.api.clone();
                    let store = self.store.clone();
                    let key = key.clone();
                    let name = name.clone();
                    let host = host.clone();
                    let node = node.clone();
                    let aws_namespace = service.aws_namespace.clone();
                    registrations.push(tokio::spawn(async move {
                        let registration =
                            node_registration(&key, &name, &host, &node, &aws_namespace);
                        match api.register(&registration).await {
                            Ok(()) => {
                                // Record the cross-registry identity so the
                                // next rekeying pass can resolve it.
                                store.set_node(&key, &host, node.port, node);
                                true
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "cannot create service");
                                false
                            }
                        }
                    }));
                }
            }
            for handle in registrations {
                if matches!(handle.await, Ok(true)) {
                    count += 1;
                }
            }

            let mut checks = Vec::new();
            for (aws_id, health) in &service.healths {
                let Some(node) = self.store.node_for_aws_id(&key, aws_id) else {
                    continue;
                };
                let api = self.api.clone();
                let key = key.clone();
                let health = *health;
                checks.push(tokio::spawn(async move {
                    let registration = check_registration(&key, &node, health);
                    match api.register(&registration).await {
                        Ok(()) => true,
                        Err(e) => {
                            let id = instance_id(&key, &node.host, node.port);
                            tracing::error!(error = %e, id = %id, "cannot create healthcheck");
                            false
                        }
                    }
                }));
            }
            for handle in checks {
                if matches!(handle.await, Ok(true)) {
                    count += 1;
                }
            }
        }
        count
    }

    /// Deregister previously imported endpoints that have disappeared from
    /// the Cloud Map side. No service-level delete is needed; Consul
    /// collects orphan services implicitly.
    pub async fn apply_remove(&self, services: ServiceMap) -> usize {
        let mut handles = Vec::new();
        for (key, service) in services {
            if !service.from_aws {
                continue;
            }
            for (host, ports) in &service.nodes {
                for port in ports.keys() {
                    let api = self.api.clone();
                    let service_id = instance_id(&key, host, *port);
                    handles.push(tokio::spawn(async move {
                        match api.deregister(CONSUL_AWS_NODE_NAME, &service_id).await {
                            Ok(()) => true,
                            Err(e) => {
                                tracing::error!(error = %e, "cannot remove service");
                                false
                            }
                        }
                    }));
                }
            }
        }

        let mut count = 0;
        for handle in handles {
            if matches!(handle.await, Ok(true)) {
                count += 1;
            }
        }
        count
    }
}

/// Catalog entries -> `host -> port -> node`.
fn transform_nodes(catalog_nodes: Vec<CatalogService>) -> NodeMap {
    let mut nodes = NodeMap::new();
    for entry in catalog_nodes {
        // Use Address instead of ServiceAddress; some services rewrite
        // ServiceAddress to their internal DNS name, which breaks matching.
        let address = entry.address;
        let aws_id = entry
            .service_meta
            .get(CONSUL_AWS_ID)
            .cloned()
            .unwrap_or_default();
        nodes.entry(address.clone()).or_default().insert(
            entry.service_port,
            Node {
                name: entry.node,
                port: entry.service_port,
                host: address,
                consul_id: entry.service_id,
                aws_id,
                attributes: entry.service_meta,
            },
        );
    }
    nodes
}

/// Health checks -> per-instance health, keyed by the check's service ID.
fn transform_health(checks: Vec<HealthCheck>) -> HealthMap {
    checks
        .into_iter()
        .map(|check| {
            (
                check.service_id,
                Health::from_consul_status(&check.status),
            )
        })
        .collect()
}

fn node_registration(
    key: &str,
    name: &str,
    host: &str,
    node: &Node,
    aws_namespace: &str,
) -> CatalogRegistration {
    let mut meta = node.attributes.clone();
    meta.insert(CONSUL_SOURCE_KEY.to_string(), CONSUL_AWS_TAG.to_string());
    meta.insert(CONSUL_AWS_NS.to_string(), aws_namespace.to_string());
    meta.insert(CONSUL_AWS_ID.to_string(), node.aws_id.clone());

    CatalogRegistration {
        node: CONSUL_AWS_NODE_NAME.to_string(),
        address: host.to_string(),
        node_meta: HashMap::from([(
            CONSUL_SOURCE_KEY.to_string(),
            CONSUL_AWS_TAG.to_string(),
        )]),
        skip_node_update: true,
        service: Some(AgentService {
            id: instance_id(key, host, node.port),
            service: name.to_string(),
            tags: vec![CONSUL_AWS_TAG.to_string()],
            meta,
            address: host.to_string(),
            port: node.port,
        }),
        check: None,
    }
}

fn check_registration(key: &str, node: &Node, health: Health) -> CatalogRegistration {
    let service_id = instance_id(key, &node.host, node.port);
    CatalogRegistration {
        node: CONSUL_AWS_NODE_NAME.to_string(),
        skip_node_update: true,
        check: Some(AgentCheck {
            check_id: format!("check{service_id}"),
            service_id,
            node: CONSUL_AWS_NODE_NAME.to_string(),
            name: "AWS Route53 Health Check".to_string(),
            status: health.as_check_status().to_string(),
        }),
        ..Default::default()
    }
}
