//! In-memory snapshot of one registry side with reader/writer locking.
//!
//! The snapshot is replaced wholesale after each successful fetch; readers
//! always observe a fully constructed map, never partial state. The one
//! point mutation, [`Snapshot::set_node`], records a node's cross-registry
//! identity on the Consul store right after a successful write so the next
//! rekeying pass can resolve it without waiting for a fetch.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::catalog::service::{Node, Service, ServiceMap};

#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    services: Arc<RwLock<ServiceMap>>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self {
            services: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Current snapshot. Callers treat the returned map as immutable.
    pub fn get_all(&self) -> ServiceMap {
        self.services.read().unwrap().clone()
    }

    pub fn get(&self, name: &str) -> Option<Service> {
        self.services.read().unwrap().get(name).cloned()
    }

    /// Atomic wholesale replacement after a successful fetch.
    pub fn set_all(&self, services: ServiceMap) {
        *self.services.write().unwrap() = services;
    }

    /// Point update recording a node under an existing service.
    pub fn set_node(&self, name: &str, host: &str, port: u16, node: Node) {
        let mut services = self.services.write().unwrap();
        if let Some(service) = services.get_mut(name) {
            service
                .nodes
                .entry(host.to_string())
                .or_default()
                .insert(port, node);
        }
    }

    /// Cloud Map instance ID of the node at `(host, port)`, if known.
    pub fn aws_id_for(&self, name: &str, host: &str, port: u16) -> Option<String> {
        let services = self.services.read().unwrap();
        let node = services.get(name)?.nodes.get(host)?.get(&port)?;
        Some(node.aws_id.clone())
    }

    /// Node of `name` whose Cloud Map instance ID equals `aws_id`.
    pub fn node_for_aws_id(&self, name: &str, aws_id: &str) -> Option<Node> {
        let services = self.services.read().unwrap();
        services
            .get(name)?
            .nodes
            .values()
            .flat_map(|ports| ports.values())
            .find(|node| node.aws_id == aws_id)
            .cloned()
    }

}
