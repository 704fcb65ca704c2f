//! Catalog data model shared by both registry sides.
//!
//! A [`Service`] is keyed across registries by its canonical (un-prefixed)
//! name. Nodes are keyed `host -> port -> node`; two nodes can never share a
//! `(host, port)` within one service.

use std::collections::HashMap;

/// Node name under which all imported services are registered in Consul.
pub const CONSUL_AWS_NODE_NAME: &str = "consul-aws";
/// Tag attached to Consul services imported from Cloud Map.
pub const CONSUL_AWS_TAG: &str = "aws";
/// Meta key marking the external source of an imported Consul service.
pub const CONSUL_SOURCE_KEY: &str = "external-source";
/// Meta key carrying the Cloud Map namespace ID on imported Consul services.
pub const CONSUL_AWS_NS: &str = "external-aws-ns";
/// Meta key carrying the Cloud Map instance ID on imported Consul services.
pub const CONSUL_AWS_ID: &str = "external-aws-id";

/// Sentinel description marking Cloud Map services imported from Consul.
pub const AWS_SERVICE_DESCRIPTION: &str = "Imported from Consul";
/// Cloud Map instance attribute holding the endpoint IPv4 address.
pub const AWS_INSTANCE_IPV4: &str = "AWS_INSTANCE_IPV4";
/// Cloud Map instance attribute holding the endpoint port.
pub const AWS_INSTANCE_PORT: &str = "AWS_INSTANCE_PORT";

/// Health of a single service instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Health {
    Passing,
    Critical,
    #[default]
    Unknown,
}

impl Health {
    /// Consul check status wire value. `Unknown` maps to the empty string.
    pub fn as_check_status(&self) -> &'static str {
        match self {
            Health::Passing => "passing",
            Health::Critical => "critical",
            Health::Unknown => "",
        }
    }

    pub fn from_consul_status(status: &str) -> Self {
        match status {
            "passing" => Health::Passing,
            "critical" => Health::Critical,
            _ => Health::Unknown,
        }
    }
}

/// `host -> port -> node`
pub type NodeMap = HashMap<String, HashMap<u16, Node>>;
/// instance key -> health
pub type HealthMap = HashMap<String, Health>;
/// canonical name -> service
pub type ServiceMap = HashMap<String, Service>;

/// A single endpoint of a service, identified by `(host, port)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Node {
    /// Catalog node name (Consul side only).
    pub name: String,
    pub host: String,
    /// 0 when the registry reports no port.
    pub port: u16,
    pub consul_id: String,
    pub aws_id: String,
    pub attributes: HashMap<String, String>,
}

/// A logical named group of instances, tracked on both registry sides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Service {
    /// Registry-native identifier of the record this was built from.
    pub id: String,
    /// Canonical name: the un-prefixed cross-registry key.
    pub name: String,
    pub consul_id: String,
    pub aws_id: String,
    pub aws_namespace: String,
    /// At most one of `from_consul` / `from_aws` is true; a service not
    /// marked imported is native.
    pub from_consul: bool,
    pub from_aws: bool,
    pub tags: Vec<String>,
    pub nodes: NodeMap,
    pub healths: HealthMap,
}

/// Synthetic instance identifier: `<serviceId>_<host>_<port>`.
///
/// Used as the Cloud Map instance ID and as the Consul service ID of
/// imported entries, and parsed back by [`host_port_from_id`].
pub fn instance_id(id: &str, host: &str, port: u16) -> String {
    format!("{id}_{host}_{port}")
}

/// Extract `(host, port)` from a synthetic instance identifier.
///
/// Only the last two underscore-separated fields are read, so identifiers
/// whose service part itself contains `_` parse correctly. A malformed
/// port yields 0.
pub fn host_port_from_id(id: &str) -> (String, u16) {
    let parts: Vec<&str> = id.split('_').collect();
    if parts.len() >= 2 {
        let host = parts[parts.len() - 2].to_string();
        let port = parts[parts.len() - 1].parse().unwrap_or(0);
        (host, port)
    } else {
        (String::new(), 0)
    }
}
