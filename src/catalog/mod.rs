//! Registry-neutral catalog model: services, nodes, healths, snapshots and
//! the differential reconciliation that compares them.

pub mod diff;
pub mod service;
pub mod snapshot;

pub use diff::{diff_healths, diff_nodes, only_in_first};
pub use service::{Health, HealthMap, Node, NodeMap, Service, ServiceMap};
pub use snapshot::Snapshot;
