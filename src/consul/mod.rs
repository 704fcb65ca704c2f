//! Consul registry adapter and the Consul-side sync source.

pub mod client;
pub mod source;

pub use client::{ConsulApi, HttpConsul};
pub use source::ConsulSource;
