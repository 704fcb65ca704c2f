//! AWS Cloud Map registry adapter and the Cloud-Map-side sync source.

pub mod client;
pub mod source;

pub use client::{CloudInstance, CloudMap, CloudMapApi, CloudNamespace, CloudService};
pub use source::AwsSource;
