//! Command line surface of the sync daemon.

use clap::{Args, Parser, Subcommand};

use crate::common::SyncResult;
use crate::core::config::{DEFAULT_DNS_TTL, DEFAULT_POLL_INTERVAL, SyncConfig};

/// Sync AWS Cloud Map services and Consul services.
#[derive(Parser, Debug)]
#[command(name = "consul-cloudmap")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sync the Consul catalog with an AWS Cloud Map namespace
    SyncCatalog(SyncCatalogArgs),

    /// Print the version
    Version,
}

#[derive(Args, Debug)]
pub struct SyncCatalogArgs {
    /// If set, Cloud Map services will be synced to Consul
    #[arg(long = "to-consul")]
    pub to_consul: bool,

    /// If set, Consul services will be synced to Cloud Map
    #[arg(long = "to-aws")]
    pub to_aws: bool,

    /// The AWS Cloud Map namespace to sync with Consul services
    #[arg(long = "aws-namespace-id", default_value = "")]
    pub aws_namespace_id: String,

    /// A prefix to prepend to all services written to Cloud Map from Consul
    #[arg(long = "aws-service-prefix", default_value = "")]
    pub aws_service_prefix: String,

    /// A prefix to prepend to all services written to Consul from Cloud Map
    #[arg(long = "consul-service-prefix", default_value = "")]
    pub consul_service_prefix: String,

    /// The interval between fetching from AWS Cloud Map. Accepts a decimal
    /// number with a unit suffix, such as "300ms", "10s", "1.5m"
    #[arg(long = "aws-poll-interval", default_value = DEFAULT_POLL_INTERVAL)]
    pub aws_poll_interval: String,

    /// [DEPRECATED] Use --aws-poll-interval instead
    #[arg(long = "aws-pull-interval", default_value = DEFAULT_POLL_INTERVAL)]
    pub aws_pull_interval: String,

    /// DNS TTL in seconds for services created in AWS Cloud Map
    #[arg(long = "aws-dns-ttl", default_value_t = DEFAULT_DNS_TTL)]
    pub aws_dns_ttl: i64,

    /// Permit stale reads from the Consul catalog
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub stale: bool,

    /// Consul namespace to sync (Consul Enterprise)
    #[arg(long = "consul-namespace", default_value = "")]
    pub consul_namespace: String,

    /// Consul admin partition to sync (Consul Enterprise)
    #[arg(long = "consul-partition", default_value = "")]
    pub consul_partition: String,

    /// Consul agent address (falls back to CONSUL_HTTP_ADDR)
    #[arg(long = "http-addr", default_value = "")]
    pub http_addr: String,

    /// Consul ACL token (falls back to CONSUL_HTTP_TOKEN)
    #[arg(long = "token", default_value = "")]
    pub token: String,
}

impl SyncCatalogArgs {
    /// Resolve flags, environment fallbacks and the deprecated interval
    /// alias into a validated [`SyncConfig`].
    pub fn into_config(self) -> SyncResult<SyncConfig> {
        let mut poll_interval = self.aws_poll_interval;
        if poll_interval == DEFAULT_POLL_INTERVAL && self.aws_pull_interval != DEFAULT_POLL_INTERVAL
        {
            tracing::info!(
                "please use --aws-poll-interval instead of the deprecated --aws-pull-interval"
            );
            poll_interval = self.aws_pull_interval;
        }

        let defaults = SyncConfig::default();
        let config = SyncConfig {
            to_aws: self.to_aws,
            to_consul: self.to_consul,
            aws_namespace_id: self.aws_namespace_id,
            consul_prefix: self.consul_service_prefix,
            aws_prefix: self.aws_service_prefix,
            poll_interval: SyncConfig::parse_poll_interval(&poll_interval)?,
            dns_ttl: self.aws_dns_ttl,
            stale: self.stale,
            consul_namespace: self.consul_namespace,
            consul_partition: self.consul_partition,
            consul_http_addr: if self.http_addr.is_empty() {
                defaults.consul_http_addr
            } else {
                self.http_addr
            },
            consul_http_token: if self.token.is_empty() {
                defaults.consul_http_token
            } else {
                self.token
            },
        };
        config.validate()?;
        Ok(config)
    }
}
