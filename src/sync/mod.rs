//! Lifecycle orchestration: wires the two sources, their snapshot stores
//! and trigger channels, and runs the four long-running tasks until an
//! external shutdown or the first task exit.

pub mod reconciler;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::aws::{AwsSource, CloudMapApi};
use crate::catalog::Snapshot;
use crate::common::{SyncError, SyncResult};
use crate::consul::{ConsulApi, ConsulSource};
use crate::core::config::SyncConfig;
use crate::core::tasks::{BackgroundTasks, TaskKind};

/// Everything the sync engine needs: the configuration and the two registry
/// clients, which the CLI builds and tests replace with in-memory fakes.
pub struct SyncInput {
    pub config: SyncConfig,
    pub consul: Arc<dyn ConsulApi>,
    pub aws: Arc<dyn CloudMapApi>,
}

/// Run the bidirectional sync until `shutdown` is cancelled.
///
/// A failed namespace lookup is fatal and prevents any task from
/// launching. After startup the only error path is a task exiting on its
/// own, which unwinds the other three; its terminal error (e.g. the Consul
/// fetcher's [`SyncError::FatalFetch`]) is the one surfaced to the caller.
pub async fn run(input: SyncInput, shutdown: CancellationToken) -> SyncResult<()> {
    let SyncInput {
        config,
        consul: consul_api,
        aws: aws_api,
    } = input;

    let namespace = aws_api.get_namespace(&config.aws_namespace_id).await?;
    tracing::info!(
        id = %namespace.id,
        name = %namespace.name,
        http = namespace.is_http,
        "mirroring cloud map namespace"
    );

    let (consul_trigger_tx, consul_trigger_rx) = mpsc::channel(1);
    let (aws_trigger_tx, aws_trigger_rx) = mpsc::channel(1);

    let consul = Arc::new(ConsulSource::new(
        consul_api,
        Snapshot::new(),
        consul_trigger_tx,
        config.consul_prefix.clone(),
    ));
    let aws = Arc::new(AwsSource::new(
        aws_api,
        Snapshot::new(),
        aws_trigger_tx,
        namespace,
        config.aws_prefix.clone(),
        config.poll_interval,
        config.dns_ttl,
    ));

    let mut tasks = BackgroundTasks::new();
    {
        let consul = consul.clone();
        tasks.spawn("consul-fetch", TaskKind::Listener, move |cancel| {
            consul.run_fetch(cancel)
        });
    }
    {
        let aws = aws.clone();
        tasks.spawn("cloud-map-fetch", TaskKind::Periodic, move |cancel| {
            aws.run_fetch(cancel)
        });
    }
    {
        let consul = consul.clone();
        let aws = aws.clone();
        let enabled = config.to_aws;
        tasks.spawn("to-aws", TaskKind::Worker, move |cancel| {
            reconciler::run_to_aws(consul, aws, consul_trigger_rx, enabled, cancel)
        });
    }
    {
        let enabled = config.to_consul;
        tasks.spawn("to-consul", TaskKind::Worker, move |cancel| {
            reconciler::run_to_consul(consul, aws, aws_trigger_rx, enabled, cancel)
        });
    }
    tasks.log_summary();

    match tasks.run_until_shutdown(shutdown).await {
        None => Ok(()),
        Some((_, Err(e))) => Err(e),
        Some((name, Ok(()))) => Err(SyncError::WorkerExited(name)),
    }
}
