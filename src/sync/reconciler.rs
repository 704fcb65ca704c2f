//! Trigger-driven reconciliation loops, one per direction.
//!
//! Each loop waits on its own fetcher's trigger. Pulses coalesce on the
//! capacity-1 channel, so a slow cycle simply observes the latest snapshots
//! on its next wakeup instead of queueing stale work.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::aws::AwsSource;
use crate::catalog::only_in_first;
use crate::common::SyncResult;
use crate::consul::ConsulSource;

/// Consul -> Cloud Map: triggered by the Consul fetcher.
pub async fn run_to_aws(
    consul: Arc<ConsulSource>,
    aws: Arc<AwsSource>,
    mut trigger: mpsc::Receiver<()>,
    enabled: bool,
    cancel: CancellationToken,
) -> SyncResult<()> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            pulse = trigger.recv() => {
                if pulse.is_none() {
                    return Ok(());
                }
                if !enabled {
                    continue;
                }

                let create = only_in_first(&consul.services(), &aws.services());
                let created = aws.apply_create(create).await;
                if created > 0 {
                    tracing::info!(count = created, "created in cloud map");
                }

                let remove = only_in_first(&aws.services(), &consul.services());
                let removed = aws.apply_remove(remove).await;
                if removed > 0 {
                    tracing::info!(count = removed, "removed from cloud map");
                }
            }
        }
    }
}

/// Cloud Map -> Consul: triggered by the Cloud Map fetcher.
pub async fn run_to_consul(
    consul: Arc<ConsulSource>,
    aws: Arc<AwsSource>,
    mut trigger: mpsc::Receiver<()>,
    enabled: bool,
    cancel: CancellationToken,
) -> SyncResult<()> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            pulse = trigger.recv() => {
                if pulse.is_none() {
                    return Ok(());
                }
                if !enabled {
                    continue;
                }

                let create = only_in_first(&aws.services(), &consul.services());
                let created = consul.apply_create(create).await;
                if created > 0 {
                    tracing::info!(count = created, "created in consul");
                }

                let remove = only_in_first(&consul.services(), &aws.services());
                let removed = consul.apply_remove(remove).await;
                if removed > 0 {
                    tracing::info!(count = removed, "removed from consul");
                }
            }
        }
    }
}
