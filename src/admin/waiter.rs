//! Confirmation wait for appended admin commands.

use crate::admin::error::AdminError;
use crate::external::ConsumptionTracker;
use log::debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Block until the cluster's consumer reports it has applied `execution_id`
/// (or a later one) for the store, polling at a fixed interval.
///
/// On deadline the error carries the last id the consumer did reach and its
/// last recorded error for the store, so operators can tell a slow consumer
/// from a wedged one.
pub async fn wait_for_consumption(
    tracker: &Arc<dyn ConsumptionTracker>,
    cluster: &str,
    store: &str,
    execution_id: u64,
    deadline: Duration,
    poll_interval: Duration,
) -> Result<(), AdminError> {
    let started = Instant::now();
    loop {
        let applied = tracker.last_applied_execution_id(cluster, store).await;
        if applied.map(|id| id >= execution_id).unwrap_or(false) {
            debug!(
                "Cluster '{}': command {} for store '{}' confirmed consumed after {:?}",
                cluster,
                execution_id,
                store,
                started.elapsed()
            );
            return Ok(());
        }
        if started.elapsed() >= deadline {
            return Err(AdminError::ConsumptionTimeout {
                cluster: cluster.to_string(),
                store: store.to_string(),
                execution_id,
                last_seen: applied,
                consumer_error: tracker.last_error(cluster, store).await,
            });
        }
        sleep(poll_interval).await;
    }
}
