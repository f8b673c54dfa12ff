//! Per-cluster execution id issuance.

use crate::external::MetadataStore;
use log::warn;
use std::sync::Arc;

/// Hands out strictly increasing execution ids per cluster, backed by the
/// shared metadata store so ids survive coordinator restarts.
///
/// Ids are only ever issued under the cluster's admin lock, so read-increment-
/// write here needs no locking of its own.
pub struct ExecutionIdSequencer {
    metadata: Arc<dyn MetadataStore>,
}

impl ExecutionIdSequencer {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        ExecutionIdSequencer { metadata }
    }

    /// Issue the next execution id for the cluster and persist the new
    /// high-water mark before returning it.
    pub async fn next(&self, cluster: &str) -> u64 {
        let next = self.metadata.last_generated_execution_id(cluster).await + 1;
        self.metadata
            .set_last_generated_execution_id(cluster, next)
            .await;
        next
    }

    /// Repair generator drift against the consumer's high-water mark.
    ///
    /// After a metadata rollback the persisted last-generated id can sit
    /// behind what the cluster's consumer has already applied. Issuing from
    /// the stale mark would produce ids the consumer silently skips, so the
    /// generated mark is fast-forwarded to the consumed one. Called once per
    /// cluster per coordinator lifetime, before the first id is issued.
    pub async fn reconcile(&self, cluster: &str, last_consumed: Option<u64>) {
        let Some(consumed) = last_consumed else {
            return;
        };
        let generated = self.metadata.last_generated_execution_id(cluster).await;
        if generated < consumed {
            warn!(
                "Cluster '{}': last generated execution id {} is behind last consumed {}, \
                 fast-forwarding the generator",
                cluster, generated, consumed
            );
            self.metadata
                .set_last_generated_execution_id(cluster, consumed)
                .await;
        }
    }
}
