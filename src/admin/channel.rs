//! Ordered admin command submission, one channel per cluster.

use crate::admin::error::AdminError;
use crate::admin::operation::{AdminCommand, AdminOperation};
use crate::admin::sequencer::ExecutionIdSequencer;
use crate::admin::waiter::wait_for_consumption;
use crate::external::{ConsumptionTracker, MessageLog, MetadataStore};
use crate::topics::naming::admin_topic_name;
use log::info;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;

struct ClusterChannel {
    topic: String,
    /// Serializes id issuance and append for the cluster. Held across the
    /// whole submit critical section so two submissions can never interleave
    /// between taking an id and appending it.
    lock: tokio::sync::Mutex<()>,
    /// Whether the sequencer has been reconciled against the consumer's
    /// high-water mark in this coordinator lifetime.
    validated: AtomicBool,
}

/// Tunables for the submission path.
#[derive(Clone, Copy, Debug)]
pub struct ChannelSettings {
    pub lock_timeout: Duration,
    pub confirmation_deadline: Duration,
    pub poll_interval: Duration,
    pub admin_topic_partitions: u32,
    pub admin_topic_replication: u32,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        ChannelSettings {
            lock_timeout: Duration::from_secs(10),
            confirmation_deadline: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            admin_topic_partitions: 1,
            admin_topic_replication: 3,
        }
    }
}

/// Per-cluster submission path: serialize, append to the cluster's admin
/// topic, then wait for the consumer to confirm application.
pub struct AdminCommandChannel {
    log: Arc<dyn MessageLog>,
    tracker: Arc<dyn ConsumptionTracker>,
    sequencer: ExecutionIdSequencer,
    channels: Mutex<HashMap<String, Arc<ClusterChannel>>>,
    settings: ChannelSettings,
}

impl AdminCommandChannel {
    pub fn new(
        log: Arc<dyn MessageLog>,
        tracker: Arc<dyn ConsumptionTracker>,
        metadata: Arc<dyn MetadataStore>,
        settings: ChannelSettings,
    ) -> Self {
        AdminCommandChannel {
            log,
            tracker,
            sequencer: ExecutionIdSequencer::new(metadata),
            channels: Mutex::new(HashMap::new()),
            settings,
        }
    }

    /// Open the channel for a cluster, creating its admin topic if needed.
    /// Idempotent.
    pub async fn open(&self, cluster: &str) -> Result<(), AdminError> {
        let topic = admin_topic_name(cluster);
        self.log
            .create_topic_if_absent(
                &topic,
                self.settings.admin_topic_partitions,
                self.settings.admin_topic_replication,
            )
            .await?;
        let mut channels = self.channels.lock().unwrap();
        channels.entry(cluster.to_string()).or_insert_with(|| {
            Arc::new(ClusterChannel {
                topic,
                lock: tokio::sync::Mutex::new(()),
                validated: AtomicBool::new(false),
            })
        });
        Ok(())
    }

    pub fn close(&self, cluster: &str) {
        self.channels.lock().unwrap().remove(cluster);
    }

    pub fn is_open(&self, cluster: &str) -> bool {
        self.channels.lock().unwrap().contains_key(cluster)
    }

    /// Submit one admin operation and wait until the cluster's consumer
    /// confirms it applied. Returns the assigned execution id.
    ///
    /// The command is appended exactly once. A confirmation timeout is
    /// surfaced as an error without retrying the append, since the command
    /// may still be applied later.
    pub async fn submit(
        &self,
        cluster: &str,
        store: &str,
        operation: AdminOperation,
    ) -> Result<u64, AdminError> {
        let channel = {
            let channels = self.channels.lock().unwrap();
            channels
                .get(cluster)
                .cloned()
                .ok_or_else(|| AdminError::ClusterNotStarted(cluster.to_string()))?
        };

        if let Some(consumer_error) = self.tracker.last_error(cluster, store).await {
            return Err(AdminError::ChannelFaulted {
                cluster: cluster.to_string(),
                store: store.to_string(),
                consumer_error,
            });
        }

        let _guard = timeout(self.settings.lock_timeout, channel.lock.lock())
            .await
            .map_err(|_| AdminError::LockTimeout {
                cluster: cluster.to_string(),
                waited: self.settings.lock_timeout,
            })?;

        if !channel.validated.swap(true, Ordering::SeqCst) {
            let consumed = self.tracker.last_consumed_execution_id(cluster).await;
            self.sequencer.reconcile(cluster, consumed).await;
        }

        let execution_id = self.sequencer.next(cluster).await;
        let command = AdminCommand {
            cluster: cluster.to_string(),
            store: store.to_string(),
            execution_id,
            operation,
        };
        let kind = command.operation.kind();
        let offset = self.log.append(&channel.topic, command.to_bytes()).await?;
        info!(
            "Cluster '{}': appended {} for store '{}' as execution id {} at offset {}",
            cluster, kind, store, execution_id, offset
        );

        wait_for_consumption(
            &self.tracker,
            cluster,
            store,
            execution_id,
            self.settings.confirmation_deadline,
            self.settings.poll_interval,
        )
        .await?;
        Ok(execution_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::memory::{InMemoryConsumptionTracker, InMemoryLog, InMemoryMetadataStore};

    fn fast_settings() -> ChannelSettings {
        ChannelSettings {
            lock_timeout: Duration::from_millis(200),
            confirmation_deadline: Duration::from_millis(200),
            poll_interval: Duration::from_millis(5),
            admin_topic_partitions: 1,
            admin_topic_replication: 1,
        }
    }

    fn wired_channel() -> (Arc<InMemoryLog>, Arc<InMemoryConsumptionTracker>, AdminCommandChannel)
    {
        let tracker = Arc::new(InMemoryConsumptionTracker::new());
        let log = Arc::new(InMemoryLog::with_consumer(tracker.clone(), None));
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let channel = AdminCommandChannel::new(
            log.clone(),
            tracker.clone(),
            metadata,
            fast_settings(),
        );
        (log, tracker, channel)
    }

    #[tokio::test]
    async fn test_submit_assigns_sequential_ids() {
        let (log, _tracker, channel) = wired_channel();
        channel.open("c").await.unwrap();
        let first = channel
            .submit("c", "s", AdminOperation::DeleteAllVersions)
            .await
            .unwrap();
        let second = channel
            .submit("c", "s", AdminOperation::DeleteAllVersions)
            .await
            .unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(log.topic_len(&admin_topic_name("c")), 2);
    }

    #[tokio::test]
    async fn test_submit_without_open_is_rejected() {
        let (_log, _tracker, channel) = wired_channel();
        let err = channel
            .submit("c", "s", AdminOperation::DeleteAllVersions)
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::ClusterNotStarted(_)));
    }

    #[tokio::test]
    async fn test_faulted_channel_refuses_before_append() {
        let (log, tracker, channel) = wired_channel();
        channel.open("c").await.unwrap();
        tracker.set_error("c", "s", "apply failed");
        let err = channel
            .submit("c", "s", AdminOperation::DeleteAllVersions)
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::ChannelFaulted { .. }));
        assert_eq!(log.topic_len(&admin_topic_name("c")), 0);
    }

    #[tokio::test]
    async fn test_confirmation_timeout_appends_exactly_once() {
        let (log, _tracker, channel) = wired_channel();
        channel.open("c").await.unwrap();
        log.set_acks_enabled(false);
        let err = channel
            .submit("c", "s", AdminOperation::DeleteAllVersions)
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::ConsumptionTimeout { .. }));
        assert_eq!(log.topic_len(&admin_topic_name("c")), 1);
    }

    #[tokio::test]
    async fn test_append_failure_is_surfaced() {
        let (log, _tracker, channel) = wired_channel();
        channel.open("c").await.unwrap();
        log.set_append_failure(Some("broker down"));
        let err = channel
            .submit("c", "s", AdminOperation::DeleteAllVersions)
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::Log(_)));
    }

    #[tokio::test]
    async fn test_first_submit_repairs_generator_drift() {
        let tracker = Arc::new(InMemoryConsumptionTracker::new());
        let log = Arc::new(InMemoryLog::with_consumer(tracker.clone(), None));
        let metadata = Arc::new(InMemoryMetadataStore::new());
        // Metadata rolled back: generator behind what the consumer applied.
        metadata.set_last_generated_execution_id("c", 2).await;
        tracker.set_last_consumed("c", 9);
        let channel =
            AdminCommandChannel::new(log, tracker, metadata, fast_settings());
        channel.open("c").await.unwrap();
        let id = channel
            .submit("c", "s", AdminOperation::DeleteAllVersions)
            .await
            .unwrap();
        assert_eq!(id, 10);
    }

    #[tokio::test]
    async fn test_close_tears_down_channel() {
        let (_log, _tracker, channel) = wired_channel();
        channel.open("c").await.unwrap();
        assert!(channel.is_open("c"));
        channel.close("c");
        assert!(!channel.is_open("c"));
        let err = channel
            .submit("c", "s", AdminOperation::DeleteAllVersions)
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::ClusterNotStarted(_)));
    }
}
