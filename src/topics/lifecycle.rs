//! Work topic lifecycle: ongoing-push detection and retention cleanup.

use crate::admin::error::AdminError;
use crate::external::{MessageLog, MetadataStore};
use crate::status::aggregator::StatusAggregator;
use crate::status::ExecutionStatus;
use crate::store::{Store, Version};
use crate::topics::naming;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Outcome of looking for an ongoing push on a store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CurrentPush {
    /// No live work topic; a new push may be admitted.
    None,
    /// A push is still running on this topic.
    Ongoing(String),
    /// The newest topic has no corresponding version record, most likely a
    /// push that died during version creation. The caller should kill it and
    /// then treat the store as having no ongoing push.
    Orphaned(String),
}

/// Decides which work topics are live, which block a new push and which are
/// stale enough to truncate.
pub struct TopicLifecycleManager {
    log: Arc<dyn MessageLog>,
    metadata: Arc<dyn MetadataStore>,
    aggregator: Arc<StatusAggregator>,
    max_errored_topics_to_keep: usize,
    status_retry_attempts: u32,
    status_retry_delay: Duration,
}

impl TopicLifecycleManager {
    pub fn new(
        log: Arc<dyn MessageLog>,
        metadata: Arc<dyn MetadataStore>,
        aggregator: Arc<StatusAggregator>,
        max_errored_topics_to_keep: usize,
        status_retry_attempts: u32,
        status_retry_delay: Duration,
    ) -> Self {
        TopicLifecycleManager {
            log,
            metadata,
            aggregator,
            max_errored_topics_to_keep,
            status_retry_attempts,
            status_retry_delay,
        }
    }

    /// All work topics (plain and reprocessing) belonging to the store.
    pub async fn existing_topics_for_store(&self, store: &str) -> Result<Vec<String>, AdminError> {
        let topics = self.log.list_topics().await?;
        Ok(topics
            .into_iter()
            .filter(|t| naming::belongs_to_store(t, store))
            .collect())
    }

    /// Work topics of the store in freshness order: the first entry is the
    /// newest version topic, the last the oldest.
    pub async fn topics_by_age(&self, store: &str) -> Result<Vec<String>, AdminError> {
        let mut topics = self.existing_topics_for_store(store).await?;
        // Ties between a version topic and its reprocessing companion resolve
        // to the version topic.
        topics.sort_by_key(|t| {
            (
                std::cmp::Reverse(naming::parse_version(t).unwrap_or(0)),
                naming::is_reprocessing_topic(t),
            )
        });
        Ok(topics)
    }

    /// Find the topic of the store's ongoing push, if any.
    ///
    /// The newest non-truncated topic is checked against the regions: while
    /// any region reports Unknown the query is retried a bounded number of
    /// times, since a transient connection failure must not admit a
    /// conflicting push. A terminal status clears the way and, for batch
    /// pushes, triggers retention cleanup over the store's older topics.
    pub async fn current_push_topic(
        &self,
        cluster: &str,
        store_name: &str,
        is_incremental: bool,
    ) -> Result<CurrentPush, AdminError> {
        let topics = self.topics_by_age(store_name).await?;
        let Some(latest) = topics.first().cloned() else {
            return Ok(CurrentPush::None);
        };
        debug!("Latest work topic for store '{}' is '{}'", store_name, latest);
        if self.log.is_topic_truncated(&latest).await? {
            return Ok(CurrentPush::None);
        }

        let store = self
            .metadata
            .get_store(cluster, store_name)
            .await
            .ok_or_else(|| AdminError::StoreNotFound {
                cluster: cluster.to_string(),
                store: store_name.to_string(),
            })?;
        let version = naming::parse_version(&latest);
        if version.and_then(|v| store.version(v)).is_none() {
            // The push created the topic but never registered a version,
            // probably a timeout during version creation.
            info!(
                "Found topic '{}' without a corresponding version record",
                latest
            );
            return Ok(CurrentPush::Orphaned(latest));
        }

        let mut status = ExecutionStatus::Progress;
        let mut unknown_seen = true;
        for attempt in 0..self.status_retry_attempts {
            let aggregated = self.aggregator.get_push_status(cluster, &latest, None).await?;
            status = aggregated.status;
            unknown_seen = aggregated
                .per_region
                .values()
                .any(|s| *s == ExecutionStatus::Unknown);
            if !unknown_seen {
                break;
            }
            if attempt + 1 < self.status_retry_attempts {
                sleep(self.status_retry_delay).await;
            }
        }
        if unknown_seen {
            error!(
                "Still missing status votes for topic '{}' after {} attempts, proceeding with {}",
                latest, self.status_retry_attempts, status
            );
        }

        if !status.is_terminal() {
            info!(
                "Job status {} for topic '{}' is not terminal, blocking new push",
                status, latest
            );
            return Ok(CurrentPush::Ongoing(latest));
        }
        if !is_incremental {
            self.truncate_stale_topics(&topics).await;
        }
        Ok(CurrentPush::None)
    }

    /// Keep at most `max_errored_topics_to_keep` non-truncated version topics
    /// for the store, truncating the oldest first. A truncated version topic
    /// drags its companion reprocessing topic along.
    pub async fn truncate_stale_topics(&self, topics: &[String]) {
        let mut live = Vec::new();
        for topic in topics {
            match self.log.is_topic_truncated(topic).await {
                Ok(false) => live.push(topic.clone()),
                Ok(true) => {}
                Err(err) => warn!("Could not check truncation of '{}': {}", topic, err),
            }
        }
        live.sort_by_key(|t| naming::parse_version(t).unwrap_or(0));
        let (reprocessing, version_topics): (Vec<String>, Vec<String>) =
            live.into_iter().partition(|t| naming::is_reprocessing_topic(t));
        if version_topics.len() <= self.max_errored_topics_to_keep {
            return;
        }
        let to_truncate = version_topics.len() - self.max_errored_topics_to_keep;
        for topic in version_topics.into_iter().take(to_truncate) {
            if let Err(err) = self.log.truncate_topic(&topic).await {
                warn!("Failed to truncate stale topic '{}': {}", topic, err);
                continue;
            }
            info!("Stale topic '{}' got truncated", topic);
            let companion = format!("{}_sr", topic);
            if reprocessing.contains(&companion) {
                if let Err(err) = self.log.truncate_topic(&companion).await {
                    warn!("Failed to truncate companion topic '{}': {}", companion, err);
                } else {
                    info!("Companion reprocessing topic '{}' got truncated", companion);
                }
            }
        }
    }
}

/// A version still not online past the store's bootstrap deadline is presumed
/// abandoned.
pub fn is_lingering_version(store: &Store, version: &Version, now_ms: u64) -> bool {
    let limit = version.created_at_ms + store.bootstrap_to_online_timeout_hours * 60 * 60 * 1000;
    now_ms > limit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::memory::{InMemoryLog, InMemoryMetadataStore, ScriptedChildController};
    use crate::external::{ChildControllerClient, JobStatusReport};
    use crate::store::PushType;
    use std::collections::HashMap;

    fn manager(
        log: Arc<InMemoryLog>,
        metadata: Arc<InMemoryMetadataStore>,
        client: Arc<ScriptedChildController>,
        max_errored: usize,
    ) -> TopicLifecycleManager {
        let mut regions: HashMap<String, Arc<dyn ChildControllerClient>> = HashMap::new();
        regions.insert("east".to_string(), client);
        let mut clients = HashMap::new();
        clients.insert("c".to_string(), regions);
        let aggregator = Arc::new(StatusAggregator::new(
            log.clone(),
            metadata.clone(),
            clients,
            max_errored,
        ));
        TopicLifecycleManager::new(
            log,
            metadata,
            aggregator,
            max_errored,
            2,
            Duration::from_millis(5),
        )
    }

    fn store_with_version(name: &str, version: u32) -> Store {
        let mut store = Store::new(name, "o", 0);
        store.versions.push(Version {
            number: version,
            push_job_id: format!("push-{}", version),
            created_at_ms: 0,
            push_type: PushType::Batch,
        });
        store.largest_used_version = version;
        store
    }

    #[tokio::test]
    async fn test_no_topics_means_no_current_push() {
        let log = Arc::new(InMemoryLog::new());
        let metadata = Arc::new(InMemoryMetadataStore::new());
        metadata.put_store("c", Store::new("s", "o", 0)).await;
        let client = Arc::new(ScriptedChildController::new("http://east"));
        let manager = manager(log, metadata, client, 0);
        assert_eq!(
            manager.current_push_topic("c", "s", false).await.unwrap(),
            CurrentPush::None
        );
    }

    #[tokio::test]
    async fn test_running_push_blocks() {
        let log = Arc::new(InMemoryLog::new());
        log.create_topic_if_absent("s_v2", 1, 1).await.unwrap();
        let metadata = Arc::new(InMemoryMetadataStore::new());
        metadata.put_store("c", store_with_version("s", 2)).await;
        let client = Arc::new(ScriptedChildController::new("http://east"));
        client.set_job_status("s_v2", JobStatusReport::of(ExecutionStatus::Started));
        let manager = manager(log, metadata, client, 0);
        assert_eq!(
            manager.current_push_topic("c", "s", false).await.unwrap(),
            CurrentPush::Ongoing("s_v2".to_string())
        );
    }

    #[tokio::test]
    async fn test_orphaned_topic_is_reported() {
        let log = Arc::new(InMemoryLog::new());
        log.create_topic_if_absent("s_v3", 1, 1).await.unwrap();
        let metadata = Arc::new(InMemoryMetadataStore::new());
        // Store exists but has no version 3 record.
        metadata.put_store("c", Store::new("s", "o", 0)).await;
        let client = Arc::new(ScriptedChildController::new("http://east"));
        let manager = manager(log, metadata, client, 0);
        assert_eq!(
            manager.current_push_topic("c", "s", false).await.unwrap(),
            CurrentPush::Orphaned("s_v3".to_string())
        );
    }

    #[tokio::test]
    async fn test_terminal_push_clears_the_way_and_truncates() {
        let log = Arc::new(InMemoryLog::new());
        log.create_topic_if_absent("s_v1", 1, 1).await.unwrap();
        log.create_topic_if_absent("s_v2", 1, 1).await.unwrap();
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let mut store = store_with_version("s", 1);
        store.versions.push(Version {
            number: 2,
            push_job_id: "push-2".to_string(),
            created_at_ms: 0,
            push_type: PushType::Batch,
        });
        store.largest_used_version = 2;
        metadata.put_store("c", store).await;
        let client = Arc::new(ScriptedChildController::new("http://east"));
        client.set_job_status("s_v2", JobStatusReport::of(ExecutionStatus::Completed));
        let manager = manager(log.clone(), metadata, client, 0);
        assert_eq!(
            manager.current_push_topic("c", "s", false).await.unwrap(),
            CurrentPush::None
        );
        // Retention cap is 0, so every live topic of the store goes.
        assert!(log.is_topic_truncated("s_v1").await.unwrap());
        assert!(log.is_topic_truncated("s_v2").await.unwrap());
    }

    #[tokio::test]
    async fn test_truncated_latest_topic_means_no_current_push() {
        let log = Arc::new(InMemoryLog::new());
        log.create_topic_if_absent("s_v2", 1, 1).await.unwrap();
        log.truncate_topic("s_v2").await.unwrap();
        let metadata = Arc::new(InMemoryMetadataStore::new());
        metadata.put_store("c", store_with_version("s", 2)).await;
        let client = Arc::new(ScriptedChildController::new("http://east"));
        let manager = manager(log, metadata, client, 0);
        assert_eq!(
            manager.current_push_topic("c", "s", false).await.unwrap(),
            CurrentPush::None
        );
    }

    #[tokio::test]
    async fn test_retention_keeps_newest_and_prunes_oldest() {
        let log = Arc::new(InMemoryLog::new());
        for topic in ["s_v1", "s_v2", "s_v3", "s_v2_sr"] {
            log.create_topic_if_absent(topic, 1, 1).await.unwrap();
        }
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let client = Arc::new(ScriptedChildController::new("http://east"));
        let manager = manager(log.clone(), metadata, client, 1);
        let topics: Vec<String> = ["s_v1", "s_v2", "s_v3", "s_v2_sr"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        manager.truncate_stale_topics(&topics).await;
        // Cap of 1 keeps only the newest version topic; the pruned v2 drags
        // its reprocessing companion along.
        assert!(log.is_topic_truncated("s_v1").await.unwrap());
        assert!(log.is_topic_truncated("s_v2").await.unwrap());
        assert!(log.is_topic_truncated("s_v2_sr").await.unwrap());
        assert!(!log.is_topic_truncated("s_v3").await.unwrap());
    }

    #[test]
    fn test_lingering_version_detection() {
        let mut store = Store::new("s", "o", 0);
        store.bootstrap_to_online_timeout_hours = 24;
        let version = Version {
            number: 1,
            push_job_id: "p".to_string(),
            created_at_ms: 0,
            push_type: PushType::Batch,
        };
        let day_ms = 24 * 60 * 60 * 1000;
        assert!(!is_lingering_version(&store, &version, day_ms));
        assert!(is_lingering_version(&store, &version, day_ms + 1));
    }
}
