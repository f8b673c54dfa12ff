//! Cross-region push status aggregation.

use crate::admin::error::AdminError;
use crate::external::{ChildControllerClient, JobStatusReport, MessageLog, MetadataStore};
use crate::status::execution::ExecutionStatus;
use crate::store::PushType;
use crate::topics::naming;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;

/// Result of aggregating one work topic's status across all regions.
#[derive(Clone, Debug)]
pub struct AggregatedStatus {
    pub status: ExecutionStatus,
    pub details: Option<String>,
    pub per_region: HashMap<String, ExecutionStatus>,
    pub per_region_details: HashMap<String, String>,
    /// Task progress counters, keyed as `region_task` so tasks from different
    /// regions never collide.
    pub per_task_progress: HashMap<String, u64>,
}

/// Reduce per-region votes to a single status: sort by the fixed priority
/// order and take the most urgent one.
pub fn reduce_statuses(votes: &[ExecutionStatus]) -> ExecutionStatus {
    votes
        .iter()
        .min_by_key(|s| s.priority())
        .copied()
        .unwrap_or(ExecutionStatus::Unknown)
}

/// Quorum gate: a non-`Progress` aggregate is only trusted when a strict
/// majority of regions actually responded.
pub fn apply_quorum(
    status: ExecutionStatus,
    responded: usize,
    total: usize,
) -> ExecutionStatus {
    if responded < total / 2 + 1 {
        ExecutionStatus::Progress
    } else {
        status
    }
}

/// Fans a status query out to every region of a cluster and reduces the
/// answers into one externally visible status, then performs terminal
/// cleanup on the work topic.
pub struct StatusAggregator {
    log: Arc<dyn MessageLog>,
    metadata: Arc<dyn MetadataStore>,
    /// cluster -> region name -> controller client.
    clients: HashMap<String, HashMap<String, Arc<dyn ChildControllerClient>>>,
    max_errored_topics_to_keep: usize,
}

impl StatusAggregator {
    pub fn new(
        log: Arc<dyn MessageLog>,
        metadata: Arc<dyn MetadataStore>,
        clients: HashMap<String, HashMap<String, Arc<dyn ChildControllerClient>>>,
        max_errored_topics_to_keep: usize,
    ) -> Self {
        StatusAggregator {
            log,
            metadata,
            clients,
            max_errored_topics_to_keep,
        }
    }

    /// Aggregate the status of one work topic across all regions of the
    /// cluster. Terminal results trigger topic cleanup as a side effect.
    pub async fn get_push_status(
        &self,
        cluster: &str,
        work_topic: &str,
        incremental_push_token: Option<&str>,
    ) -> Result<AggregatedStatus, AdminError> {
        let regions = self.clients.get(cluster).ok_or_else(|| {
            AdminError::PreconditionFailed(format!("No child regions known for cluster '{}'", cluster))
        })?;

        let mut handles = Vec::with_capacity(regions.len());
        for (region, client) in regions {
            let region = region.clone();
            let client = client.clone();
            let topic = work_topic.to_string();
            let token = incremental_push_token.map(|t| t.to_string());
            handles.push(tokio::spawn(async move {
                let result = client.query_job_status(&topic, token.as_deref()).await;
                (region, client.endpoint(), result)
            }));
        }

        let total = regions.len();
        let mut responded = 0usize;
        let mut failed = 0usize;
        let mut per_region = HashMap::new();
        let mut per_region_details = HashMap::new();
        let mut per_task_progress = HashMap::new();
        for handle in handles {
            let Ok((region, endpoint, result)) = handle.await else {
                continue;
            };
            match result {
                Ok(JobStatusReport {
                    status,
                    details,
                    per_task_progress: tasks,
                }) => {
                    responded += 1;
                    per_region.insert(region.clone(), status);
                    if let Some(details) = details {
                        per_region_details.insert(region.clone(), details);
                    }
                    for (task, progress) in tasks {
                        per_task_progress.insert(format!("{}_{}", region, task), progress);
                    }
                }
                Err(err) => {
                    // An unreachable region votes Unknown rather than failing
                    // the whole aggregation.
                    failed += 1;
                    warn!(
                        "Cluster '{}': status query for '{}' against region '{}' failed: {}",
                        cluster, work_topic, region, err
                    );
                    per_region.insert(region.clone(), ExecutionStatus::Unknown);
                    per_region_details
                        .insert(region, format!("{} failed to respond: {}", endpoint, err));
                }
            }
        }

        let votes: Vec<ExecutionStatus> = per_region.values().copied().collect();
        let mut status = apply_quorum(reduce_statuses(&votes), responded, total);

        let mut details: Option<String> = if per_region_details.is_empty() {
            None
        } else {
            let mut lines: Vec<String> = per_region_details
                .iter()
                .map(|(region, detail)| format!("{}: {}", region, detail))
                .collect();
            lines.sort();
            Some(lines.join("; "))
        };

        if status.is_terminal() && failed > 0 {
            // A push cannot be declared done while some regions were never
            // heard from.
            status = ExecutionStatus::Error;
            let note = format!("{} of {} regions unreachable", failed, total);
            details = Some(match details {
                Some(existing) => format!("{}; {}", note, existing),
                None => note,
            });
        }

        if status.is_terminal() {
            self.cleanup_after_terminal(cluster, work_topic, status, incremental_push_token)
                .await;
        }

        Ok(AggregatedStatus {
            status,
            details,
            per_region,
            per_region_details,
            per_task_progress,
        })
    }

    /// Truncate a finished work topic unless retention policy keeps it for
    /// debugging.
    async fn cleanup_after_terminal(
        &self,
        cluster: &str,
        work_topic: &str,
        status: ExecutionStatus,
        incremental_push_token: Option<&str>,
    ) {
        if self.max_errored_topics_to_keep > 0 && status == ExecutionStatus::Error {
            // Kept for postmortem; pruned later when the retention cap is
            // enforced at the next push.
            info!(
                "Cluster '{}': keeping errored topic '{}' for debugging",
                cluster, work_topic
            );
            return;
        }
        let Some(store_name) = naming::parse_store_name(work_topic) else {
            return;
        };
        let Some(store) = self.metadata.get_store(cluster, store_name).await else {
            return;
        };
        let errored_batch_push =
            incremental_push_token.is_none() && status == ExecutionStatus::Error;
        if !errored_batch_push && store.incremental_push_enabled {
            // Healthy topics of incremental-push stores stay live: they keep
            // receiving incremental data after the batch push finishes.
            return;
        }
        if let Err(err) = self.log.truncate_topic(work_topic).await {
            warn!("Failed to truncate topic '{}': {}", work_topic, err);
        }
        let reprocessing = naming::parse_version(work_topic)
            .and_then(|v| store.version(v).map(|record| (v, record.push_type)))
            .filter(|(_, push_type)| *push_type == PushType::StreamReprocessing)
            .map(|(v, _)| naming::reprocessing_topic_name(store_name, v));
        if let Some(topic) = reprocessing {
            if let Err(err) = self.log.truncate_topic(&topic).await {
                warn!("Failed to truncate topic '{}': {}", topic, err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::memory::{InMemoryLog, InMemoryMetadataStore, ScriptedChildController};
    use crate::external::MessageLog;
    use crate::store::Store;

    fn aggregator_with(
        regions: Vec<(&str, Arc<ScriptedChildController>)>,
        log: Arc<InMemoryLog>,
        metadata: Arc<InMemoryMetadataStore>,
        max_errored: usize,
    ) -> StatusAggregator {
        let mut per_cluster: HashMap<String, Arc<dyn ChildControllerClient>> = HashMap::new();
        for (name, client) in regions {
            per_cluster.insert(name.to_string(), client);
        }
        let mut clients = HashMap::new();
        clients.insert("c".to_string(), per_cluster);
        StatusAggregator::new(log, metadata, clients, max_errored)
    }

    // === Pure reduction ===

    #[test]
    fn test_reduction_prefers_least_resolved_status() {
        assert_eq!(
            reduce_statuses(&[ExecutionStatus::Completed, ExecutionStatus::Progress]),
            ExecutionStatus::Progress
        );
        assert_eq!(
            reduce_statuses(&[ExecutionStatus::Completed, ExecutionStatus::Completed]),
            ExecutionStatus::Completed
        );
        assert_eq!(
            reduce_statuses(&[ExecutionStatus::Error, ExecutionStatus::Started]),
            ExecutionStatus::Started
        );
    }

    #[test]
    fn test_reduction_regression_when_one_region_is_stuck() {
        // One region never created the job while another finished: the
        // aggregate stays at the stuck region's status, not Completed.
        assert_eq!(
            reduce_statuses(&[ExecutionStatus::NotCreated, ExecutionStatus::Completed]),
            ExecutionStatus::NotCreated
        );
    }

    #[test]
    fn test_quorum_forces_progress() {
        assert_eq!(
            apply_quorum(ExecutionStatus::Completed, 2, 5),
            ExecutionStatus::Progress
        );
        assert_eq!(
            apply_quorum(ExecutionStatus::Completed, 3, 5),
            ExecutionStatus::Completed
        );
        assert_eq!(
            apply_quorum(ExecutionStatus::Error, 1, 1),
            ExecutionStatus::Error
        );
    }

    // === Fan-out ===

    #[tokio::test]
    async fn test_unreachable_region_blocks_completion() {
        let good = Arc::new(ScriptedChildController::new("http://east"));
        good.set_job_status("s_v1", JobStatusReport::of(ExecutionStatus::Completed));
        let bad = Arc::new(ScriptedChildController::new("http://west"));
        bad.set_job_status_error("s_v1", "connection refused");

        let log = Arc::new(InMemoryLog::new());
        log.create_topic_if_absent("s_v1", 1, 1).await.unwrap();
        let metadata = Arc::new(InMemoryMetadataStore::new());
        metadata.put_store("c", Store::new("s", "o", 0)).await;

        let aggregator = aggregator_with(
            vec![("east", good), ("west", bad)],
            log,
            metadata,
            0,
        );
        let result = aggregator.get_push_status("c", "s_v1", None).await.unwrap();
        // Only 1 of 2 regions responded, short of quorum, so the aggregate
        // is forced to Progress regardless of the reduction.
        assert_eq!(result.status, ExecutionStatus::Progress);
        assert_eq!(result.per_region["west"], ExecutionStatus::Unknown);
        assert!(result.per_region_details["west"].contains("http://west"));
    }

    #[tokio::test]
    async fn test_terminal_with_minority_unreachable_becomes_error() {
        let a = Arc::new(ScriptedChildController::new("http://a"));
        a.set_job_status("s_v1", JobStatusReport::of(ExecutionStatus::Completed));
        let b = Arc::new(ScriptedChildController::new("http://b"));
        b.set_job_status("s_v1", JobStatusReport::of(ExecutionStatus::Completed));
        let c = Arc::new(ScriptedChildController::new("http://c"));
        c.set_job_status_error("s_v1", "timeout");

        let log = Arc::new(InMemoryLog::new());
        log.create_topic_if_absent("s_v1", 1, 1).await.unwrap();
        let metadata = Arc::new(InMemoryMetadataStore::new());
        metadata.put_store("c", Store::new("s", "o", 0)).await;

        let aggregator = aggregator_with(
            vec![("a", a), ("b", b), ("r-c", c)],
            log,
            metadata,
            0,
        );
        let result = aggregator.get_push_status("c", "s_v1", None).await.unwrap();
        // Reduction gives Unknown (non-terminal) because the failed region
        // votes Unknown, which outranks Completed.
        assert_eq!(result.status, ExecutionStatus::Unknown);
    }

    #[tokio::test]
    async fn test_all_regions_completed_truncates_topic() {
        let a = Arc::new(ScriptedChildController::new("http://a"));
        a.set_job_status("s_v1", JobStatusReport::of(ExecutionStatus::Completed));
        let b = Arc::new(ScriptedChildController::new("http://b"));
        b.set_job_status("s_v1", JobStatusReport::of(ExecutionStatus::Completed));

        let log = Arc::new(InMemoryLog::new());
        log.create_topic_if_absent("s_v1", 1, 1).await.unwrap();
        let metadata = Arc::new(InMemoryMetadataStore::new());
        metadata.put_store("c", Store::new("s", "o", 0)).await;

        let aggregator = aggregator_with(vec![("a", a), ("b", b)], log.clone(), metadata, 0);
        let result = aggregator.get_push_status("c", "s_v1", None).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert!(log.is_topic_truncated("s_v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_errored_topic_kept_when_retention_allows() {
        let a = Arc::new(ScriptedChildController::new("http://a"));
        a.set_job_status("s_v1", JobStatusReport::of(ExecutionStatus::Error));

        let log = Arc::new(InMemoryLog::new());
        log.create_topic_if_absent("s_v1", 1, 1).await.unwrap();
        let metadata = Arc::new(InMemoryMetadataStore::new());
        metadata.put_store("c", Store::new("s", "o", 0)).await;

        let aggregator = aggregator_with(vec![("a", a)], log.clone(), metadata, 1);
        let result = aggregator.get_push_status("c", "s_v1", None).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Error);
        assert!(!log.is_topic_truncated("s_v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_completed_incremental_store_topic_stays_live() {
        let a = Arc::new(ScriptedChildController::new("http://a"));
        a.set_job_status("s_v1", JobStatusReport::of(ExecutionStatus::Completed));

        let log = Arc::new(InMemoryLog::new());
        log.create_topic_if_absent("s_v1", 1, 1).await.unwrap();
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let mut store = Store::new("s", "o", 0);
        store.incremental_push_enabled = true;
        metadata.put_store("c", store).await;

        let aggregator = aggregator_with(vec![("a", a)], log.clone(), metadata, 0);
        let result = aggregator.get_push_status("c", "s_v1", None).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert!(!log.is_topic_truncated("s_v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_task_progress_keys_are_region_prefixed() {
        let mut report = JobStatusReport::of(ExecutionStatus::Progress);
        report.per_task_progress.insert("task-0".to_string(), 42);
        let a = Arc::new(ScriptedChildController::new("http://a"));
        a.set_job_status("s_v1", report);

        let log = Arc::new(InMemoryLog::new());
        log.create_topic_if_absent("s_v1", 1, 1).await.unwrap();
        let metadata = Arc::new(InMemoryMetadataStore::new());

        let aggregator = aggregator_with(vec![("east", a)], log, metadata, 0);
        let result = aggregator.get_push_status("c", "s_v1", None).await.unwrap();
        assert_eq!(result.per_task_progress["east_task-0"], 42);
    }
}
