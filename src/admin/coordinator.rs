//! The parent coordinator facade.
//!
//! Every externally visible admin operation lives here. Mutations are turned
//! into admin commands and pushed through the per-cluster channel; reads fan
//! out to the child regions or consult the shared metadata directly.

use crate::admin::channel::{AdminCommandChannel, ChannelSettings};
use crate::admin::error::AdminError;
use crate::admin::operation::{AdminOperation, UpdateStorePayload};
use crate::config::{CoordinatorConfig, SystemStoreSpec};
use crate::external::{
    ChildControllerClient, ConsumptionTracker, LeadershipOracle, MessageLog, MetadataStore,
};
use crate::migration::monitor::{MonitorHandle, StoreMigrationMonitor};
use crate::status::aggregator::{AggregatedStatus, StatusAggregator};
use crate::status::ExecutionStatus;
use crate::store::{MigrationIntent, PushType, Store, UpdateStoreParams, Version};
use crate::topics::lifecycle::{is_lingering_version, CurrentPush, TopicLifecycleManager};
use crate::topics::naming;
use log::{error, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time::sleep;

/// Sentinel current version reported for a region that could not be queried.
pub const IGNORED_CURRENT_VERSION: i64 = -1;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Parent coordinator over one or more clusters.
///
/// The parent never runs ingestion itself. Its store records exist for
/// bookkeeping, the authoritative state lives in the child regions, and all
/// mutations reach them through the replicated admin channel.
pub struct ParentAdmin {
    config: CoordinatorConfig,
    log: Arc<dyn MessageLog>,
    metadata: Arc<dyn MetadataStore>,
    oracle: Arc<dyn LeadershipOracle>,
    /// cluster -> region name -> controller client.
    clients: HashMap<String, HashMap<String, Arc<dyn ChildControllerClient>>>,
    channel: AdminCommandChannel,
    aggregator: Arc<StatusAggregator>,
    lifecycle: TopicLifecycleManager,
    monitor: Mutex<Option<MonitorHandle>>,
    /// Gates the async system store setup per cluster so a stopped cluster
    /// does not keep retrying.
    bootstrap_enabled: Arc<Mutex<HashMap<String, bool>>>,
}

impl ParentAdmin {
    pub fn new(
        config: CoordinatorConfig,
        log: Arc<dyn MessageLog>,
        tracker: Arc<dyn ConsumptionTracker>,
        metadata: Arc<dyn MetadataStore>,
        oracle: Arc<dyn LeadershipOracle>,
        clients: HashMap<String, HashMap<String, Arc<dyn ChildControllerClient>>>,
    ) -> Self {
        let settings = ChannelSettings {
            lock_timeout: config.lock_timeout,
            confirmation_deadline: config.consumption_timeout,
            poll_interval: config.consumption_poll_interval,
            admin_topic_partitions: config.admin_topic_partitions,
            admin_topic_replication: config.admin_topic_replication,
        };
        let channel =
            AdminCommandChannel::new(log.clone(), tracker.clone(), metadata.clone(), settings);
        let aggregator = Arc::new(StatusAggregator::new(
            log.clone(),
            metadata.clone(),
            clients.clone(),
            config.max_errored_topics_to_keep,
        ));
        let lifecycle = TopicLifecycleManager::new(
            log.clone(),
            metadata.clone(),
            aggregator.clone(),
            config.max_errored_topics_to_keep,
            config.status_retry_attempts,
            config.status_retry_delay,
        );
        ParentAdmin {
            config,
            log,
            metadata,
            oracle,
            clients,
            channel,
            aggregator,
            lifecycle,
            monitor: Mutex::new(None),
            bootstrap_enabled: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    // === Lifecycle ===

    /// Spawn the migration monitor. Idempotent per coordinator instance.
    pub fn start(&self) {
        let mut guard = self.monitor.lock().unwrap();
        if guard.is_some() {
            return;
        }
        let monitor = Arc::new(StoreMigrationMonitor::new(
            self.metadata.clone(),
            self.oracle.clone(),
            self.clients.clone(),
            self.config.clusters.clone(),
            self.config.migration_check_interval,
        ));
        *guard = Some(monitor.start());
    }

    /// Open the admin channel for a cluster this coordinator leads and kick
    /// off asynchronous system store setup.
    pub async fn start_cluster(self: &Arc<Self>, cluster: &str) -> Result<(), AdminError> {
        if !self.oracle.is_leader(cluster) {
            return Err(AdminError::PreconditionFailed(format!(
                "This coordinator does not lead cluster '{}'",
                cluster
            )));
        }
        self.channel.open(cluster).await?;
        info!("Started admin channel for cluster '{}'", cluster);
        self.bootstrap_enabled
            .lock()
            .unwrap()
            .insert(cluster.to_string(), true);
        for spec in self.config.system_stores.clone() {
            let admin = self.clone();
            let cluster = cluster.to_string();
            tokio::spawn(async move {
                admin.bootstrap_system_store(&cluster, spec).await;
            });
        }
        Ok(())
    }

    pub fn stop_cluster(&self, cluster: &str) {
        self.bootstrap_enabled
            .lock()
            .unwrap()
            .insert(cluster.to_string(), false);
        self.channel.close(cluster);
        info!("Stopped admin channel for cluster '{}'", cluster);
    }

    /// Stop background work. Open channels are closed by the caller through
    /// [`stop_cluster`].
    ///
    /// [`stop_cluster`]: ParentAdmin::stop_cluster
    pub async fn close(&self) {
        let handle = self.monitor.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
    }

    fn bootstrap_still_enabled(&self, cluster: &str) -> bool {
        self.bootstrap_enabled
            .lock()
            .unwrap()
            .get(cluster)
            .copied()
            .unwrap_or(false)
    }

    /// Create a system store and its first version, retrying for a while
    /// since the cluster may still be settling at startup.
    async fn bootstrap_system_store(self: &Arc<Self>, cluster: &str, spec: SystemStoreSpec) {
        let mut ready = false;
        for attempt in 0..self.config.bootstrap_retry_attempts {
            if !self.bootstrap_still_enabled(cluster) {
                break;
            }
            if attempt > 0 {
                sleep(self.config.bootstrap_retry_delay).await;
            }
            match self.ensure_system_store(cluster, &spec).await {
                Ok(()) => {
                    ready = true;
                    break;
                }
                Err(err) => {
                    info!(
                        "System store '{}' setup in cluster '{}' attempt {}/{} failed: {}",
                        spec.name,
                        cluster,
                        attempt + 1,
                        self.config.bootstrap_retry_attempts,
                        err
                    );
                }
            }
        }
        if ready {
            info!(
                "System store '{}' is ready in cluster '{}'",
                spec.name, cluster
            );
        } else {
            error!(
                "Unable to create or verify system store '{}' in cluster '{}'",
                spec.name, cluster
            );
        }
    }

    async fn ensure_system_store(
        self: &Arc<Self>,
        cluster: &str,
        spec: &SystemStoreSpec,
    ) -> Result<(), AdminError> {
        if self.metadata.get_store(cluster, &spec.name).await.is_none() {
            self.create_store(
                cluster,
                &spec.name,
                &spec.owner,
                &spec.key_schema,
                &spec.value_schema,
            )
            .await?;
        }
        let store = self
            .metadata
            .get_store(cluster, &spec.name)
            .await
            .ok_or_else(|| AdminError::StoreNotFound {
                cluster: cluster.to_string(),
                store: spec.name.clone(),
            })?;
        if store.versions.is_empty() {
            let push_job_id = format!("system-store-setup-{}", rand::random::<u64>());
            self.add_version(cluster, &spec.name, &push_job_id, 1, PushType::Batch)
                .await?;
        }
        Ok(())
    }

    // === Store operations ===

    pub async fn create_store(
        &self,
        cluster: &str,
        store: &str,
        owner: &str,
        key_schema: &str,
        value_schema: &str,
    ) -> Result<(), AdminError> {
        if self.metadata.get_store(cluster, store).await.is_some() {
            return Err(AdminError::PreconditionFailed(format!(
                "Store '{}' already exists in cluster '{}'",
                store, cluster
            )));
        }
        info!("Adding store '{}' to cluster '{}'", store, cluster);
        self.channel
            .submit(
                cluster,
                store,
                AdminOperation::CreateStore {
                    owner: owner.to_string(),
                    key_schema: key_schema.to_string(),
                    value_schema: value_schema.to_string(),
                },
            )
            .await?;
        if self.metadata.migration_intent(store).await.is_none() {
            self.metadata
                .set_migration_intent(store, MigrationIntent::settled(cluster))
                .await;
        }
        Ok(())
    }

    pub async fn delete_store(&self, cluster: &str, store: &str) -> Result<(), AdminError> {
        let record = self.require_store(cluster, store).await?;
        // Ship the parent's high-water mark so a re-created store in any
        // region continues numbering instead of reusing stale versions.
        self.channel
            .submit(
                cluster,
                store,
                AdminOperation::DeleteStore {
                    largest_used_version: record.largest_used_version,
                },
            )
            .await?;
        Ok(())
    }

    pub async fn delete_all_versions(&self, cluster: &str, store: &str) -> Result<(), AdminError> {
        self.require_store(cluster, store).await?;
        self.channel
            .submit(cluster, store, AdminOperation::DeleteAllVersions)
            .await?;
        Ok(())
    }

    pub async fn delete_old_version(
        &self,
        cluster: &str,
        store: &str,
        version: u32,
    ) -> Result<(), AdminError> {
        let record = self.require_store(cluster, store).await?;
        if record.current_version == version {
            return Err(AdminError::PreconditionFailed(format!(
                "Cannot delete version {} of store '{}': it is the current version",
                version, store
            )));
        }
        self.channel
            .submit(cluster, store, AdminOperation::DeleteOldVersion { version })
            .await?;
        Ok(())
    }

    pub async fn set_current_version(
        &self,
        cluster: &str,
        store: &str,
        version: u32,
    ) -> Result<(), AdminError> {
        self.require_store(cluster, store).await?;
        self.channel
            .submit(cluster, store, AdminOperation::SetCurrentVersion { version })
            .await?;
        Ok(())
    }

    pub async fn set_owner(
        &self,
        cluster: &str,
        store: &str,
        owner: &str,
    ) -> Result<(), AdminError> {
        self.require_store(cluster, store).await?;
        self.channel
            .submit(
                cluster,
                store,
                AdminOperation::SetOwner {
                    owner: owner.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    /// Merge a partial update into the current store record and ship the
    /// fully resolved state, so every region lands on identical fields.
    pub async fn update_store(
        &self,
        cluster: &str,
        store: &str,
        params: UpdateStoreParams,
    ) -> Result<(), AdminError> {
        let record = self.require_store(cluster, store).await?;
        if record.migrating && !params.touches_migration_fields() {
            return Err(AdminError::PreconditionFailed(format!(
                "Store '{}' is migrating; only migration, read and write flags may be updated",
                store
            )));
        }
        let payload = UpdateStorePayload {
            owner: params.owner.unwrap_or(record.owner),
            partition_count: params.partition_count.unwrap_or(record.partition_count),
            enable_reads: params.enable_reads.unwrap_or(record.enable_reads),
            enable_writes: params.enable_writes.unwrap_or(record.enable_writes),
            incremental_push_enabled: params
                .incremental_push_enabled
                .unwrap_or(record.incremental_push_enabled),
            bootstrap_to_online_timeout_hours: params
                .bootstrap_to_online_timeout_hours
                .unwrap_or(record.bootstrap_to_online_timeout_hours),
            migrating: params.migrating.unwrap_or(record.migrating),
            current_version: params.current_version.unwrap_or(record.current_version),
        };
        self.channel
            .submit(cluster, store, AdminOperation::UpdateStore(payload))
            .await?;
        Ok(())
    }

    /// Register a value schema, returning its id. Re-registering an existing
    /// definition returns the already assigned id without a new command.
    pub async fn add_value_schema(
        &self,
        cluster: &str,
        store: &str,
        definition: &str,
    ) -> Result<u32, AdminError> {
        self.require_store(cluster, store).await?;
        let existing = self.metadata.value_schemas(cluster, store).await;
        if let Some(entry) = existing.iter().find(|s| s.definition == definition) {
            info!(
                "Value schema already registered for store '{}' with id {}",
                store, entry.id
            );
            return Ok(entry.id);
        }
        let schema_id = existing.iter().map(|s| s.id).max().unwrap_or(0) + 1;
        self.channel
            .submit(
                cluster,
                store,
                AdminOperation::AddValueSchema {
                    schema: definition.to_string(),
                    schema_id,
                },
            )
            .await?;
        Ok(schema_id)
    }

    // === Push admission ===

    /// Admit a push job and register its version. Idempotent: re-requesting
    /// with the push job id of the ongoing push returns its version.
    pub async fn add_version(
        &self,
        cluster: &str,
        store_name: &str,
        push_job_id: &str,
        partition_count: u32,
        push_type: PushType,
    ) -> Result<Version, AdminError> {
        if push_type.is_incremental() {
            return self.get_incremental_push_version(cluster, store_name).await;
        }

        let mut current = self
            .lifecycle
            .current_push_topic(cluster, store_name, false)
            .await?;
        if let CurrentPush::Orphaned(topic) = current {
            info!("Killing orphaned topic '{}' before admitting new push", topic);
            self.kill_push(cluster, &topic).await?;
            current = CurrentPush::None;
        }
        if let CurrentPush::Ongoing(topic) = current {
            let store = self.require_store(cluster, store_name).await?;
            let version = naming::parse_version(&topic)
                .and_then(|v| store.version(v).cloned())
                .ok_or_else(|| {
                    AdminError::PreconditionFailed(format!(
                        "A version record should exist for the ongoing push topic '{}'",
                        topic
                    ))
                })?;
            if version.push_job_id == push_job_id {
                // Same job asking again, hand back its version.
                return Ok(version);
            }
            if is_lingering_version(&store, &version, now_ms()) {
                info!(
                    "Found lingering topic '{}' with push id '{}' created at {}, killing it",
                    topic, version.push_job_id, version.created_at_ms
                );
                self.kill_push(cluster, &topic).await?;
            } else {
                return Err(AdminError::PushConflict {
                    store: store_name.to_string(),
                    version: version.number,
                    blocking_push_job_id: version.push_job_id,
                });
            }
        }

        let store = self.require_store(cluster, store_name).await?;
        let version_number = store.largest_used_version + 1;
        let work_topic = naming::work_topic_name(store_name, version_number);
        self.log
            .create_topic_if_absent(
                &work_topic,
                partition_count,
                self.config.admin_topic_replication,
            )
            .await?;
        if push_type.is_stream_reprocessing() {
            self.log
                .create_topic_if_absent(
                    &naming::reprocessing_topic_name(store_name, version_number),
                    partition_count,
                    self.config.admin_topic_replication,
                )
                .await?;
        }
        self.channel
            .submit(
                cluster,
                store_name,
                AdminOperation::AddVersion {
                    push_job_id: push_job_id.to_string(),
                    version: version_number,
                    partition_count,
                    push_type,
                },
            )
            .await?;
        self.cleanup_historical_versions(cluster, store_name).await;

        let version = self
            .metadata
            .get_store(cluster, store_name)
            .await
            .and_then(|s| s.version(version_number).cloned())
            .unwrap_or(Version {
                number: version_number,
                push_job_id: push_job_id.to_string(),
                created_at_ms: now_ms(),
                push_type,
            });
        Ok(version)
    }

    /// Resolve the version an incremental push should write into: the latest
    /// version, whose batch push must have finished cleanly.
    pub async fn get_incremental_push_version(
        &self,
        cluster: &str,
        store_name: &str,
    ) -> Result<Version, AdminError> {
        let store = self.require_store(cluster, store_name).await?;
        if !store.incremental_push_enabled {
            return Err(AdminError::PreconditionFailed(format!(
                "Incremental push is not enabled for store '{}'",
                store_name
            )));
        }
        let version = store.latest_version().cloned().ok_or_else(|| {
            AdminError::PreconditionFailed(format!(
                "Cannot start incremental push for store '{}': no batch push has run yet",
                store_name
            ))
        })?;
        let topic = naming::work_topic_name(store_name, version.number);
        let status = self
            .aggregator
            .get_push_status(cluster, &topic, None)
            .await?
            .status;
        if !status.is_terminal() {
            return Err(AdminError::PreconditionFailed(format!(
                "Cannot start incremental push while the batch push is ongoing, store '{}'",
                store_name
            )));
        }
        if status == ExecutionStatus::Error || self.log.is_topic_truncated(&topic).await? {
            return Err(AdminError::PreconditionFailed(format!(
                "Cannot start incremental push since the previous batch push failed, store '{}'",
                store_name
            )));
        }
        Ok(version)
    }

    /// Kill the push writing to a work topic, in every region.
    pub async fn kill_push(&self, cluster: &str, work_topic: &str) -> Result<(), AdminError> {
        let store_name = naming::parse_store_name(work_topic)
            .ok_or_else(|| {
                AdminError::PreconditionFailed(format!(
                    "'{}' is not a work topic",
                    work_topic
                ))
            })?
            .to_string();
        self.require_store(cluster, &store_name).await?;
        info!(
            "Killing push job for topic '{}' in cluster '{}'",
            work_topic, cluster
        );
        // With no errored-topic retention the topic is truncated right away;
        // otherwise the next push's retention pass prunes it.
        if self.config.max_errored_topics_to_keep == 0 {
            if self.log.contains_topic(work_topic).await? {
                self.log.truncate_topic(work_topic).await?;
            }
            let reprocessing = format!("{}_sr", work_topic);
            if self.log.contains_topic(&reprocessing).await? {
                self.log.truncate_topic(&reprocessing).await?;
            }
        }
        self.channel
            .submit(
                cluster,
                &store_name,
                AdminOperation::KillPush {
                    work_topic: work_topic.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    /// Drop version records beyond the retention count, oldest first. Parent
    /// bookkeeping only, the regions are not involved.
    pub async fn cleanup_historical_versions(&self, cluster: &str, store_name: &str) {
        let Some(mut store) = self.metadata.get_store(cluster, store_name).await else {
            info!("Store to clean up '{}' does not exist", store_name);
            return;
        };
        if store.versions.len() <= self.config.version_retention_count {
            return;
        }
        let mut numbers: Vec<u32> = store.versions.iter().map(|v| v.number).collect();
        numbers.sort_unstable();
        let excess = numbers.len() - self.config.version_retention_count;
        for number in numbers.into_iter().take(excess) {
            store.delete_version(number);
        }
        self.metadata.put_store(cluster, store).await;
    }

    // === Migration ===

    /// Begin migrating a store between clusters. The actual hand-over is
    /// completed by the migration monitor once every region confirms.
    pub async fn migrate_store(
        &self,
        source_cluster: &str,
        destination_cluster: &str,
        store: &str,
    ) -> Result<(), AdminError> {
        if source_cluster == destination_cluster {
            return Err(AdminError::PreconditionFailed(
                "Source cluster and destination cluster cannot be the same".to_string(),
            ));
        }
        // Flag the source store first so conflicting updates are refused for
        // the whole duration of the migration.
        self.update_store(
            source_cluster,
            store,
            UpdateStoreParams::new().set_migrating(true),
        )
        .await?;
        self.metadata
            .set_migration_intent(
                store,
                MigrationIntent {
                    source_cluster: Some(source_cluster.to_string()),
                    destination_cluster: Some(destination_cluster.to_string()),
                    discovered_cluster: source_cluster.to_string(),
                },
            )
            .await;
        // The destination cluster consumes the migration command and builds
        // its copy of the store.
        self.channel
            .submit(
                destination_cluster,
                store,
                AdminOperation::MigrateStore {
                    source_cluster: source_cluster.to_string(),
                    destination_cluster: destination_cluster.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    pub async fn abort_migration(
        &self,
        source_cluster: &str,
        destination_cluster: &str,
        store: &str,
    ) -> Result<(), AdminError> {
        if source_cluster == destination_cluster {
            return Err(AdminError::PreconditionFailed(
                "Source cluster and destination cluster cannot be the same".to_string(),
            ));
        }
        self.channel
            .submit(
                source_cluster,
                store,
                AdminOperation::AbortMigration {
                    source_cluster: source_cluster.to_string(),
                    destination_cluster: destination_cluster.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    // === Reads ===

    pub async fn get_store(&self, cluster: &str, store: &str) -> Option<Store> {
        self.metadata.get_store(cluster, store).await
    }

    pub async fn list_stores(&self, cluster: &str) -> Vec<Store> {
        self.metadata.list_stores(cluster).await
    }

    pub async fn get_push_status(
        &self,
        cluster: &str,
        work_topic: &str,
        incremental_push_token: Option<&str>,
    ) -> Result<AggregatedStatus, AdminError> {
        self.aggregator
            .get_push_status(cluster, work_topic, incremental_push_token)
            .await
    }

    /// Per-task push progress across all regions, task keys prefixed with
    /// the region name.
    pub async fn push_progress(&self, cluster: &str, work_topic: &str) -> HashMap<String, u64> {
        let mut aggregate = HashMap::new();
        let Some(regions) = self.clients.get(cluster) else {
            return aggregate;
        };
        for (region, client) in regions {
            match client.query_job_status(work_topic, None).await {
                Ok(report) => {
                    for (task, progress) in report.per_task_progress {
                        aggregate.insert(format!("{}_{}", region, task), progress);
                    }
                }
                Err(err) => {
                    warn!(
                        "Failed to query region '{}' for progress on topic '{}': {}",
                        region, work_topic, err
                    );
                }
            }
        }
        aggregate
    }

    /// The parent has no push monitor of its own, so the current version is
    /// whatever each region reports. Unreachable regions report the
    /// [`IGNORED_CURRENT_VERSION`] sentinel.
    pub async fn current_versions(&self, cluster: &str, store: &str) -> HashMap<String, i64> {
        let mut result = HashMap::new();
        let Some(regions) = self.clients.get(cluster) else {
            return result;
        };
        for (region, client) in regions {
            match client.get_store(store).await {
                Ok(record) => {
                    result.insert(region.clone(), record.current_version as i64);
                }
                Err(err) => {
                    error!(
                        "Could not query store '{}' from region '{}' in cluster '{}': {}",
                        store, region, cluster, err
                    );
                    result.insert(region.clone(), IGNORED_CURRENT_VERSION);
                }
            }
        }
        result
    }

    async fn require_store(&self, cluster: &str, store: &str) -> Result<Store, AdminError> {
        self.metadata
            .get_store(cluster, store)
            .await
            .ok_or_else(|| AdminError::StoreNotFound {
                cluster: cluster.to_string(),
                store: store.to_string(),
            })
    }
}
