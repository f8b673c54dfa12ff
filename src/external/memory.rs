//! In-memory implementations of the collaborator traits.
//!
//! These back the unit and integration tests and the demo binary. The
//! in-memory log can be wired to a consumption tracker and a metadata store,
//! in which case every append to an admin topic is decoded and applied
//! immediately, emulating a region consumer that keeps up with the log.

use crate::admin::operation::{AdminCommand, AdminOperation};
use crate::external::{
    ChildControllerClient, ConsumptionTracker, ControllerError, JobStatusReport, LeadershipOracle,
    LogError, MessageLog, MetadataStore,
};
use crate::status::ExecutionStatus;
use crate::store::{MigrationIntent, SchemaEntry, Store, UpdateStoreParams, Version};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// === Consumption tracker ===

#[derive(Default)]
struct TrackerState {
    applied: HashMap<(String, String), u64>,
    consumed: HashMap<String, u64>,
    errors: HashMap<(String, String), String>,
}

/// Settable consumer high-water marks.
#[derive(Default)]
pub struct InMemoryConsumptionTracker {
    state: Mutex<TrackerState>,
}

impl InMemoryConsumptionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the cluster's consumer applied `execution_id` for `store`.
    pub fn ack(&self, cluster: &str, store: &str, execution_id: u64) {
        let mut state = self.state.lock().unwrap();
        let applied = state
            .applied
            .entry((cluster.to_string(), store.to_string()))
            .or_insert(0);
        *applied = (*applied).max(execution_id);
        let consumed = state.consumed.entry(cluster.to_string()).or_insert(0);
        *consumed = (*consumed).max(execution_id);
    }

    pub fn set_last_consumed(&self, cluster: &str, execution_id: u64) {
        let mut state = self.state.lock().unwrap();
        state.consumed.insert(cluster.to_string(), execution_id);
    }

    pub fn set_error(&self, cluster: &str, store: &str, error: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .errors
            .insert((cluster.to_string(), store.to_string()), error.to_string());
    }

    pub fn clear_error(&self, cluster: &str, store: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .errors
            .remove(&(cluster.to_string(), store.to_string()));
    }
}

#[async_trait]
impl ConsumptionTracker for InMemoryConsumptionTracker {
    async fn last_applied_execution_id(&self, cluster: &str, store: &str) -> Option<u64> {
        let state = self.state.lock().unwrap();
        state
            .applied
            .get(&(cluster.to_string(), store.to_string()))
            .copied()
    }

    async fn last_consumed_execution_id(&self, cluster: &str) -> Option<u64> {
        let state = self.state.lock().unwrap();
        state.consumed.get(cluster).copied()
    }

    async fn last_error(&self, cluster: &str, store: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .errors
            .get(&(cluster.to_string(), store.to_string()))
            .cloned()
    }
}

// === Metadata store ===

#[derive(Default)]
struct MetadataState {
    stores: HashMap<String, HashMap<String, Store>>,
    last_generated: HashMap<String, u64>,
    intents: HashMap<String, MigrationIntent>,
    key_schemas: HashMap<(String, String), SchemaEntry>,
    value_schemas: HashMap<(String, String), Vec<SchemaEntry>>,
}

/// In-process shared metadata store.
#[derive(Default)]
pub struct InMemoryMetadataStore {
    state: Mutex<MetadataState>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an admin command the way a region consumer would. The cluster in
    /// the envelope names the cluster whose metadata the mutation targets.
    pub fn apply_command(&self, command: &AdminCommand) {
        let mut state = self.state.lock().unwrap();
        let cluster = command.cluster.clone();
        let store_name = command.store.clone();
        match &command.operation {
            AdminOperation::CreateStore {
                owner,
                key_schema,
                value_schema,
            } => {
                let stores = state.stores.entry(cluster.clone()).or_default();
                if !stores.contains_key(&store_name) {
                    stores.insert(store_name.clone(), Store::new(&store_name, owner, now_ms()));
                    state.key_schemas.insert(
                        (cluster.clone(), store_name.clone()),
                        SchemaEntry {
                            id: 1,
                            definition: key_schema.clone(),
                        },
                    );
                    state.value_schemas.insert(
                        (cluster, store_name),
                        vec![SchemaEntry {
                            id: 1,
                            definition: value_schema.clone(),
                        }],
                    );
                }
            }
            AdminOperation::DeleteStore { .. } => {
                if let Some(stores) = state.stores.get_mut(&cluster) {
                    stores.remove(&store_name);
                }
                state.key_schemas.remove(&(cluster.clone(), store_name.clone()));
                state.value_schemas.remove(&(cluster, store_name));
            }
            AdminOperation::DeleteAllVersions => {
                if let Some(store) = state
                    .stores
                    .get_mut(&cluster)
                    .and_then(|s| s.get_mut(&store_name))
                {
                    store.versions.clear();
                    store.current_version = 0;
                }
            }
            AdminOperation::DeleteOldVersion { version } => {
                if let Some(store) = state
                    .stores
                    .get_mut(&cluster)
                    .and_then(|s| s.get_mut(&store_name))
                {
                    store.delete_version(*version);
                }
            }
            AdminOperation::AddVersion {
                push_job_id,
                version,
                partition_count,
                push_type,
            } => {
                if let Some(store) = state
                    .stores
                    .get_mut(&cluster)
                    .and_then(|s| s.get_mut(&store_name))
                {
                    if store.version(*version).is_none() {
                        store.versions.push(Version {
                            number: *version,
                            push_job_id: push_job_id.clone(),
                            created_at_ms: now_ms(),
                            push_type: *push_type,
                        });
                        store.largest_used_version = store.largest_used_version.max(*version);
                        store.partition_count = *partition_count;
                    }
                }
            }
            AdminOperation::SetCurrentVersion { version } => {
                if let Some(store) = state
                    .stores
                    .get_mut(&cluster)
                    .and_then(|s| s.get_mut(&store_name))
                {
                    store.current_version = *version;
                }
            }
            AdminOperation::SetOwner { owner } => {
                if let Some(store) = state
                    .stores
                    .get_mut(&cluster)
                    .and_then(|s| s.get_mut(&store_name))
                {
                    store.owner = owner.clone();
                }
            }
            AdminOperation::UpdateStore(payload) => {
                if let Some(store) = state
                    .stores
                    .get_mut(&cluster)
                    .and_then(|s| s.get_mut(&store_name))
                {
                    store.owner = payload.owner.clone();
                    store.partition_count = payload.partition_count;
                    store.enable_reads = payload.enable_reads;
                    store.enable_writes = payload.enable_writes;
                    store.incremental_push_enabled = payload.incremental_push_enabled;
                    store.bootstrap_to_online_timeout_hours =
                        payload.bootstrap_to_online_timeout_hours;
                    store.migrating = payload.migrating;
                    store.current_version = payload.current_version;
                }
            }
            AdminOperation::AddValueSchema { schema, schema_id } => {
                let schemas = state
                    .value_schemas
                    .entry((cluster, store_name))
                    .or_default();
                if !schemas.iter().any(|s| s.id == *schema_id) {
                    schemas.push(SchemaEntry {
                        id: *schema_id,
                        definition: schema.clone(),
                    });
                }
            }
            AdminOperation::KillPush { .. } => {
                // Kills fan out to region ingestion, which has no footprint in
                // the shared metadata.
            }
            AdminOperation::MigrateStore { source_cluster, .. } => {
                // The destination cluster's consumer clones the store record
                // so the destination can serve it once discovery flips.
                let cloned = state
                    .stores
                    .get(source_cluster)
                    .and_then(|s| s.get(&store_name))
                    .cloned();
                if let Some(store) = cloned {
                    state
                        .stores
                        .entry(cluster.clone())
                        .or_default()
                        .entry(store_name.clone())
                        .or_insert(store);
                }
                let key = state
                    .key_schemas
                    .get(&(source_cluster.clone(), store_name.clone()))
                    .cloned();
                if let Some(key) = key {
                    state
                        .key_schemas
                        .entry((cluster.clone(), store_name.clone()))
                        .or_insert(key);
                }
                let values = state
                    .value_schemas
                    .get(&(source_cluster.clone(), store_name.clone()))
                    .cloned();
                if let Some(values) = values {
                    state
                        .value_schemas
                        .entry((cluster, store_name))
                        .or_insert(values);
                }
            }
            AdminOperation::AbortMigration { source_cluster, .. } => {
                if let Some(store) = state
                    .stores
                    .get_mut(&cluster)
                    .and_then(|s| s.get_mut(&store_name))
                {
                    store.migrating = false;
                }
                state.intents.insert(
                    store_name,
                    MigrationIntent::settled(source_cluster),
                );
            }
        }
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn get_store(&self, cluster: &str, store: &str) -> Option<Store> {
        let state = self.state.lock().unwrap();
        state.stores.get(cluster).and_then(|s| s.get(store)).cloned()
    }

    async fn put_store(&self, cluster: &str, store: Store) {
        let mut state = self.state.lock().unwrap();
        state
            .stores
            .entry(cluster.to_string())
            .or_default()
            .insert(store.name.clone(), store);
    }

    async fn delete_store(&self, cluster: &str, store: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(stores) = state.stores.get_mut(cluster) {
            stores.remove(store);
        }
    }

    async fn list_stores(&self, cluster: &str) -> Vec<Store> {
        let state = self.state.lock().unwrap();
        state
            .stores
            .get(cluster)
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default()
    }

    async fn last_generated_execution_id(&self, cluster: &str) -> u64 {
        let state = self.state.lock().unwrap();
        state.last_generated.get(cluster).copied().unwrap_or(0)
    }

    async fn set_last_generated_execution_id(&self, cluster: &str, id: u64) {
        let mut state = self.state.lock().unwrap();
        state.last_generated.insert(cluster.to_string(), id);
    }

    async fn migration_intent(&self, store: &str) -> Option<MigrationIntent> {
        let state = self.state.lock().unwrap();
        state.intents.get(store).cloned()
    }

    async fn set_migration_intent(&self, store: &str, intent: MigrationIntent) {
        let mut state = self.state.lock().unwrap();
        state.intents.insert(store.to_string(), intent);
    }

    async fn list_migration_intents(&self) -> Vec<(String, MigrationIntent)> {
        let state = self.state.lock().unwrap();
        state
            .intents
            .iter()
            .map(|(name, intent)| (name.clone(), intent.clone()))
            .collect()
    }

    async fn update_cluster_discovery(&self, store: &str, old_cluster: &str, new_cluster: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(intent) = state.intents.get_mut(store) {
            if intent.discovered_cluster == old_cluster {
                intent.discovered_cluster = new_cluster.to_string();
            }
        }
    }

    async fn key_schema(&self, cluster: &str, store: &str) -> Option<SchemaEntry> {
        let state = self.state.lock().unwrap();
        state
            .key_schemas
            .get(&(cluster.to_string(), store.to_string()))
            .cloned()
    }

    async fn value_schemas(&self, cluster: &str, store: &str) -> Vec<SchemaEntry> {
        let state = self.state.lock().unwrap();
        state
            .value_schemas
            .get(&(cluster.to_string(), store.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    async fn put_schemas(
        &self,
        cluster: &str,
        store: &str,
        key_schema: Option<SchemaEntry>,
        value_schemas: Vec<SchemaEntry>,
    ) {
        let mut state = self.state.lock().unwrap();
        if let Some(key) = key_schema {
            state
                .key_schemas
                .insert((cluster.to_string(), store.to_string()), key);
        }
        state
            .value_schemas
            .insert((cluster.to_string(), store.to_string()), value_schemas);
    }
}

// === Message log ===

#[derive(Default)]
struct TopicState {
    payloads: Vec<Vec<u8>>,
    truncated: bool,
}

#[derive(Default)]
struct LogState {
    topics: HashMap<String, TopicState>,
    acks_enabled: bool,
    append_failure: Option<String>,
}

/// In-memory commit log. When wired to a tracker (and optionally a metadata
/// store), admin-topic appends are consumed synchronously: the command is
/// applied and acknowledged before `append` returns.
pub struct InMemoryLog {
    state: Mutex<LogState>,
    tracker: Option<Arc<InMemoryConsumptionTracker>>,
    metadata: Option<Arc<InMemoryMetadataStore>>,
}

impl InMemoryLog {
    pub fn new() -> Self {
        InMemoryLog {
            state: Mutex::new(LogState {
                acks_enabled: true,
                ..Default::default()
            }),
            tracker: None,
            metadata: None,
        }
    }

    pub fn with_consumer(
        tracker: Arc<InMemoryConsumptionTracker>,
        metadata: Option<Arc<InMemoryMetadataStore>>,
    ) -> Self {
        InMemoryLog {
            state: Mutex::new(LogState {
                acks_enabled: true,
                ..Default::default()
            }),
            tracker: Some(tracker),
            metadata,
        }
    }

    /// When disabled, appends still land in the topic but the emulated
    /// consumer stops acknowledging them. Used to exercise timeouts.
    pub fn set_acks_enabled(&self, enabled: bool) {
        self.state.lock().unwrap().acks_enabled = enabled;
    }

    /// Script the next appends to fail with the given reason.
    pub fn set_append_failure(&self, reason: Option<&str>) {
        self.state.lock().unwrap().append_failure = reason.map(|r| r.to_string());
    }

    pub fn topic_len(&self, topic: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.topics.get(topic).map(|t| t.payloads.len()).unwrap_or(0)
    }

    /// Decoded admin commands currently in a topic, oldest first.
    pub fn commands(&self, topic: &str) -> Vec<AdminCommand> {
        let state = self.state.lock().unwrap();
        state
            .topics
            .get(topic)
            .map(|t| {
                t.payloads
                    .iter()
                    .filter_map(|p| AdminCommand::from_bytes(p).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for InMemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageLog for InMemoryLog {
    async fn create_topic_if_absent(
        &self,
        name: &str,
        _partitions: u32,
        _replication: u32,
    ) -> Result<(), LogError> {
        let mut state = self.state.lock().unwrap();
        state.topics.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn append(&self, topic: &str, payload: Vec<u8>) -> Result<u64, LogError> {
        let (offset, consume) = {
            let mut state = self.state.lock().unwrap();
            if let Some(reason) = &state.append_failure {
                return Err(LogError::AppendFailed {
                    topic: topic.to_string(),
                    reason: reason.clone(),
                });
            }
            let acks_enabled = state.acks_enabled;
            let entry = state
                .topics
                .get_mut(topic)
                .ok_or_else(|| LogError::TopicNotFound(topic.to_string()))?;
            entry.payloads.push(payload.clone());
            (entry.payloads.len() as u64 - 1, acks_enabled)
        };
        if consume {
            if let Some(tracker) = &self.tracker {
                if let Ok(command) = AdminCommand::from_bytes(&payload) {
                    if let Some(metadata) = &self.metadata {
                        metadata.apply_command(&command);
                    }
                    tracker.ack(&command.cluster, &command.store, command.execution_id);
                }
            }
        }
        Ok(offset)
    }

    async fn list_topics(&self) -> Result<Vec<String>, LogError> {
        let state = self.state.lock().unwrap();
        Ok(state.topics.keys().cloned().collect())
    }

    async fn contains_topic(&self, name: &str) -> Result<bool, LogError> {
        let state = self.state.lock().unwrap();
        Ok(state.topics.contains_key(name))
    }

    async fn delete_topic(&self, name: &str) -> Result<(), LogError> {
        let mut state = self.state.lock().unwrap();
        state.topics.remove(name);
        Ok(())
    }

    async fn truncate_topic(&self, name: &str) -> Result<(), LogError> {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .topics
            .get_mut(name)
            .ok_or_else(|| LogError::TopicNotFound(name.to_string()))?;
        entry.truncated = true;
        Ok(())
    }

    async fn is_topic_truncated(&self, name: &str) -> Result<bool, LogError> {
        let state = self.state.lock().unwrap();
        Ok(state.topics.get(name).map(|t| t.truncated).unwrap_or(false))
    }
}

// === Child controller client ===

#[derive(Default)]
struct ScriptedState {
    job_status: HashMap<String, Result<JobStatusReport, ControllerError>>,
    stores: HashMap<String, Store>,
    discovered: HashMap<String, String>,
    update_calls: Vec<(String, UpdateStoreParams)>,
}

/// Scriptable stand-in for one child region's controller.
pub struct ScriptedChildController {
    endpoint: String,
    state: Mutex<ScriptedState>,
}

impl ScriptedChildController {
    pub fn new(endpoint: &str) -> Self {
        ScriptedChildController {
            endpoint: endpoint.to_string(),
            state: Mutex::new(ScriptedState::default()),
        }
    }

    pub fn set_job_status(&self, work_topic: &str, report: JobStatusReport) {
        let mut state = self.state.lock().unwrap();
        state.job_status.insert(work_topic.to_string(), Ok(report));
    }

    pub fn set_job_status_error(&self, work_topic: &str, reason: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .job_status
            .insert(work_topic.to_string(), Err(ControllerError(reason.to_string())));
    }

    pub fn set_store(&self, store: Store) {
        let mut state = self.state.lock().unwrap();
        state.stores.insert(store.name.clone(), store);
    }

    pub fn set_discovered(&self, store: &str, cluster: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .discovered
            .insert(store.to_string(), cluster.to_string());
    }

    pub fn update_calls(&self) -> Vec<(String, UpdateStoreParams)> {
        self.state.lock().unwrap().update_calls.clone()
    }
}

#[async_trait]
impl ChildControllerClient for ScriptedChildController {
    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    async fn query_job_status(
        &self,
        work_topic: &str,
        _incremental_push_token: Option<&str>,
    ) -> Result<JobStatusReport, ControllerError> {
        let state = self.state.lock().unwrap();
        match state.job_status.get(work_topic) {
            Some(result) => result.clone(),
            None => Ok(JobStatusReport::of(ExecutionStatus::NotCreated)),
        }
    }

    async fn get_store(&self, store: &str) -> Result<Store, ControllerError> {
        let state = self.state.lock().unwrap();
        state
            .stores
            .get(store)
            .cloned()
            .ok_or_else(|| ControllerError(format!("store '{}' not found", store)))
    }

    async fn discover_cluster(&self, store: &str) -> Result<String, ControllerError> {
        let state = self.state.lock().unwrap();
        state
            .discovered
            .get(store)
            .cloned()
            .ok_or_else(|| ControllerError(format!("store '{}' not routed", store)))
    }

    async fn update_store(
        &self,
        store: &str,
        params: UpdateStoreParams,
    ) -> Result<(), ControllerError> {
        let mut state = self.state.lock().unwrap();
        if let Some(record) = state.stores.get_mut(store) {
            if let Some(owner) = &params.owner {
                record.owner = owner.clone();
            }
            if let Some(migrating) = params.migrating {
                record.migrating = migrating;
            }
            if let Some(enable_reads) = params.enable_reads {
                record.enable_reads = enable_reads;
            }
            if let Some(enable_writes) = params.enable_writes {
                record.enable_writes = enable_writes;
            }
        }
        state.update_calls.push((store.to_string(), params));
        Ok(())
    }
}

// === Leadership oracle ===

/// Leadership oracle with a fixed, test-settable set of led clusters.
#[derive(Default)]
pub struct FixedLeadershipOracle {
    led: Mutex<HashSet<String>>,
}

impl FixedLeadershipOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn leading(clusters: &[&str]) -> Self {
        let oracle = Self::new();
        for cluster in clusters {
            oracle.lead(cluster);
        }
        oracle
    }

    pub fn lead(&self, cluster: &str) {
        self.led.lock().unwrap().insert(cluster.to_string());
    }

    pub fn step_down(&self, cluster: &str) {
        self.led.lock().unwrap().remove(cluster);
    }
}

impl LeadershipOracle for FixedLeadershipOracle {
    fn is_leader(&self, cluster: &str) -> bool {
        self.led.lock().unwrap().contains(cluster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PushType;

    #[tokio::test]
    async fn test_wired_log_acks_and_applies_on_append() {
        let tracker = Arc::new(InMemoryConsumptionTracker::new());
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let log = InMemoryLog::with_consumer(tracker.clone(), Some(metadata.clone()));
        log.create_topic_if_absent("admin_cluster-0", 1, 3).await.unwrap();

        let command = AdminCommand {
            cluster: "cluster-0".to_string(),
            store: "s".to_string(),
            execution_id: 1,
            operation: AdminOperation::CreateStore {
                owner: "owner".to_string(),
                key_schema: "\"string\"".to_string(),
                value_schema: "\"string\"".to_string(),
            },
        };
        log.append("admin_cluster-0", command.to_bytes()).await.unwrap();

        assert_eq!(
            tracker.last_applied_execution_id("cluster-0", "s").await,
            Some(1)
        );
        assert!(metadata.get_store("cluster-0", "s").await.is_some());
    }

    #[tokio::test]
    async fn test_log_holds_acks_when_disabled() {
        let tracker = Arc::new(InMemoryConsumptionTracker::new());
        let log = InMemoryLog::with_consumer(tracker.clone(), None);
        log.create_topic_if_absent("admin_c", 1, 3).await.unwrap();
        log.set_acks_enabled(false);

        let command = AdminCommand {
            cluster: "c".to_string(),
            store: "s".to_string(),
            execution_id: 5,
            operation: AdminOperation::DeleteAllVersions,
        };
        log.append("admin_c", command.to_bytes()).await.unwrap();

        assert_eq!(tracker.last_applied_execution_id("c", "s").await, None);
        assert_eq!(log.topic_len("admin_c"), 1);
    }

    #[tokio::test]
    async fn test_apply_add_version_updates_largest_used() {
        let metadata = InMemoryMetadataStore::new();
        metadata.apply_command(&AdminCommand {
            cluster: "c".to_string(),
            store: "s".to_string(),
            execution_id: 1,
            operation: AdminOperation::CreateStore {
                owner: "o".to_string(),
                key_schema: "k".to_string(),
                value_schema: "v".to_string(),
            },
        });
        metadata.apply_command(&AdminCommand {
            cluster: "c".to_string(),
            store: "s".to_string(),
            execution_id: 2,
            operation: AdminOperation::AddVersion {
                push_job_id: "push-1".to_string(),
                version: 4,
                partition_count: 2,
                push_type: PushType::Batch,
            },
        });
        let store = metadata.get_store("c", "s").await.unwrap();
        assert_eq!(store.largest_used_version, 4);
        assert_eq!(store.versions.len(), 1);
    }
}
