//! Interfaces to the coordinator's external collaborators.
//!
//! The parent coordinator is a logical layer over four services it does not
//! own: the durable ordered log, the per-region admin consumers, the child
//! region controllers and the leader-election service. Everything it needs
//! from them is captured by the traits in this module so tests (and the demo
//! binary) can run against the in-memory implementations in [`memory`].

pub mod memory;

use crate::status::ExecutionStatus;
use crate::store::{MigrationIntent, SchemaEntry, Store, UpdateStoreParams};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;

/// Errors from the ordered log service.
#[derive(Debug, Clone)]
pub enum LogError {
    TopicNotFound(String),
    AppendFailed { topic: String, reason: String },
    Unavailable(String),
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogError::TopicNotFound(topic) => write!(f, "Topic '{}' not found", topic),
            LogError::AppendFailed { topic, reason } => {
                write!(f, "Failed to append to topic '{}': {}", topic, reason)
            }
            LogError::Unavailable(reason) => write!(f, "Log service unavailable: {}", reason),
        }
    }
}

impl std::error::Error for LogError {}

/// Errors from a remote child-region controller.
#[derive(Debug, Clone)]
pub struct ControllerError(pub String);

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Controller request failed: {}", self.0)
    }
}

impl std::error::Error for ControllerError {}

/// Durable, partitioned, append-only commit log. One logical admin topic per
/// cluster plus one work topic per store version.
///
/// Appends are synchronous: `append` returns the assigned offset once the
/// message is durably accepted, and the per-cluster consumer observes
/// messages in append order.
#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Create a topic if it does not exist yet. Idempotent.
    async fn create_topic_if_absent(
        &self,
        name: &str,
        partitions: u32,
        replication: u32,
    ) -> Result<(), LogError>;

    /// Append a message and return its offset.
    async fn append(&self, topic: &str, payload: Vec<u8>) -> Result<u64, LogError>;

    async fn list_topics(&self) -> Result<Vec<String>, LogError>;

    async fn contains_topic(&self, name: &str) -> Result<bool, LogError>;

    async fn delete_topic(&self, name: &str) -> Result<(), LogError>;

    /// Mark a topic as truncated: its data is no longer needed for replay.
    async fn truncate_topic(&self, name: &str) -> Result<(), LogError>;

    async fn is_topic_truncated(&self, name: &str) -> Result<bool, LogError>;
}

/// View of the per-region admin consumer that tails the cluster's admin topic
/// and applies mutations to the region metadata store.
#[async_trait]
pub trait ConsumptionTracker: Send + Sync {
    /// Highest execution id successfully applied for the given store.
    async fn last_applied_execution_id(&self, cluster: &str, store: &str) -> Option<u64>;

    /// Highest execution id the cluster's consumer has applied overall,
    /// independent of store. Used for generator drift detection.
    async fn last_consumed_execution_id(&self, cluster: &str) -> Option<u64>;

    /// Last persistent error the consumer hit for the given store, if any.
    /// A present error blocks further admin operations for that store.
    async fn last_error(&self, cluster: &str, store: &str) -> Option<String>;
}

/// Response to a push job status query against one region.
#[derive(Clone, Debug)]
pub struct JobStatusReport {
    pub status: ExecutionStatus,
    pub details: Option<String>,
    pub per_task_progress: HashMap<String, u64>,
}

impl JobStatusReport {
    pub fn of(status: ExecutionStatus) -> Self {
        JobStatusReport {
            status,
            details: None,
            per_task_progress: HashMap::new(),
        }
    }
}

/// Client for one child region's controller.
#[async_trait]
pub trait ChildControllerClient: Send + Sync {
    /// Controller endpoint, used to annotate failure details.
    fn endpoint(&self) -> String;

    async fn query_job_status(
        &self,
        work_topic: &str,
        incremental_push_token: Option<&str>,
    ) -> Result<JobStatusReport, ControllerError>;

    async fn get_store(&self, store: &str) -> Result<Store, ControllerError>;

    /// Which cluster the region currently routes the store to.
    async fn discover_cluster(&self, store: &str) -> Result<String, ControllerError>;

    async fn update_store(
        &self,
        store: &str,
        params: UpdateStoreParams,
    ) -> Result<(), ControllerError>;
}

/// Leader-election oracle: is this process the active coordinator for a
/// cluster right now?
pub trait LeadershipOracle: Send + Sync {
    fn is_leader(&self, cluster: &str) -> bool;
}

/// Shared metadata store holding parent-level store records, execution-id
/// high-water marks, schemas and per-store routing/migration records.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_store(&self, cluster: &str, store: &str) -> Option<Store>;

    async fn put_store(&self, cluster: &str, store: Store);

    async fn delete_store(&self, cluster: &str, store: &str);

    async fn list_stores(&self, cluster: &str) -> Vec<Store>;

    /// Last execution id handed out for the cluster; 0 if none yet.
    async fn last_generated_execution_id(&self, cluster: &str) -> u64;

    async fn set_last_generated_execution_id(&self, cluster: &str, id: u64);

    /// Routing/migration record for a store, if one exists.
    async fn migration_intent(&self, store: &str) -> Option<MigrationIntent>;

    async fn set_migration_intent(&self, store: &str, intent: MigrationIntent);

    /// All stores with a routing record, with their records.
    async fn list_migration_intents(&self) -> Vec<(String, MigrationIntent)>;

    /// Flip the discovered cluster for a store from `old_cluster` to
    /// `new_cluster`. A no-op if the record does not point at `old_cluster`.
    async fn update_cluster_discovery(&self, store: &str, old_cluster: &str, new_cluster: &str);

    async fn key_schema(&self, cluster: &str, store: &str) -> Option<SchemaEntry>;

    async fn value_schemas(&self, cluster: &str, store: &str) -> Vec<SchemaEntry>;

    async fn put_schemas(
        &self,
        cluster: &str,
        store: &str,
        key_schema: Option<SchemaEntry>,
        value_schemas: Vec<SchemaEntry>,
    );
}
