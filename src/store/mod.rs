//! Store metadata model shared by the parent coordinator and its collaborators.

use serde::{Deserialize, Serialize};

/// How a store version is being populated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushType {
    /// Full batch rewrite of the store version.
    Batch,
    /// Incremental push on top of an existing batch version.
    Incremental,
    /// Batch data re-processed through the streaming path.
    StreamReprocessing,
}

impl PushType {
    pub fn is_incremental(&self) -> bool {
        matches!(self, PushType::Incremental)
    }

    pub fn is_stream_reprocessing(&self) -> bool {
        matches!(self, PushType::StreamReprocessing)
    }
}

/// One version record of a store. Version numbers only grow; the record is
/// immutable once created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub number: u32,
    /// Id of the push job that created this version. Used to distinguish a
    /// retried push from a conflicting one.
    pub push_job_id: String,
    pub created_at_ms: u64,
    pub push_type: PushType,
}

/// Parent-level store record.
///
/// The parent keeps version history only for bookkeeping (which push created
/// what, and when); the authoritative per-region state lives in the child
/// control planes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Store {
    pub name: String,
    pub owner: String,
    pub created_at_ms: u64,
    pub partition_count: u32,
    pub current_version: u32,
    pub largest_used_version: u32,
    pub versions: Vec<Version>,
    pub enable_reads: bool,
    pub enable_writes: bool,
    pub incremental_push_enabled: bool,
    /// A version older than this that is still not online is presumed
    /// abandoned and may be killed to admit a new push.
    pub bootstrap_to_online_timeout_hours: u64,
    pub migrating: bool,
}

impl Store {
    pub fn new(name: &str, owner: &str, created_at_ms: u64) -> Self {
        Store {
            name: name.to_string(),
            owner: owner.to_string(),
            created_at_ms,
            partition_count: 1,
            current_version: 0,
            largest_used_version: 0,
            versions: Vec::new(),
            enable_reads: true,
            enable_writes: true,
            incremental_push_enabled: false,
            bootstrap_to_online_timeout_hours: 24,
            migrating: false,
        }
    }

    pub fn version(&self, number: u32) -> Option<&Version> {
        self.versions.iter().find(|v| v.number == number)
    }

    /// Latest version record by number, if any.
    pub fn latest_version(&self) -> Option<&Version> {
        self.versions.iter().max_by_key(|v| v.number)
    }

    pub fn delete_version(&mut self, number: u32) {
        self.versions.retain(|v| v.number != number);
    }
}

/// Partial store update. Unset fields inherit the current store value when the
/// coordinator resolves the update into a full admin command.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateStoreParams {
    pub owner: Option<String>,
    pub partition_count: Option<u32>,
    pub enable_reads: Option<bool>,
    pub enable_writes: Option<bool>,
    pub incremental_push_enabled: Option<bool>,
    pub bootstrap_to_online_timeout_hours: Option<u64>,
    pub migrating: Option<bool>,
    pub current_version: Option<u32>,
}

impl UpdateStoreParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_owner(mut self, owner: &str) -> Self {
        self.owner = Some(owner.to_string());
        self
    }

    pub fn set_partition_count(mut self, count: u32) -> Self {
        self.partition_count = Some(count);
        self
    }

    pub fn set_enable_reads(mut self, enabled: bool) -> Self {
        self.enable_reads = Some(enabled);
        self
    }

    pub fn set_enable_writes(mut self, enabled: bool) -> Self {
        self.enable_writes = Some(enabled);
        self
    }

    pub fn set_incremental_push_enabled(mut self, enabled: bool) -> Self {
        self.incremental_push_enabled = Some(enabled);
        self
    }

    pub fn set_bootstrap_to_online_timeout_hours(mut self, hours: u64) -> Self {
        self.bootstrap_to_online_timeout_hours = Some(hours);
        self
    }

    pub fn set_migrating(mut self, migrating: bool) -> Self {
        self.migrating = Some(migrating);
        self
    }

    pub fn set_current_version(mut self, version: u32) -> Self {
        self.current_version = Some(version);
        self
    }

    /// True if the update only touches fields that are allowed while the
    /// store is migrating.
    pub fn touches_migration_fields(&self) -> bool {
        self.migrating.is_some() || self.enable_reads.is_some() || self.enable_writes.is_some()
    }
}

/// Registered schema for a store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchemaEntry {
    pub id: u32,
    pub definition: String,
}

/// Persisted routing/migration record for one store.
///
/// The `discovered` cluster is where readers and writers are routed today.
/// A migration is in progress while `discovered` still equals the source and
/// both endpoints are set; it is complete once `discovered` equals the
/// destination.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MigrationIntent {
    pub source_cluster: Option<String>,
    pub destination_cluster: Option<String>,
    pub discovered_cluster: String,
}

impl MigrationIntent {
    pub fn settled(discovered: &str) -> Self {
        MigrationIntent {
            source_cluster: None,
            destination_cluster: None,
            discovered_cluster: discovered.to_string(),
        }
    }

    pub fn is_in_progress(&self) -> bool {
        match (&self.source_cluster, &self.destination_cluster) {
            (Some(src), Some(_)) => self.discovered_cluster == *src,
            _ => false,
        }
    }

    pub fn is_complete(&self) -> bool {
        match &self.destination_cluster {
            Some(dest) => self.discovered_cluster == *dest,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_version_picks_highest_number() {
        let mut store = Store::new("s", "owner", 0);
        store.versions.push(Version {
            number: 3,
            push_job_id: "a".to_string(),
            created_at_ms: 10,
            push_type: PushType::Batch,
        });
        store.versions.push(Version {
            number: 7,
            push_job_id: "b".to_string(),
            created_at_ms: 5,
            push_type: PushType::Batch,
        });
        assert_eq!(store.latest_version().unwrap().number, 7);
    }

    #[test]
    fn test_migration_intent_states() {
        let mut intent = MigrationIntent {
            source_cluster: Some("east".to_string()),
            destination_cluster: Some("west".to_string()),
            discovered_cluster: "east".to_string(),
        };
        assert!(intent.is_in_progress());
        assert!(!intent.is_complete());

        intent.discovered_cluster = "west".to_string();
        assert!(!intent.is_in_progress());
        assert!(intent.is_complete());

        let settled = MigrationIntent::settled("west");
        assert!(!settled.is_in_progress());
        assert!(!settled.is_complete());
    }

    #[test]
    fn test_update_params_migration_fields() {
        assert!(!UpdateStoreParams::new().set_owner("x").touches_migration_fields());
        assert!(UpdateStoreParams::new().set_migrating(true).touches_migration_fields());
        assert!(UpdateStoreParams::new().set_enable_reads(false).touches_migration_fields());
    }
}
