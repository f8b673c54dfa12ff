//! Admin operations and the replicated command envelope.
//!
//! Every mutation the coordinator performs travels through a cluster's admin
//! topic as one serialized [`AdminCommand`]. The per-region consumers decode
//! the envelope and apply the operation to their local metadata, so the enum
//! here is the complete wire protocol between the parent and the regions.

use crate::store::PushType;
use serde::{Deserialize, Serialize};

/// Fully resolved store update. Unlike `UpdateStoreParams` every field is
/// concrete: the coordinator merges the caller's partial update with the
/// current store record before appending, so regions apply the same final
/// state regardless of what they held before.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateStorePayload {
    pub owner: String,
    pub partition_count: u32,
    pub enable_reads: bool,
    pub enable_writes: bool,
    pub incremental_push_enabled: bool,
    pub bootstrap_to_online_timeout_hours: u64,
    pub migrating: bool,
    pub current_version: u32,
}

/// One admin mutation, applied identically in every region of a cluster.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AdminOperation {
    CreateStore {
        owner: String,
        key_schema: String,
        value_schema: String,
    },
    DeleteStore {
        /// Carried so a re-created store continues version numbering instead
        /// of reusing numbers with stale data behind them.
        largest_used_version: u32,
    },
    DeleteAllVersions,
    DeleteOldVersion {
        version: u32,
    },
    AddVersion {
        push_job_id: String,
        version: u32,
        partition_count: u32,
        push_type: PushType,
    },
    SetCurrentVersion {
        version: u32,
    },
    SetOwner {
        owner: String,
    },
    UpdateStore(UpdateStorePayload),
    AddValueSchema {
        schema: String,
        schema_id: u32,
    },
    KillPush {
        work_topic: String,
    },
    MigrateStore {
        source_cluster: String,
        destination_cluster: String,
    },
    AbortMigration {
        source_cluster: String,
        destination_cluster: String,
    },
}

impl AdminOperation {
    /// Stable operation name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AdminOperation::CreateStore { .. } => "CreateStore",
            AdminOperation::DeleteStore { .. } => "DeleteStore",
            AdminOperation::DeleteAllVersions => "DeleteAllVersions",
            AdminOperation::DeleteOldVersion { .. } => "DeleteOldVersion",
            AdminOperation::AddVersion { .. } => "AddVersion",
            AdminOperation::SetCurrentVersion { .. } => "SetCurrentVersion",
            AdminOperation::SetOwner { .. } => "SetOwner",
            AdminOperation::UpdateStore(_) => "UpdateStore",
            AdminOperation::AddValueSchema { .. } => "AddValueSchema",
            AdminOperation::KillPush { .. } => "KillPush",
            AdminOperation::MigrateStore { .. } => "MigrateStore",
            AdminOperation::AbortMigration { .. } => "AbortMigration",
        }
    }
}

/// Envelope written to a cluster's admin topic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdminCommand {
    pub cluster: String,
    pub store: String,
    pub execution_id: u64,
    pub operation: AdminOperation,
}

impl AdminCommand {
    pub fn to_bytes(&self) -> Vec<u8> {
        // The envelope is plain data; serialization cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
