//! Error taxonomy for the admin command path.

use crate::external::LogError;
use std::fmt;
use std::time::Duration;

/// Errors surfaced by the admin command channel and the coordinator facade.
#[derive(Debug)]
pub enum AdminError {
    /// No channel exists for the cluster; the coordinator never started it or
    /// already stopped it.
    ClusterNotStarted(String),
    /// The cluster's consumer reported a persistent failure for this store.
    /// New commands are refused until an operator clears it.
    ChannelFaulted {
        cluster: String,
        store: String,
        consumer_error: String,
    },
    /// Could not acquire the per-cluster submission lock in time.
    LockTimeout { cluster: String, waited: Duration },
    /// The command was appended but not confirmed consumed before the
    /// deadline. The command may still apply later; callers must not retry
    /// blindly.
    ConsumptionTimeout {
        cluster: String,
        store: String,
        execution_id: u64,
        last_seen: Option<u64>,
        consumer_error: Option<String>,
    },
    /// A validation rule rejected the operation before anything was appended.
    PreconditionFailed(String),
    /// A new version cannot be admitted while another push is in flight.
    PushConflict {
        store: String,
        version: u32,
        blocking_push_job_id: String,
    },
    StoreNotFound { cluster: String, store: String },
    /// The underlying log service failed.
    Log(LogError),
}

impl fmt::Display for AdminError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminError::ClusterNotStarted(cluster) => {
                write!(f, "Cluster '{}' has no running admin channel", cluster)
            }
            AdminError::ChannelFaulted {
                cluster,
                store,
                consumer_error,
            } => write!(
                f,
                "Admin channel for cluster '{}' is faulted for store '{}': {}",
                cluster, store, consumer_error
            ),
            AdminError::LockTimeout { cluster, waited } => write!(
                f,
                "Timed out after {:?} waiting for the admin lock of cluster '{}'",
                waited, cluster
            ),
            AdminError::ConsumptionTimeout {
                cluster,
                store,
                execution_id,
                last_seen,
                consumer_error,
            } => {
                write!(
                    f,
                    "Command {} for store '{}' in cluster '{}' was not confirmed consumed \
                     (last applied: {:?})",
                    execution_id, store, cluster, last_seen
                )?;
                if let Some(err) = consumer_error {
                    write!(f, "; last consumer error: {}", err)?;
                }
                Ok(())
            }
            AdminError::PreconditionFailed(reason) => write!(f, "{}", reason),
            AdminError::PushConflict {
                store,
                version,
                blocking_push_job_id,
            } => write!(
                f,
                "Store '{}' already has an ongoing push (version {}, push job '{}')",
                store, version, blocking_push_job_id
            ),
            AdminError::StoreNotFound { cluster, store } => {
                write!(f, "Store '{}' does not exist in cluster '{}'", store, cluster)
            }
            AdminError::Log(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for AdminError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AdminError::Log(err) => Some(err),
            _ => None,
        }
    }
}

impl From<LogError> for AdminError {
    fn from(err: LogError) -> Self {
        AdminError::Log(err)
    }
}
