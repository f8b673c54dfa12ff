//! Coordinator Configuration
//!
//! Tunables for the parent coordinator: which clusters it manages, how long
//! it waits for command confirmation, and the retention and reconciliation
//! knobs of the background machinery.

use std::time::Duration;

/// Number of historical store versions the parent keeps around after a new
/// version is admitted.
pub const STORE_VERSION_RETENTION_COUNT: usize = 5;

/// Definition of a system store bootstrapped at cluster start.
#[derive(Debug, Clone)]
pub struct SystemStoreSpec {
    pub name: String,
    pub owner: String,
    pub key_schema: String,
    pub value_schema: String,
}

/// Configuration for the parent coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Clusters this coordinator may manage. Channels are only opened for
    /// clusters it actually leads.
    pub clusters: Vec<String>,

    /// How long a submitted command may wait for consumption confirmation
    /// before it is reported as timed out (default: 30s)
    pub consumption_timeout: Duration,

    /// Poll interval while waiting for confirmation (default: 1s)
    pub consumption_poll_interval: Duration,

    /// How long a submission may wait for the per-cluster admin lock
    /// (default: 10s)
    pub lock_timeout: Duration,

    /// How many errored, non-truncated version topics to keep per store for
    /// debugging (default: 0, meaning terminal topics are always truncated)
    pub max_errored_topics_to_keep: usize,

    /// Partition count for newly created admin topics (default: 1; ordering
    /// over the admin channel requires a single partition)
    pub admin_topic_partitions: u32,

    /// Replication factor for newly created admin topics (default: 3)
    pub admin_topic_replication: u32,

    /// How often the migration monitor reconciles (default: 10s)
    pub migration_check_interval: Duration,

    /// How many times an aggregate status query is retried while any region
    /// reports Unknown (default: 5)
    pub status_retry_attempts: u32,

    /// Delay between those retries (default: 10s)
    pub status_retry_delay: Duration,

    /// How many times system store creation is retried at startup
    /// (default: 10)
    pub bootstrap_retry_attempts: u32,

    /// Delay between system store bootstrap retries (default: 3s)
    pub bootstrap_retry_delay: Duration,

    /// Historical versions retained per store (default:
    /// [`STORE_VERSION_RETENTION_COUNT`])
    pub version_retention_count: usize,

    /// System stores created asynchronously when a cluster starts
    pub system_stores: Vec<SystemStoreSpec>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            clusters: Vec::new(),
            consumption_timeout: Duration::from_secs(30),
            consumption_poll_interval: Duration::from_secs(1),
            lock_timeout: Duration::from_secs(10),
            max_errored_topics_to_keep: 0,
            admin_topic_partitions: 1,
            admin_topic_replication: 3,
            migration_check_interval: Duration::from_secs(10),
            status_retry_attempts: 5,
            status_retry_delay: Duration::from_secs(10),
            bootstrap_retry_attempts: 10,
            bootstrap_retry_delay: Duration::from_secs(3),
            version_retention_count: STORE_VERSION_RETENTION_COUNT,
            system_stores: Vec::new(),
        }
    }
}

impl CoordinatorConfig {
    /// Create a config with all defaults for the given clusters
    pub fn new(clusters: Vec<String>) -> Self {
        Self {
            clusters,
            ..Default::default()
        }
    }

    pub fn with_consumption_timeout(mut self, timeout: Duration) -> Self {
        self.consumption_timeout = timeout;
        self
    }

    pub fn with_consumption_poll_interval(mut self, interval: Duration) -> Self {
        self.consumption_poll_interval = interval;
        self
    }

    pub fn with_max_errored_topics_to_keep(mut self, count: usize) -> Self {
        self.max_errored_topics_to_keep = count;
        self
    }

    pub fn with_migration_check_interval(mut self, interval: Duration) -> Self {
        self.migration_check_interval = interval;
        self
    }

    pub fn with_status_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.status_retry_attempts = attempts;
        self.status_retry_delay = delay;
        self
    }

    pub fn with_bootstrap_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.bootstrap_retry_attempts = attempts;
        self.bootstrap_retry_delay = delay;
        self
    }

    pub fn with_system_store(mut self, spec: SystemStoreSpec) -> Self {
        self.system_stores.push(spec);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.consumption_timeout, Duration::from_secs(30));
        assert_eq!(config.max_errored_topics_to_keep, 0);
        assert_eq!(config.admin_topic_partitions, 1);
        assert_eq!(config.version_retention_count, STORE_VERSION_RETENTION_COUNT);
    }

    #[test]
    fn test_builder_methods() {
        let config = CoordinatorConfig::new(vec!["c".to_string()])
            .with_consumption_timeout(Duration::from_secs(5))
            .with_max_errored_topics_to_keep(2)
            .with_status_retry(3, Duration::from_millis(100));
        assert_eq!(config.clusters, vec!["c".to_string()]);
        assert_eq!(config.consumption_timeout, Duration::from_secs(5));
        assert_eq!(config.max_errored_topics_to_keep, 2);
        assert_eq!(config.status_retry_attempts, 3);
    }
}
