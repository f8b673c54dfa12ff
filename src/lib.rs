pub mod admin;
pub mod config;
pub mod external;
pub mod migration;
pub mod status;
pub mod store;
pub mod topics;

pub use admin::{AdminCommand, AdminError, AdminOperation, ParentAdmin};
pub use config::{CoordinatorConfig, SystemStoreSpec, STORE_VERSION_RETENTION_COUNT};
pub use external::{
    ChildControllerClient, ConsumptionTracker, JobStatusReport, LeadershipOracle, MessageLog,
    MetadataStore,
};
pub use status::{AggregatedStatus, ExecutionStatus};
pub use store::{MigrationIntent, PushType, SchemaEntry, Store, UpdateStoreParams, Version};
pub use topics::CurrentPush;
