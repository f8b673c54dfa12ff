pub mod aggregator;
pub mod execution;

pub use aggregator::{AggregatedStatus, StatusAggregator};
pub use execution::{ExecutionStatus, STATUS_PRIORITY_ORDER};
