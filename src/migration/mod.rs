pub mod monitor;

pub use monitor::{MonitorHandle, StoreMigrationMonitor};
