pub mod lifecycle;
pub mod naming;

pub use lifecycle::{CurrentPush, TopicLifecycleManager};
