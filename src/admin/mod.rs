pub mod channel;
pub mod coordinator;
pub mod error;
pub mod operation;
pub mod sequencer;
pub mod waiter;

pub use channel::{AdminCommandChannel, ChannelSettings};
pub use coordinator::{ParentAdmin, IGNORED_CURRENT_VERSION};
pub use error::AdminError;
pub use operation::{AdminCommand, AdminOperation, UpdateStorePayload};
pub use sequencer::ExecutionIdSequencer;
