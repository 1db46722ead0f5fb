pub use payload::ChannelMigrationInfo;
pub use types::{ChannelId, MigrationRecord, MigrationRequest, MigrationState, StateTransition};

mod payload;
mod types;
