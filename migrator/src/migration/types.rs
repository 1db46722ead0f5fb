use std::fmt;

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256};

use crate::MigratorError;

use super::ChannelMigrationInfo;

/// Identifier of a payment channel
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct ChannelId(pub H256);

impl ChannelId {
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl From<H256> for ChannelId {
    fn from(id: H256) -> Self {
        Self(id)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Migration progress of a channel towards a given ledger
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MigrationState {
    /// Eligible for migration, nothing mined yet
    #[default]
    Initialized,
    /// Migration transaction mined successfully and recorded
    Submitted,
}

/// Result of recording a mined migration in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTransition {
    /// `Initialized` was moved to `Submitted`
    Applied,
    /// Someone else already recorded the migration
    AlreadySubmitted,
    /// The record was cleaned up by another component
    NotFound,
}

/// A pending migration task, as handed to the submitter. Read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRequest {
    pub channel_id: ChannelId,
    /// serialized and signed `ChannelMigrationRequest`, passed to the contract verbatim
    pub migration_request: Vec<u8>,
    /// height from which the request is void
    pub deadline_block: u64,
}

impl MigrationRequest {
    /// A request whose deadline has been reached is void, there is no grace block.
    pub fn is_expired_at(&self, height: u64) -> bool {
        self.deadline_block <= height
    }

    /// The ledger the channel is migrated away from, as signed into the request
    pub fn source_ledger(&self) -> Result<Address, MigratorError> {
        ChannelMigrationInfo::source_ledger(&self.migration_request)
    }
}

/// Persisted migration row, keyed by channel id and target ledger
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MigrationRecord {
    pub channel_id: ChannelId,
    pub target_ledger: Address,
    pub deadline_block: u64,
    pub migration_request: Vec<u8>,
    pub state: MigrationState,
    pub last_updated: DateTime<Utc>,
}

impl MigrationRecord {
    pub fn new(
        channel_id: ChannelId,
        target_ledger: Address,
        deadline_block: u64,
        migration_request: Vec<u8>,
    ) -> Self {
        Self {
            channel_id,
            target_ledger,
            deadline_block,
            migration_request,
            state: MigrationState::Initialized,
            last_updated: Utc::now(),
        }
    }

    pub fn to_request(&self) -> MigrationRequest {
        MigrationRequest {
            channel_id: self.channel_id,
            migration_request: self.migration_request.clone(),
            deadline_block: self.deadline_block,
        }
    }
}
