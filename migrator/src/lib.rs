#![deny(clippy::unwrap_used, clippy::panic)]
#![deny(clippy::arithmetic_side_effects)]

pub use chain::{
    ChainCommunicationError, ChainReader, ChainResult, EthereumLedger, EthereumProvider,
    FeeOracle, InclusionReceipt, LedgerContract,
};
pub use db::{DbError, DbResult, MigrationRocksDb, MigrationStore, DB};
pub use error::MigratorError;
pub use fee::{FeeNegotiator, FeePolicy, FeeQuote};
pub use migration::{
    ChannelId, ChannelMigrationInfo, MigrationRecord, MigrationRequest, MigrationState,
    StateTransition,
};
pub use orchestrator::{BatchOrchestrator, BatchSettings, BatchSummary};
pub use outcome::{MigrationOutcome, OutcomeClassifier};
pub use submitter::{MigrationSubmitter, Submission};

pub use ethers::types::{Address, H256, U256};

/// Expected time for two blocks to be produced; the fee oracle is polled at this pace.
pub const GAS_PRICE_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);
/// How long the fee negotiator searches for an acceptable price before giving up.
pub const FIND_GAS_PRICE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(180);
/// How long a submitted migration transaction may take to be mined and confirmed.
pub const WAIT_MINED_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(200);
/// Added once on top of the operator's price cap.
pub const GAS_PRICE_TOLERANCE_GWEI: u64 = 2;
/// Upper bound on channels migrated per run, bounding total fee exposure.
pub const MAX_CHANNEL_LIMIT: usize = 100;

mod chain;
mod db;
mod error;
mod fee;
mod migration;
mod orchestrator;
mod outcome;
mod submitter;
#[cfg(test)]
mod tests;
