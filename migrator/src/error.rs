use std::time::Duration;

use ethers::types::U256;

use crate::{chain::ChainCommunicationError, db::DbError};

#[derive(Debug, thiserror::Error)]
pub enum MigratorError {
    #[error("Fee oracle query failed: {0}")]
    FeeOracleError(ChainCommunicationError),
    #[error("Cannot find a gas price at or below {cap} wei within {timeout:?}, run the migration at another time")]
    GasPriceUnavailable { cap: U256, timeout: Duration },
    #[error("Failed to fetch the current block height: {0}")]
    BlockHeightError(ChainCommunicationError),
    #[error("Malformed migration request: {0}")]
    MalformedRequest(String),
    #[error("Migration transaction submission failed: {0}")]
    TxSubmissionError(ChainCommunicationError),
    #[error("Migration transaction was not mined: {0}")]
    TxInclusionError(ChainCommunicationError),
    #[error("DB error {0}")]
    DbError(#[from] DbError),
}

impl MigratorError {
    /// Whether this error signals a network-wide condition, in which case the rest of
    /// the batch is abandoned instead of moving on to the next channel.
    pub fn cancels_batch(&self) -> bool {
        matches!(
            self,
            MigratorError::FeeOracleError(_)
                | MigratorError::GasPriceUnavailable { .. }
                | MigratorError::BlockHeightError(_)
        )
    }
}
