use std::{fmt::Debug, time::Duration};

use async_trait::async_trait;
use ethers::types::{Address, TransactionReceipt, H256, U256, U64};

pub use ethereum::{EthereumLedger, EthereumProvider};

mod ethereum;

/// Result of a call to a chain collaborator
pub type ChainResult<T> = Result<T, ChainCommunicationError>;

/// Errors raised while talking to the chain node
#[derive(Debug, thiserror::Error)]
pub enum ChainCommunicationError {
    #[error("Provider error: {0}")]
    ProviderError(String),
    #[error("Contract call error: {0}")]
    ContractError(String),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Other(String),
}

impl ChainCommunicationError {
    /// Wrap any displayable error coming out of a provider
    pub fn from_other<E: std::fmt::Display>(err: E) -> Self {
        ChainCommunicationError::ProviderError(err.to_string())
    }
}

/// The chain node's suggested-gas-price endpoint. Queried on every call, no caching.
#[async_trait]
pub trait FeeOracle: Send + Sync + Debug {
    /// Current suggested gas price, in wei
    async fn suggest_price(&self) -> ChainResult<U256>;
}

/// Read-only view of the chain head
#[async_trait]
pub trait ChainReader: Send + Sync + Debug {
    /// Height of the latest block
    async fn current_height(&self) -> ChainResult<u64>;
}

/// Binding to the ledger contract channels are migrated into. The signing identity
/// is owned by the binding.
#[async_trait]
pub trait LedgerContract: Send + Sync + Debug {
    /// Sign and broadcast a `migrateChannelFrom` call at the given gas price, leaving the
    /// gas limit to estimation. Returns the transaction hash.
    async fn submit_migration(
        &self,
        source_ledger: Address,
        migration_request: Vec<u8>,
        gas_price: U256,
    ) -> ChainResult<H256>;

    /// Wait until the transaction is mined (and confirmed, if the binding requires
    /// confirmations), for at most `max_wait`.
    async fn await_inclusion(&self, tx_hash: H256, max_wait: Duration)
        -> ChainResult<InclusionReceipt>;
}

/// Confirmation record of a mined migration transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InclusionReceipt {
    pub tx_hash: H256,
    pub block_number: Option<u64>,
    /// Whether the receipt's status flag reports successful execution
    pub succeeded: bool,
}

impl InclusionReceipt {
    pub fn succeeded(tx_hash: H256, block_number: u64) -> Self {
        Self {
            tx_hash,
            block_number: Some(block_number),
            succeeded: true,
        }
    }

    pub fn reverted(tx_hash: H256, block_number: u64) -> Self {
        Self {
            tx_hash,
            block_number: Some(block_number),
            succeeded: false,
        }
    }
}

impl From<TransactionReceipt> for InclusionReceipt {
    fn from(receipt: TransactionReceipt) -> Self {
        Self {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number.map(|n| n.as_u64()),
            succeeded: receipt.status == Some(U64::one()),
        }
    }
}
