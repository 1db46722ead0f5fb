use std::{fmt, future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use ethers::{
    contract::abigen,
    providers::Middleware,
    types::{Address, Bytes, TransactionReceipt, H256, U256},
};
use tokio::time::{sleep, timeout};
use tracing::{debug, instrument, warn};

use super::{
    ChainCommunicationError, ChainReader, ChainResult, FeeOracle, InclusionReceipt, LedgerContract,
};

abigen!(
    CelerLedger,
    r#"[
        function migrateChannelFrom(address _fromLedgerAddr, bytes _migrationRequest)
    ]"#
);

/// Fee oracle and chain reader backed by an EVM json-rpc provider
#[derive(Debug, Clone)]
pub struct EthereumProvider<M> {
    provider: Arc<M>,
}

impl<M: Middleware> EthereumProvider<M> {
    pub fn new(provider: Arc<M>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<M: Middleware + 'static> FeeOracle for EthereumProvider<M> {
    async fn suggest_price(&self) -> ChainResult<U256> {
        self.provider
            .get_gas_price()
            .await
            .map_err(ChainCommunicationError::from_other)
    }
}

#[async_trait]
impl<M: Middleware + 'static> ChainReader for EthereumProvider<M> {
    async fn current_height(&self) -> ChainResult<u64> {
        self.provider
            .get_block_number()
            .await
            .map(|number| number.as_u64())
            .map_err(ChainCommunicationError::from_other)
    }
}

/// The CelerLedger contract channels are migrated into. `M` is expected to be a
/// signing middleware; it fills nonce and gas limit for every submission.
pub struct EthereumLedger<M> {
    contract: CelerLedger<M>,
    provider: Arc<M>,
    /// blocks that must be built on top of the inclusion block before a receipt is trusted
    confirmations: u64,
    polling_interval: Duration,
}

impl<M: Middleware> fmt::Debug for EthereumLedger<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EthereumLedger")
            .field("address", &self.contract.address())
            .field("confirmations", &self.confirmations)
            .field("polling_interval", &self.polling_interval)
            .finish()
    }
}

impl<M: Middleware + 'static> EthereumLedger<M> {
    pub fn new(
        address: Address,
        provider: Arc<M>,
        confirmations: u64,
        polling_interval: Duration,
    ) -> Self {
        Self {
            contract: CelerLedger::new(address, provider.clone()),
            provider,
            confirmations,
            polling_interval,
        }
    }

    /// Run `call` until it succeeds, retrying provider errors on the next polling
    /// tick. Callers bound the overall wait.
    async fn call_until_success<T, F, Fut>(&self, call: F, action: &str) -> T
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ChainResult<T>>,
    {
        loop {
            match call().await {
                Ok(value) => return value,
                Err(err) => {
                    warn!(?err, action, "Error making call. Retrying...");
                    sleep(self.polling_interval).await;
                }
            }
        }
    }

    async fn receipt(&self, tx_hash: H256) -> ChainResult<Option<TransactionReceipt>> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(ChainCommunicationError::from_other)?;
        // pending transactions may come back with a receipt that has no block yet
        Ok(receipt.filter(|r| r.block_number.is_some()))
    }

    async fn head(&self) -> ChainResult<u64> {
        self.provider
            .get_block_number()
            .await
            .map(|number| number.as_u64())
            .map_err(ChainCommunicationError::from_other)
    }

    async fn wait_until_mined(&self, tx_hash: H256) -> TransactionReceipt {
        loop {
            let receipt = self
                .call_until_success(move || self.receipt(tx_hash), "get_transaction_receipt")
                .await;
            if let Some(receipt) = receipt {
                return receipt;
            }
            sleep(self.polling_interval).await;
        }
    }

    /// Returns `None` if the receipt disappeared while waiting, i.e. the transaction was reorged out.
    async fn wait_for_confirmations(
        &self,
        tx_hash: H256,
        receipt: TransactionReceipt,
    ) -> Option<TransactionReceipt> {
        let mined_at = receipt.block_number?.as_u64();
        if self.confirmations == 0 {
            return Some(receipt);
        }
        debug!(
            ?tx_hash,
            mined_at,
            confirmations = self.confirmations,
            "Transaction mined, waiting for block confirmations"
        );
        let confirmed_after = mined_at.saturating_add(self.confirmations);
        loop {
            let head = self
                .call_until_success(move || self.head(), "get_block_number")
                .await;
            if head > confirmed_after {
                return self
                    .call_until_success(move || self.receipt(tx_hash), "get_transaction_receipt")
                    .await;
            }
            sleep(self.polling_interval).await;
        }
    }

    async fn wait_until_confirmed(&self, tx_hash: H256) -> InclusionReceipt {
        loop {
            let receipt = self.wait_until_mined(tx_hash).await;
            match self.wait_for_confirmations(tx_hash, receipt).await {
                Some(confirmed) => return confirmed.into(),
                None => warn!(
                    ?tx_hash,
                    "Transaction dropped by chain reorg, waiting for it to be mined again"
                ),
            }
        }
    }
}

#[async_trait]
impl<M: Middleware + 'static> LedgerContract for EthereumLedger<M> {
    #[instrument(skip(self, migration_request), fields(ledger = ?self.contract.address()))]
    async fn submit_migration(
        &self,
        source_ledger: Address,
        migration_request: Vec<u8>,
        gas_price: U256,
    ) -> ChainResult<H256> {
        let call = self
            .contract
            .migrate_channel_from(source_ledger, Bytes::from(migration_request))
            .legacy()
            .gas_price(gas_price);
        let pending = call
            .send()
            .await
            .map_err(|err| ChainCommunicationError::ContractError(err.to_string()))?;
        Ok(pending.tx_hash())
    }

    async fn await_inclusion(
        &self,
        tx_hash: H256,
        max_wait: Duration,
    ) -> ChainResult<InclusionReceipt> {
        timeout(max_wait, self.wait_until_confirmed(tx_hash))
            .await
            .map_err(|_| ChainCommunicationError::Timeout(max_wait))
    }
}
