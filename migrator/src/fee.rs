use std::{sync::Arc, time::Duration};

use derive_new::new;
use ethers::types::U256;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, instrument};

use crate::{
    chain::FeeOracle, MigratorError, FIND_GAS_PRICE_TIMEOUT, GAS_PRICE_POLL_INTERVAL,
    GAS_PRICE_TOLERANCE_GWEI,
};

const WEI_PER_GWEI: u64 = 1_000_000_000;

/// How far the negotiator is willing to go for a migration transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, new)]
pub struct FeePolicy {
    /// operator supplied cap, before the tolerance is added
    pub max_gas_price_gwei: u64,
    pub poll_interval: Duration,
    pub search_timeout: Duration,
}

impl FeePolicy {
    /// Policy with the operator's cap and the default polling cadence
    pub fn with_cap(max_gas_price_gwei: u64) -> Self {
        Self::new(
            max_gas_price_gwei,
            GAS_PRICE_POLL_INTERVAL,
            FIND_GAS_PRICE_TIMEOUT,
        )
    }

    /// Highest acceptable price in wei: the cap plus the fixed tolerance
    pub fn price_cap(&self) -> U256 {
        U256::from(
            self.max_gas_price_gwei
                .saturating_add(GAS_PRICE_TOLERANCE_GWEI),
        )
        .saturating_mul(U256::from(WEI_PER_GWEI))
    }
}

/// A gas price the oracle reported at or under the cap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeQuote {
    /// in wei
    pub price: U256,
    pub observed_at: Instant,
}

/// Polls the fee oracle until it reports an acceptable price
#[derive(Debug, Clone)]
pub struct FeeNegotiator {
    oracle: Arc<dyn FeeOracle>,
    policy: FeePolicy,
}

impl FeeNegotiator {
    pub fn new(oracle: Arc<dyn FeeOracle>, policy: FeePolicy) -> Self {
        Self { oracle, policy }
    }

    /// Wait for the oracle to report a price at or under the cap. Gives up with
    /// [`MigratorError::GasPriceUnavailable`] once the search timeout elapses, and
    /// fails straight away on an oracle error.
    #[instrument(skip(self), fields(cap = %self.policy.price_cap()))]
    pub async fn negotiate(&self) -> Result<FeeQuote, MigratorError> {
        let cap = self.policy.price_cap();
        match timeout(self.policy.search_timeout, self.poll_until_acceptable(cap)).await {
            Ok(quote) => quote,
            Err(_) => Err(MigratorError::GasPriceUnavailable {
                cap,
                timeout: self.policy.search_timeout,
            }),
        }
    }

    async fn poll_until_acceptable(&self, cap: U256) -> Result<FeeQuote, MigratorError> {
        loop {
            let price = self
                .oracle
                .suggest_price()
                .await
                .map_err(MigratorError::FeeOracleError)?;
            if price <= cap {
                debug!(%price, "Found acceptable gas price");
                return Ok(FeeQuote {
                    price,
                    observed_at: Instant::now(),
                });
            }
            info!(
                %price,
                %cap,
                retry_in = ?self.policy.poll_interval,
                "Gas price above cap, waiting for it to drop"
            );
            sleep(self.policy.poll_interval).await;
        }
    }
}
