use std::{sync::Arc, time::Duration};

use tokio::time::timeout;
use tracing::{info, instrument, warn};

use crate::{
    chain::{ChainCommunicationError, ChainReader, InclusionReceipt, LedgerContract},
    fee::FeeQuote,
    migration::MigrationRequest,
    MigratorError,
};

/// What happened to a request handed to the submitter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// The deadline was reached before submission; nothing was sent
    Expired { deadline_block: u64, height: u64 },
    /// The transaction was mined. The receipt may still report a revert.
    Included(InclusionReceipt),
}

/// Sends one migration transaction at a time and waits for it to land
#[derive(Debug, Clone)]
pub struct MigrationSubmitter {
    chain: Arc<dyn ChainReader>,
    ledger: Arc<dyn LedgerContract>,
    inclusion_timeout: Duration,
}

impl MigrationSubmitter {
    pub fn new(
        chain: Arc<dyn ChainReader>,
        ledger: Arc<dyn LedgerContract>,
        inclusion_timeout: Duration,
    ) -> Self {
        Self {
            chain,
            ledger,
            inclusion_timeout,
        }
    }

    /// Submit `request` at the negotiated price unless its deadline has been reached.
    ///
    /// The chain height is read right before submitting, after fee negotiation may
    /// have taken minutes. A failure to read it is reported as
    /// [`MigratorError::BlockHeightError`].
    #[instrument(skip_all, fields(channel_id = %request.channel_id, deadline_block = request.deadline_block))]
    pub async fn submit(
        &self,
        request: &MigrationRequest,
        fee: &FeeQuote,
    ) -> Result<Submission, MigratorError> {
        let height = self
            .chain
            .current_height()
            .await
            .map_err(MigratorError::BlockHeightError)?;
        if request.is_expired_at(height) {
            info!(height, "Migration request expired, skipping");
            return Ok(Submission::Expired {
                deadline_block: request.deadline_block,
                height,
            });
        }

        let source_ledger = request.source_ledger()?;
        let tx_hash = self
            .ledger
            .submit_migration(
                source_ledger,
                request.migration_request.clone(),
                fee.price,
            )
            .await
            .map_err(MigratorError::TxSubmissionError)?;
        info!(?tx_hash, ?source_ledger, gas_price = %fee.price, "Submitted migration transaction");

        let receipt = timeout(
            self.inclusion_timeout,
            self.ledger.await_inclusion(tx_hash, self.inclusion_timeout),
        )
        .await
        .map_err(|_| {
            warn!(?tx_hash, timeout = ?self.inclusion_timeout, "Gave up waiting for migration transaction");
            MigratorError::TxInclusionError(ChainCommunicationError::Timeout(self.inclusion_timeout))
        })?
        .map_err(MigratorError::TxInclusionError)?;
        Ok(Submission::Included(receipt))
    }
}
