use std::{fmt, sync::Arc};

use ethers::types::Address;
use tracing::{error, info, warn};

use crate::{
    db::MigrationStore,
    migration::{MigrationRequest, StateTransition},
    submitter::Submission,
    MigratorError,
};

/// Final classification of one channel in a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Mined successfully and recorded as `Submitted`
    Succeeded,
    /// Not migrated, the channel stays `Initialized`
    Failed,
    /// Deadline reached before submission
    Expired,
    /// A network-wide failure, the rest of the batch is abandoned
    Cancelled,
}

impl fmt::Display for MigrationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = match self {
            MigrationOutcome::Succeeded => "succeeded",
            MigrationOutcome::Failed => "failed",
            MigrationOutcome::Expired => "expired",
            MigrationOutcome::Cancelled => "cancelled",
        };
        f.write_str(outcome)
    }
}

impl MigrationOutcome {
    /// Outcome of a channel whose processing stopped with `err`
    pub fn from_error(err: &MigratorError) -> Self {
        if err.cancels_batch() {
            MigrationOutcome::Cancelled
        } else {
            MigrationOutcome::Failed
        }
    }
}

/// Turns submission results into outcomes and records mined migrations
#[derive(Debug, Clone)]
pub struct OutcomeClassifier {
    store: Arc<dyn MigrationStore>,
    target_ledger: Address,
}

impl OutcomeClassifier {
    pub fn new(store: Arc<dyn MigrationStore>, target_ledger: Address) -> Self {
        Self {
            store,
            target_ledger,
        }
    }

    pub async fn classify(
        &self,
        request: &MigrationRequest,
        result: Result<Submission, MigratorError>,
    ) -> MigrationOutcome {
        let receipt = match result {
            Ok(Submission::Included(receipt)) => receipt,
            Ok(Submission::Expired { .. }) => return MigrationOutcome::Expired,
            Err(err) => {
                let outcome = MigrationOutcome::from_error(&err);
                match outcome {
                    MigrationOutcome::Cancelled => {
                        error!(error = %err, "Cannot continue migrating channels")
                    }
                    _ => warn!(error = %err, "Failed to migrate channel"),
                }
                return outcome;
            }
        };

        if !receipt.succeeded {
            warn!(tx_hash = ?receipt.tx_hash, block_number = ?receipt.block_number, "Migration transaction reverted");
            return MigrationOutcome::Failed;
        }

        match self
            .store
            .mark_submitted(request.channel_id, self.target_ledger)
            .await
        {
            Ok(transition) => {
                if transition != StateTransition::Applied {
                    info!(?transition, "Migration state already settled elsewhere");
                }
                info!(tx_hash = ?receipt.tx_hash, block_number = ?receipt.block_number, "Channel migrated");
                MigrationOutcome::Succeeded
            }
            Err(err) => {
                error!(
                    error = %err,
                    tx_hash = ?receipt.tx_hash,
                    "Migration mined but its state could not be recorded"
                );
                MigrationOutcome::Failed
            }
        }
    }
}
