use std::{fmt, ops::ControlFlow, sync::Arc, time::Duration};

use ethers::types::Address;
use tracing::{debug, info, instrument};

use crate::{
    chain::{ChainReader, FeeOracle, LedgerContract},
    db::MigrationStore,
    fee::{FeeNegotiator, FeePolicy},
    migration::MigrationRequest,
    outcome::{MigrationOutcome, OutcomeClassifier},
    submitter::MigrationSubmitter,
    MigratorError, MAX_CHANNEL_LIMIT, WAIT_MINED_TIMEOUT,
};

/// Parameters of one batch run, fixed for its whole duration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSettings {
    /// ledger contract the channels are migrated into
    pub target_ledger: Address,
    /// maximum number of channels handled in this run
    pub limit: usize,
    pub fee_policy: FeePolicy,
    /// how long to wait for each migration transaction to be mined
    pub inclusion_timeout: Duration,
}

impl BatchSettings {
    pub fn new(target_ledger: Address, limit: usize, fee_policy: FeePolicy) -> Self {
        Self {
            target_ledger,
            limit,
            fee_policy,
            inclusion_timeout: WAIT_MINED_TIMEOUT,
        }
    }
}

/// Per-outcome counts of a batch run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub expired: usize,
    pub failed: usize,
    /// whether the run stopped before reaching the end of the backlog
    pub cancelled: bool,
}

impl BatchSummary {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    /// Channels left `Initialized` because the batch was cancelled before reaching them
    pub fn untouched(&self) -> usize {
        self.total
            .saturating_sub(self.succeeded)
            .saturating_sub(self.expired)
            .saturating_sub(self.failed)
    }

    /// Count `outcome`, breaking once the batch must stop
    pub fn record(&mut self, outcome: MigrationOutcome) -> ControlFlow<()> {
        match outcome {
            MigrationOutcome::Succeeded => self.succeeded = self.succeeded.saturating_add(1),
            MigrationOutcome::Expired => self.expired = self.expired.saturating_add(1),
            MigrationOutcome::Failed => self.failed = self.failed.saturating_add(1),
            MigrationOutcome::Cancelled => {
                self.cancelled = true;
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Migration done! {} succeeded, {} expired, {} failed, {} untouched out of {} channels",
            self.succeeded,
            self.expired,
            self.failed,
            self.untouched(),
            self.total
        )
    }
}

/// Works through the backlog of pending migrations towards one ledger, one channel
/// at a time
#[derive(Debug)]
pub struct BatchOrchestrator {
    settings: BatchSettings,
    store: Arc<dyn MigrationStore>,
    negotiator: FeeNegotiator,
    submitter: MigrationSubmitter,
    classifier: OutcomeClassifier,
}

impl BatchOrchestrator {
    pub fn new(
        settings: BatchSettings,
        store: Arc<dyn MigrationStore>,
        oracle: Arc<dyn FeeOracle>,
        chain: Arc<dyn ChainReader>,
        ledger: Arc<dyn LedgerContract>,
    ) -> Self {
        let negotiator = FeeNegotiator::new(oracle, settings.fee_policy);
        let submitter = MigrationSubmitter::new(chain, ledger, settings.inclusion_timeout);
        let classifier = OutcomeClassifier::new(store.clone(), settings.target_ledger);
        Self {
            settings,
            store,
            negotiator,
            submitter,
            classifier,
        }
    }

    /// Migrate up to `limit` pending channels. Only a failure to read the backlog is
    /// returned as an error; per-channel problems end up in the summary.
    #[instrument(skip(self), fields(target_ledger = ?self.settings.target_ledger, limit = self.settings.limit))]
    pub async fn run(&self) -> Result<BatchSummary, MigratorError> {
        let pending = self
            .store
            .list_pending_migrations(
                self.settings.target_ledger,
                self.settings.limit.min(MAX_CHANNEL_LIMIT),
            )
            .await?;
        if pending.is_empty() {
            info!("No channel needs to be migrated");
            return Ok(BatchSummary::default());
        }

        info!(channels = pending.len(), "Migrating channels");
        let mut summary = BatchSummary::new(pending.len());
        for request in &pending {
            let outcome = self.migrate_channel(request).await;
            if summary.record(outcome).is_break() {
                break;
            }
        }
        info!(cancelled = summary.cancelled, "{summary}");
        Ok(summary)
    }

    #[instrument(skip_all, fields(channel_id = %request.channel_id))]
    async fn migrate_channel(&self, request: &MigrationRequest) -> MigrationOutcome {
        let result = match self.negotiator.negotiate().await {
            Ok(fee) => self.submitter.submit(request, &fee).await,
            Err(err) => Err(err),
        };
        let outcome = self.classifier.classify(request, result).await;
        debug!(%outcome, "Channel processed");
        outcome
    }
}
