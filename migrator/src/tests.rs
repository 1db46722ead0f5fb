use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use tempfile::TempDir;
use tokio::time::Instant;
use tracing_test::traced_test;

use crate::{
    chain::{ChainCommunicationError, ChainReader, ChainResult, FeeOracle, InclusionReceipt, LedgerContract},
    db::{DbResult, MigrationRocksDb, MigrationStore, DB},
    fee::FeePolicy,
    migration::{
        ChannelId, ChannelMigrationInfo, MigrationRecord, MigrationRequest, MigrationState,
        StateTransition,
    },
    orchestrator::{BatchOrchestrator, BatchSettings, BatchSummary},
    FIND_GAS_PRICE_TIMEOUT, GAS_PRICE_POLL_INTERVAL,
};

mockall::mock! {
    pub FeeOracle {}

    #[async_trait]
    impl FeeOracle for FeeOracle {
        async fn suggest_price(&self) -> ChainResult<U256>;
    }
}

mockall::mock! {
    pub ChainReader {}

    #[async_trait]
    impl ChainReader for ChainReader {
        async fn current_height(&self) -> ChainResult<u64>;
    }
}

mockall::mock! {
    pub LedgerContract {}

    #[async_trait]
    impl LedgerContract for LedgerContract {
        async fn submit_migration(
            &self,
            source_ledger: Address,
            migration_request: Vec<u8>,
            gas_price: U256,
        ) -> ChainResult<H256>;

        async fn await_inclusion(
            &self,
            tx_hash: H256,
            max_wait: Duration,
        ) -> ChainResult<InclusionReceipt>;
    }
}

mockall::mock! {
    pub MigrationStore {}

    #[async_trait]
    impl MigrationStore for MigrationStore {
        async fn list_pending_migrations(
            &self,
            target_ledger: Address,
            limit: usize,
        ) -> DbResult<Vec<MigrationRequest>>;

        async fn mark_submitted(
            &self,
            channel_id: ChannelId,
            target_ledger: Address,
        ) -> DbResult<StateTransition>;

        async fn upsert_migration(&self, record: &MigrationRecord) -> DbResult<()>;

        async fn retrieve_migration(
            &self,
            channel_id: ChannelId,
            target_ledger: Address,
        ) -> DbResult<Option<MigrationRecord>>;

        async fn delete_migration(&self, channel_id: ChannelId, target_ledger: Address) -> DbResult<()>;
    }
}

pub(crate) fn gwei(amount: u64) -> U256 {
    U256::from(amount).saturating_mul(U256::exp10(9))
}

pub(crate) fn source_ledger() -> Address {
    Address::repeat_byte(0x5a)
}

pub(crate) fn target_ledger() -> Address {
    Address::repeat_byte(0x7b)
}

pub(crate) fn channel(byte: u8) -> ChannelId {
    ChannelId(H256::repeat_byte(byte))
}

/// A request for channel `0xbyte..` with a properly encoded, signed payload
pub(crate) fn migration_request(channel_byte: u8, deadline_block: u64) -> MigrationRequest {
    let info = ChannelMigrationInfo {
        channel_id: channel(channel_byte),
        from_ledger: source_ledger(),
        to_ledger: target_ledger(),
        migration_deadline: deadline_block,
    };
    MigrationRequest {
        channel_id: info.channel_id,
        migration_request: info
            .to_migration_request(&[channel_byte; 65], &[0xbb; 65])
            .unwrap(),
        deadline_block,
    }
}

pub(crate) fn tmp_db() -> (TempDir, DB) {
    let dir = tempfile::tempdir().unwrap();
    let db = DB::from_path(&dir.path().join("migrations")).unwrap();
    (dir, db)
}

async fn seeded_store(requests: &[MigrationRequest]) -> (TempDir, Arc<MigrationRocksDb>) {
    let (dir, db) = tmp_db();
    let store = Arc::new(MigrationRocksDb::new(db));
    for request in requests {
        store
            .upsert_migration(&MigrationRecord::new(
                request.channel_id,
                target_ledger(),
                request.deadline_block,
                request.migration_request.clone(),
            ))
            .await
            .unwrap();
    }
    (dir, store)
}

async fn state_of(store: &MigrationRocksDb, channel_byte: u8) -> MigrationState {
    store
        .retrieve_migration(channel(channel_byte), target_ledger())
        .await
        .unwrap()
        .unwrap()
        .state
}

fn settings() -> BatchSettings {
    BatchSettings::new(target_ledger(), 50, FeePolicy::with_cap(4))
}

/// Oracle replaying `prices` in gwei, repeating the last one
fn replaying_oracle(prices: Vec<u64>) -> (MockFeeOracle, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut oracle = MockFeeOracle::new();
    oracle.expect_suggest_price().returning(move || {
        let call = counter.fetch_add(1, Ordering::SeqCst);
        Ok(gwei(prices[call.min(prices.len().saturating_sub(1))]))
    });
    (oracle, calls)
}

fn chain_at(height: u64) -> MockChainReader {
    let mut chain = MockChainReader::new();
    chain.expect_current_height().returning(move || Ok(height));
    chain
}

/// Ledger whose transactions hash to the migrated channel id and are mined successfully,
/// except for the channels listed in `reverting`
fn ledger_reverting(reverting: Vec<ChannelId>) -> MockLedgerContract {
    let mut ledger = MockLedgerContract::new();
    ledger
        .expect_submit_migration()
        .returning(|_, migration_request, _| {
            let info = ChannelMigrationInfo::from_migration_request(&migration_request).unwrap();
            Ok(info.channel_id.0)
        });
    ledger.expect_await_inclusion().returning(move |tx_hash, _| {
        if reverting.contains(&ChannelId(tx_hash)) {
            Ok(InclusionReceipt::reverted(tx_hash, 90))
        } else {
            Ok(InclusionReceipt::succeeded(tx_hash, 90))
        }
    });
    ledger
}

#[tokio::test]
async fn empty_backlog_is_a_no_op() {
    let (_dir, store) = seeded_store(&[]).await;
    let mut oracle = MockFeeOracle::new();
    oracle.expect_suggest_price().never();
    let mut chain = MockChainReader::new();
    chain.expect_current_height().never();
    let mut ledger = MockLedgerContract::new();
    ledger.expect_submit_migration().never();
    ledger.expect_await_inclusion().never();
    let orchestrator = BatchOrchestrator::new(
        settings(),
        store,
        Arc::new(oracle),
        Arc::new(chain),
        Arc::new(ledger),
    );

    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary, BatchSummary::default());
    assert_eq!(summary.untouched(), 0);
}

#[tokio::test(start_paused = true)]
async fn each_channel_negotiates_its_own_fee() {
    let requests = [
        migration_request(1, 1_000),
        migration_request(2, 1_001),
        migration_request(3, 1_002),
    ];
    let (_dir, store) = seeded_store(&requests).await;
    let (oracle, oracle_calls) = replaying_oracle(vec![10, 10, 3]);
    let mut ledger = MockLedgerContract::new();
    ledger
        .expect_submit_migration()
        .withf(|source, _, price| *source == source_ledger() && *price == gwei(3))
        .times(3)
        .returning(|_, migration_request, _| {
            Ok(ChannelMigrationInfo::from_migration_request(&migration_request)
                .unwrap()
                .channel_id
                .0)
        });
    ledger
        .expect_await_inclusion()
        .times(3)
        .returning(|tx_hash, _| Ok(InclusionReceipt::succeeded(tx_hash, 500)));
    let orchestrator = BatchOrchestrator::new(
        settings(),
        store.clone(),
        Arc::new(oracle),
        Arc::new(chain_at(400)),
        Arc::new(ledger),
    );
    let started = Instant::now();

    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.untouched(), 0);
    assert!(!summary.cancelled);
    // two sleeps for the first channel, none for the others
    assert_eq!(started.elapsed(), GAS_PRICE_POLL_INTERVAL * 2);
    assert_eq!(oracle_calls.load(Ordering::SeqCst), 5);
    for channel_byte in 1..=3 {
        assert_eq!(
            state_of(&store, channel_byte).await,
            MigrationState::Submitted
        );
    }
}

#[tokio::test(start_paused = true)]
async fn unavailable_gas_price_cancels_the_batch() {
    let requests = [migration_request(1, 1_000), migration_request(2, 1_000)];
    let (_dir, store) = seeded_store(&requests).await;
    let (oracle, _) = replaying_oracle(vec![50]);
    let mut chain = MockChainReader::new();
    chain.expect_current_height().never();
    let mut ledger = MockLedgerContract::new();
    ledger.expect_submit_migration().never();
    let orchestrator = BatchOrchestrator::new(
        settings(),
        store.clone(),
        Arc::new(oracle),
        Arc::new(chain),
        Arc::new(ledger),
    );
    let started = Instant::now();

    let summary = orchestrator.run().await.unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.total, 2);
    assert_eq!(summary.untouched(), 2);
    assert_eq!(started.elapsed(), FIND_GAS_PRICE_TIMEOUT);
    assert_eq!(
        store
            .list_pending_migrations(target_ledger(), 50)
            .await
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn oracle_error_mid_batch_leaves_the_rest_initialized() {
    let requests = [
        migration_request(1, 1_000),
        migration_request(2, 1_001),
        migration_request(3, 1_002),
    ];
    let (_dir, store) = seeded_store(&requests).await;
    let mut oracle = MockFeeOracle::new();
    let mut seq = mockall::Sequence::new();
    oracle
        .expect_suggest_price()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|| Ok(gwei(3)));
    oracle
        .expect_suggest_price()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|| Err(ChainCommunicationError::ProviderError("502 Bad Gateway".to_owned())));
    let orchestrator = BatchOrchestrator::new(
        settings(),
        store.clone(),
        Arc::new(oracle),
        Arc::new(chain_at(400)),
        Arc::new(ledger_reverting(vec![])),
    );

    let summary = orchestrator.run().await.unwrap();

    assert_eq!(
        summary,
        BatchSummary {
            total: 3,
            succeeded: 1,
            expired: 0,
            failed: 0,
            cancelled: true,
        }
    );
    assert_eq!(summary.untouched(), 2);
    assert_eq!(state_of(&store, 1).await, MigrationState::Submitted);
    assert_eq!(state_of(&store, 2).await, MigrationState::Initialized);
    assert_eq!(state_of(&store, 3).await, MigrationState::Initialized);
}

#[tokio::test]
async fn height_lookup_failure_cancels_the_batch() {
    let requests = [migration_request(1, 1_000), migration_request(2, 1_001)];
    let (_dir, store) = seeded_store(&requests).await;
    let (oracle, _) = replaying_oracle(vec![1]);
    let mut chain = MockChainReader::new();
    chain
        .expect_current_height()
        .times(1)
        .returning(|| Err(ChainCommunicationError::ProviderError("connection reset".to_owned())));
    let mut ledger = MockLedgerContract::new();
    ledger.expect_submit_migration().never();
    let orchestrator = BatchOrchestrator::new(
        settings(),
        store,
        Arc::new(oracle),
        Arc::new(chain),
        Arc::new(ledger),
    );

    let summary = orchestrator.run().await.unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.untouched(), 2);
}

#[tokio::test]
#[traced_test]
async fn mixed_outcomes_are_counted_and_only_successes_recorded() {
    // processed in deadline order: 1 expired, 2 reverts, 3 succeeds
    let requests = [
        migration_request(3, 300),
        migration_request(1, 100),
        migration_request(2, 200),
    ];
    let (_dir, store) = seeded_store(&requests).await;
    let (oracle, _) = replaying_oracle(vec![2]);
    let orchestrator = BatchOrchestrator::new(
        settings(),
        store.clone(),
        Arc::new(oracle),
        Arc::new(chain_at(100)),
        Arc::new(ledger_reverting(vec![channel(2)])),
    );

    let summary = orchestrator.run().await.unwrap();

    assert_eq!(
        summary,
        BatchSummary {
            total: 3,
            succeeded: 1,
            expired: 1,
            failed: 1,
            cancelled: false,
        }
    );
    assert_eq!(state_of(&store, 1).await, MigrationState::Initialized);
    assert_eq!(state_of(&store, 2).await, MigrationState::Initialized);
    assert_eq!(state_of(&store, 3).await, MigrationState::Submitted);
    assert!(logs_contain("Migration request expired"));
    assert!(logs_contain("Migration transaction reverted"));
    assert!(logs_contain(
        "Migration done! 1 succeeded, 1 expired, 1 failed, 0 untouched out of 3 channels"
    ));
}

#[tokio::test]
async fn limit_bounds_the_batch() {
    let requests: Vec<_> = (1..=5).map(|i| migration_request(i, 1_000 + u64::from(i))).collect();
    let (_dir, store) = seeded_store(&requests).await;
    let (oracle, _) = replaying_oracle(vec![1]);
    let mut settings = settings();
    settings.limit = 2;
    let orchestrator = BatchOrchestrator::new(
        settings,
        store.clone(),
        Arc::new(oracle),
        Arc::new(chain_at(10)),
        Arc::new(ledger_reverting(vec![])),
    );

    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.total, 2);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(state_of(&store, 1).await, MigrationState::Submitted);
    assert_eq!(state_of(&store, 2).await, MigrationState::Submitted);
    assert_eq!(state_of(&store, 3).await, MigrationState::Initialized);
}

#[tokio::test]
async fn backlog_read_failure_is_an_error() {
    let mut store = MockMigrationStore::new();
    store
        .expect_list_pending_migrations()
        .returning(|_, _| Err(crate::db::DbError::Other("corrupted".to_owned())));
    let mut oracle = MockFeeOracle::new();
    oracle.expect_suggest_price().never();
    let orchestrator = BatchOrchestrator::new(
        settings(),
        Arc::new(store),
        Arc::new(oracle),
        Arc::new(MockChainReader::new()),
        Arc::new(MockLedgerContract::new()),
    );

    let err = orchestrator.run().await.unwrap_err();

    assert!(matches!(err, crate::MigratorError::DbError(_)));
}
