use std::fmt::Debug;

use async_trait::async_trait;
use chrono::Utc;
use ethers::types::Address;
use tracing::{debug, warn};

use crate::migration::{ChannelId, MigrationRecord, MigrationRequest, MigrationState, StateTransition};

use super::{DbResult, DB};

const MIGRATION_BY_LEDGER_AND_CHANNEL_STORAGE_PREFIX: &str = "migration_by_ledger_and_channel_";

/// Persistent migration rows, keyed by (channel id, target ledger)
#[async_trait]
pub trait MigrationStore: Send + Sync + Debug {
    /// Up to `limit` requests towards `target_ledger` that are still `Initialized`,
    /// soonest deadline first.
    async fn list_pending_migrations(
        &self,
        target_ledger: Address,
        limit: usize,
    ) -> DbResult<Vec<MigrationRequest>>;

    /// Atomically move a row from `Initialized` to `Submitted`. Calling it again for
    /// the same row is harmless.
    async fn mark_submitted(
        &self,
        channel_id: ChannelId,
        target_ledger: Address,
    ) -> DbResult<StateTransition>;

    /// Insert or replace a row
    async fn upsert_migration(&self, record: &MigrationRecord) -> DbResult<()>;

    /// Retrieve a row by its key
    async fn retrieve_migration(
        &self,
        channel_id: ChannelId,
        target_ledger: Address,
    ) -> DbResult<Option<MigrationRecord>>;

    /// Remove a row, e.g. once the channel has been closed
    async fn delete_migration(&self, channel_id: ChannelId, target_ledger: Address)
        -> DbResult<()>;
}

/// [`MigrationStore`] on top of rocksdb, values are json encoded
#[derive(Debug, Clone)]
pub struct MigrationRocksDb {
    db: DB,
}

impl MigrationRocksDb {
    pub fn new(db: DB) -> Self {
        Self { db }
    }

    fn ledger_prefix(target_ledger: &Address) -> Vec<u8> {
        let mut prefix = MIGRATION_BY_LEDGER_AND_CHANNEL_STORAGE_PREFIX.as_bytes().to_vec();
        prefix.extend_from_slice(target_ledger.as_bytes());
        prefix
    }

    fn key(channel_id: &ChannelId, target_ledger: &Address) -> Vec<u8> {
        let mut key = Self::ledger_prefix(target_ledger);
        key.extend_from_slice(channel_id.as_bytes());
        key
    }
}

#[async_trait]
impl MigrationStore for MigrationRocksDb {
    async fn list_pending_migrations(
        &self,
        target_ledger: Address,
        limit: usize,
    ) -> DbResult<Vec<MigrationRequest>> {
        let mut pending = self
            .db
            .prefix_entries(&Self::ledger_prefix(&target_ledger))?
            .into_iter()
            .filter_map(|(key, value)| {
                match serde_json::from_slice::<MigrationRecord>(&value) {
                    Ok(record) => Some(record),
                    Err(err) => {
                        warn!(
                            ?err,
                            key = %String::from_utf8_lossy(&key),
                            "Skipping undecodable migration row"
                        );
                        None
                    }
                }
            })
            .filter(|record| record.state == MigrationState::Initialized)
            .collect::<Vec<_>>();
        pending.sort_by_key(|record| (record.deadline_block, record.channel_id));
        pending.truncate(limit);
        Ok(pending.iter().map(MigrationRecord::to_request).collect())
    }

    async fn mark_submitted(
        &self,
        channel_id: ChannelId,
        target_ledger: Address,
    ) -> DbResult<StateTransition> {
        let key = Self::key(&channel_id, &target_ledger);
        let transition = self.db.transactional(|txn| {
            let Some(stored) = txn.get_for_update(&key, true)? else {
                return Ok(StateTransition::NotFound);
            };
            let mut record: MigrationRecord = serde_json::from_slice(&stored)?;
            if record.state == MigrationState::Submitted {
                return Ok(StateTransition::AlreadySubmitted);
            }
            record.state = MigrationState::Submitted;
            record.last_updated = Utc::now();
            txn.put(&key, serde_json::to_vec(&record)?)?;
            Ok(StateTransition::Applied)
        })?;
        debug!(%channel_id, ?target_ledger, ?transition, "Recorded submitted migration");
        Ok(transition)
    }

    async fn upsert_migration(&self, record: &MigrationRecord) -> DbResult<()> {
        let mut record = record.clone();
        record.last_updated = Utc::now();
        self.db.store(
            &Self::key(&record.channel_id, &record.target_ledger),
            &serde_json::to_vec(&record)?,
        )
    }

    async fn retrieve_migration(
        &self,
        channel_id: ChannelId,
        target_ledger: Address,
    ) -> DbResult<Option<MigrationRecord>> {
        self.db
            .retrieve(&Self::key(&channel_id, &target_ledger))?
            .map(|value| serde_json::from_slice(&value))
            .transpose()
            .map_err(Into::into)
    }

    async fn delete_migration(
        &self,
        channel_id: ChannelId,
        target_ledger: Address,
    ) -> DbResult<()> {
        self.db.delete(&Self::key(&channel_id, &target_ledger))
    }
}
