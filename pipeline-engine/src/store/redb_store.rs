//! redb-backed store
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `deals` | `deal_id` | `Deal` (JSON) | Current deal rows |
//! | `stages` | `stage_id` | `Stage` (JSON) | Stage rows |
//! | `history` | `(deal_id, timestamp)` | `HistoryEvent` (JSON) | Append-only deal history |
//!
//! # Durability
//!
//! redb commits are durable once `commit()` returns (copy-on-write with an
//! atomic root swap), so a crash never leaves a half-written deal behind.
//! Each conditional write reads and replaces the row inside one write
//! transaction; redb serializes write transactions, which makes the version
//! check atomic.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use shared::models::{Deal, DealId, PipelineId, Stage, StageId};
use shared::pipeline::{GENESIS_HASH, HistoryEvent};

use super::{ItemStore, StoreError, StoreResult, check_version, sort_deals, sort_stages};
use crate::audit::{AuditError, AuditSink};

/// key = deal_id, value = JSON-serialized Deal
const DEALS_TABLE: TableDefinition<i64, &[u8]> = TableDefinition::new("deals");

/// key = stage_id, value = JSON-serialized Stage
const STAGES_TABLE: TableDefinition<i64, &[u8]> = TableDefinition::new("stages");

/// key = (deal_id, timestamp), value = JSON-serialized HistoryEvent
const HISTORY_TABLE: TableDefinition<(i64, i64), &[u8]> = TableDefinition::new("history");

impl From<redb::DatabaseError> for StoreError {
    fn from(err: redb::DatabaseError) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<redb::TransactionError> for StoreError {
    fn from(err: redb::TransactionError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<redb::TableError> for StoreError {
    fn from(err: redb::TableError) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<redb::StorageError> for StoreError {
    fn from(err: redb::StorageError) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<redb::CommitError> for StoreError {
    fn from(err: redb::CommitError) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// Durable store, also the history sink
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create the database at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// In-memory database (for tests)
    pub fn open_in_memory() -> StoreResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> StoreResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(DEALS_TABLE)?;
            let _ = write_txn.open_table(STAGES_TABLE)?;
            let _ = write_txn.open_table(HISTORY_TABLE)?;
        }
        write_txn.commit()?;
        Ok(Self { db: Arc::new(db) })
    }

    fn read_deal(&self, deal_id: DealId) -> StoreResult<Option<Deal>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DEALS_TABLE)?;
        match table.get(deal_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn append_event(&self, mut event: HistoryEvent) -> StoreResult<HistoryEvent> {
        let txn = self.db.begin_write()?;
        let sealed = {
            let mut table = txn.open_table(HISTORY_TABLE)?;

            let last: Option<HistoryEvent> = match table
                .range((event.deal_id, i64::MIN)..=(event.deal_id, i64::MAX))?
                .next_back()
            {
                Some(entry) => {
                    let (_key, value) = entry?;
                    Some(serde_json::from_slice(value.value())?)
                }
                None => None,
            };

            let prev_hash = match &last {
                Some(last) => {
                    if event.timestamp <= last.timestamp {
                        event.timestamp = last.timestamp + 1;
                    }
                    last.curr_hash.clone()
                }
                None => GENESIS_HASH.to_string(),
            };

            let sealed = event.seal(prev_hash);
            let value = serde_json::to_vec(&sealed)?;
            table.insert((sealed.deal_id, sealed.timestamp), value.as_slice())?;
            sealed
        };
        txn.commit()?;
        Ok(sealed)
    }

    fn events_for_deal(&self, deal_id: DealId) -> StoreResult<Vec<HistoryEvent>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(HISTORY_TABLE)?;

        let mut events = Vec::new();
        for result in table.range((deal_id, i64::MIN)..=(deal_id, i64::MAX))? {
            let (_key, value) = result?;
            events.push(serde_json::from_slice(value.value())?);
        }
        Ok(events)
    }
}

#[async_trait]
impl ItemStore for RedbStore {
    async fn read(&self, deal_id: DealId) -> StoreResult<Deal> {
        self.read_deal(deal_id)?
            .ok_or_else(|| StoreError::deal_not_found(deal_id))
    }

    async fn write(&self, mut deal: Deal, expected_version: Option<u64>) -> StoreResult<Deal> {
        let txn = self.db.begin_write()?;
        {
            let stages = txn.open_table(STAGES_TABLE)?;
            if stages.get(deal.stage_id)?.is_none() {
                return Err(StoreError::Rejected(format!(
                    "stage {} does not exist",
                    deal.stage_id
                )));
            }

            let mut table = txn.open_table(DEALS_TABLE)?;
            let current: Option<Deal> = match table.get(deal.id)? {
                Some(value) => Some(serde_json::from_slice(value.value())?),
                None => None,
            };
            deal.version = check_version(deal.id, current.as_ref(), expected_version)?;

            let value = serde_json::to_vec(&deal)?;
            table.insert(deal.id, value.as_slice())?;
        }
        txn.commit()?;
        Ok(deal)
    }

    async fn delete(&self, deal_id: DealId) -> StoreResult<()> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(DEALS_TABLE)?;
            let removed = table.remove(deal_id)?.is_some();
            removed
        };
        if !removed {
            return Err(StoreError::deal_not_found(deal_id));
        }
        txn.commit()?;
        Ok(())
    }

    async fn list_deals(&self, pipeline_id: PipelineId) -> StoreResult<Vec<Deal>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DEALS_TABLE)?;

        let mut deals = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            let deal: Deal = serde_json::from_slice(value.value())?;
            if deal.pipeline_id == pipeline_id {
                deals.push(deal);
            }
        }
        sort_deals(&mut deals);
        Ok(deals)
    }

    async fn read_stage(&self, stage_id: StageId) -> StoreResult<Stage> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(STAGES_TABLE)?;
        match table.get(stage_id)? {
            Some(value) => Ok(serde_json::from_slice(value.value())?),
            None => Err(StoreError::stage_not_found(stage_id)),
        }
    }

    async fn list_stages(&self, pipeline_id: PipelineId) -> StoreResult<Vec<Stage>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(STAGES_TABLE)?;

        let mut stages = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            let stage: Stage = serde_json::from_slice(value.value())?;
            if stage.pipeline_id == pipeline_id {
                stages.push(stage);
            }
        }
        sort_stages(&mut stages);
        Ok(stages)
    }

    async fn write_stage(&self, stage: Stage) -> StoreResult<Stage> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(STAGES_TABLE)?;
            let value = serde_json::to_vec(&stage)?;
            table.insert(stage.id, value.as_slice())?;
        }
        txn.commit()?;
        Ok(stage)
    }

    async fn delete_stage(&self, stage_id: StageId) -> StoreResult<()> {
        let txn = self.db.begin_write()?;
        {
            let deals = txn.open_table(DEALS_TABLE)?;
            for result in deals.iter()? {
                let (_key, value) = result?;
                let deal: Deal = serde_json::from_slice(value.value())?;
                if deal.stage_id == stage_id {
                    return Err(StoreError::Rejected(format!(
                        "stage {stage_id} is not empty"
                    )));
                }
            }

            let mut table = txn.open_table(STAGES_TABLE)?;
            if table.remove(stage_id)?.is_none() {
                return Err(StoreError::stage_not_found(stage_id));
            }
        }
        txn.commit()?;
        Ok(())
    }
}

#[async_trait]
impl AuditSink for RedbStore {
    async fn append(&self, event: HistoryEvent) -> Result<HistoryEvent, AuditError> {
        Ok(self.append_event(event)?)
    }

    async fn list_for_deal(&self, deal_id: DealId) -> Result<Vec<HistoryEvent>, AuditError> {
        Ok(self.events_for_deal(deal_id)?)
    }
}
