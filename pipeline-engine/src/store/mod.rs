//! Durable item store
//!
//! The engine only needs read, conditional write and delete keyed by deal id,
//! plus the stage rows of a pipeline. Writes carry the version the caller
//! last saw; the store rejects them with [`StoreError::Conflict`] when the row
//! moved on in between.
//!
//! | Adapter | Backing | Use |
//! |---------|---------|-----|
//! | [`MemoryStore`] | `HashMap` | tests, embedding, fault injection |
//! | [`RedbStore`] | redb file | durable single-node deployments |

mod memory;
mod redb_store;

pub use memory::MemoryStore;
pub use redb_store::RedbStore;

use async_trait::async_trait;
use shared::models::{Deal, DealId, PipelineId, Stage, StageId};
use thiserror::Error;

/// Store errors
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Optimistic concurrency check failed
    #[error("Version conflict on {id}: expected {expected:?}, found {actual:?}")]
    Conflict {
        id: i64,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    /// Transient (network, lock timeout), worth retrying
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The store refused the data itself
    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn deal_not_found(id: DealId) -> Self {
        Self::NotFound(format!("deal {id}"))
    }

    pub fn stage_not_found(id: StageId) -> Self {
        Self::NotFound(format!("stage {id}"))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether the same request may succeed later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::Unavailable(_) | Self::Database(_)
        )
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence boundary of the engine
#[async_trait]
pub trait ItemStore: Send + Sync + 'static {
    async fn read(&self, deal_id: DealId) -> StoreResult<Deal>;

    /// Conditional write
    ///
    /// `expected_version = None` inserts and fails if the deal exists.
    /// `Some(v)` replaces the row only if it is still at version `v`.
    /// Returns the stored deal with its new version.
    async fn write(&self, deal: Deal, expected_version: Option<u64>) -> StoreResult<Deal>;

    async fn delete(&self, deal_id: DealId) -> StoreResult<()>;

    async fn list_deals(&self, pipeline_id: PipelineId) -> StoreResult<Vec<Deal>>;

    async fn read_stage(&self, stage_id: StageId) -> StoreResult<Stage>;

    /// Ordered by ordinal, then id
    async fn list_stages(&self, pipeline_id: PipelineId) -> StoreResult<Vec<Stage>>;

    /// Insert or replace
    async fn write_stage(&self, stage: Stage) -> StoreResult<Stage>;

    async fn delete_stage(&self, stage_id: StageId) -> StoreResult<()>;
}

/// Version check shared by the adapters
pub(crate) fn check_version(
    id: DealId,
    current: Option<&Deal>,
    expected: Option<u64>,
) -> StoreResult<u64> {
    match (current, expected) {
        (None, None) => Ok(1),
        (None, Some(_)) => Err(StoreError::deal_not_found(id)),
        (Some(cur), expected) if expected == Some(cur.version) => Ok(cur.version + 1),
        (Some(cur), expected) => Err(StoreError::Conflict {
            id,
            expected,
            actual: Some(cur.version),
        }),
    }
}

pub(crate) fn sort_stages(stages: &mut [Stage]) {
    stages.sort_by_key(|s| (s.ordinal, s.id));
}

pub(crate) fn sort_deals(deals: &mut [Deal]) {
    deals.sort_by_key(|d| (d.stage_id, d.position, d.id));
}
