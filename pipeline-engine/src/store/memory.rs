use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use shared::models::{Deal, DealId, PipelineId, Stage, StageId};

use super::{ItemStore, StoreError, StoreResult, check_version, sort_deals, sort_stages};

#[derive(Debug, Default)]
struct State {
    deals: HashMap<DealId, Deal>,
    stages: HashMap<StageId, Stage>,
}

#[derive(Debug, Default)]
struct Faults {
    /// `None` lets that write through
    writes: VecDeque<Option<StoreError>>,
    deletes: VecDeque<StoreError>,
    write_delay: Option<Duration>,
}

/// In-process store
///
/// Cloning shares the same data. Besides the [`ItemStore`] contract it can
/// inject failures into upcoming writes and deletes, delay writes, and change
/// rows behind the engine's back the way another client would.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    faults: Arc<Mutex<Faults>>,
    writes: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed stages and deals as-is (versions untouched)
    pub fn with_data(stages: Vec<Stage>, deals: Vec<Deal>) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.lock();
            state.stages = stages.into_iter().map(|s| (s.id, s)).collect();
            state.deals = deals.into_iter().map(|d| (d.id, d)).collect();
        }
        store
    }

    /// Fail the next `count` deal writes with `err`
    pub fn fail_next_writes(&self, count: usize, err: StoreError) {
        let mut faults = self.faults.lock();
        faults.writes.extend(std::iter::repeat_n(Some(err), count));
    }

    /// Outcomes for the upcoming deal writes, in order: `None` passes,
    /// `Some(err)` fails that write
    pub fn script_writes(&self, outcomes: impl IntoIterator<Item = Option<StoreError>>) {
        self.faults.lock().writes.extend(outcomes);
    }

    /// Fail the next `count` deletes with `err`
    pub fn fail_next_deletes(&self, count: usize, err: StoreError) {
        let mut faults = self.faults.lock();
        faults.deletes.extend(std::iter::repeat_n(err, count));
    }

    /// Sleep before every deal write
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        self.faults.lock().write_delay = delay;
    }

    /// Overwrite a deal without a version check, bumping its version
    pub fn write_unchecked(&self, mut deal: Deal) -> Deal {
        let mut state = self.state.lock();
        deal.version = state.deals.get(&deal.id).map_or(1, |d| d.version + 1);
        state.deals.insert(deal.id, deal.clone());
        deal
    }

    /// Remove a deal without going through the store contract
    pub fn remove_unchecked(&self, deal_id: DealId) -> Option<Deal> {
        self.state.lock().deals.remove(&deal_id)
    }

    /// Current row, if any
    pub fn get(&self, deal_id: DealId) -> Option<Deal> {
        self.state.lock().deals.get(&deal_id).cloned()
    }

    /// Number of deal writes attempted
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn read(&self, deal_id: DealId) -> StoreResult<Deal> {
        self.get(deal_id)
            .ok_or_else(|| StoreError::deal_not_found(deal_id))
    }

    async fn write(&self, mut deal: Deal, expected_version: Option<u64>) -> StoreResult<Deal> {
        self.writes.fetch_add(1, Ordering::SeqCst);

        let (fault, delay) = {
            let mut faults = self.faults.lock();
            (faults.writes.pop_front().flatten(), faults.write_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = fault {
            return Err(err);
        }

        let mut state = self.state.lock();
        if !state.stages.contains_key(&deal.stage_id) {
            return Err(StoreError::Rejected(format!(
                "stage {} does not exist",
                deal.stage_id
            )));
        }
        deal.version = check_version(deal.id, state.deals.get(&deal.id), expected_version)?;
        state.deals.insert(deal.id, deal.clone());
        Ok(deal)
    }

    async fn delete(&self, deal_id: DealId) -> StoreResult<()> {
        if let Some(err) = self.faults.lock().deletes.pop_front() {
            return Err(err);
        }
        self.state
            .lock()
            .deals
            .remove(&deal_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::deal_not_found(deal_id))
    }

    async fn list_deals(&self, pipeline_id: PipelineId) -> StoreResult<Vec<Deal>> {
        let mut deals: Vec<Deal> = self
            .state
            .lock()
            .deals
            .values()
            .filter(|d| d.pipeline_id == pipeline_id)
            .cloned()
            .collect();
        sort_deals(&mut deals);
        Ok(deals)
    }

    async fn read_stage(&self, stage_id: StageId) -> StoreResult<Stage> {
        self.state
            .lock()
            .stages
            .get(&stage_id)
            .cloned()
            .ok_or_else(|| StoreError::stage_not_found(stage_id))
    }

    async fn list_stages(&self, pipeline_id: PipelineId) -> StoreResult<Vec<Stage>> {
        let mut stages: Vec<Stage> = self
            .state
            .lock()
            .stages
            .values()
            .filter(|s| s.pipeline_id == pipeline_id)
            .cloned()
            .collect();
        sort_stages(&mut stages);
        Ok(stages)
    }

    async fn write_stage(&self, stage: Stage) -> StoreResult<Stage> {
        self.state.lock().stages.insert(stage.id, stage.clone());
        Ok(stage)
    }

    async fn delete_stage(&self, stage_id: StageId) -> StoreResult<()> {
        let mut state = self.state.lock();
        if state.deals.values().any(|d| d.stage_id == stage_id) {
            return Err(StoreError::Rejected(format!("stage {stage_id} is not empty")));
        }
        state
            .stages
            .remove(&stage_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::stage_not_found(stage_id))
    }
}
