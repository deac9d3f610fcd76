//! PipelineEngine - optimistic mutation orchestration
//!
//! Every deal mutation goes through the same phases:
//!
//! ```text
//! move_deal / create_deal / update_deal / remove_deal / add_tag / remove_tag
//!     ├─ 1. Cancel the deal's pending reconciliation, mark it in flight
//!     ├─ 2. Deal lock (mutations of other deals never wait on it)
//!     ├─ 3. Applying: snapshot, compute, mutate the local view
//!     ├─ 4. Persisting: conditional store write (silent retry on a stale version)
//!     ├─ 5a. Committed: history, notification, debounced reconciliation
//!     └─ 5b. RollingBack: restore the snapshot, error notification
//! ```
//!
//! Stage subscribers receive a fresh [`StageView`] after steps 3 and 5.

mod deals;
mod layout;
mod moves;
mod stages;
mod tags;

pub use deals::CreateOutcome;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use shared::AppError;
use shared::models::{Deal, DealId, PipelineId, StageId};
use shared::pipeline::{Actor, ChainVerification, HistoryEvent, Notification, StageView};
use tokio::sync::{Mutex, OwnedMutexGuard, broadcast};
use tokio_util::sync::CancellationToken;

use super::aggregator::StageAggregator;
use super::error::{EngineError, EngineResult};
use super::notify::{Notifier, SubscriptionId};
use super::reconcile::Reconciler;
use super::view::PipelineView;
use crate::audit::{AuditError, AuditRecorder, AuditSink, MemoryAuditSink};
use crate::clock::{Clock, SystemClock};
use crate::core::EngineConfig;
use crate::position::PositionAllocator;
use crate::store::{ItemStore, RedbStore, StoreError};

/// Outcome of [`EngineInner::write_with_retry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Persisted {
    Written,
    /// Another client already stored the same change; nothing was written
    Unchanged,
}

/// Where a mutation currently is, recorded on its tracing span
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPhase {
    Idle,
    Applying,
    Persisting,
    Committed,
    RollingBack,
}

impl MutationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Applying => "applying",
            Self::Persisting => "persisting",
            Self::Committed => "committed",
            Self::RollingBack => "rolling_back",
        }
    }
}

impl fmt::Display for MutationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn enter_phase(phase: MutationPhase) {
    tracing::Span::current().record("phase", phase.as_str());
    tracing::trace!(phase = %phase, "Mutation phase");
}

/// Marks a deal as having a mutation in flight; reconciliation leaves it alone
struct InFlight {
    map: Arc<DashMap<DealId, usize>>,
    deal_id: DealId,
}

impl InFlight {
    fn enter(map: &Arc<DashMap<DealId, usize>>, deal_id: DealId) -> Self {
        *map.entry(deal_id).or_insert(0) += 1;
        Self {
            map: map.clone(),
            deal_id,
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Entry::Occupied(mut entry) = self.map.entry(self.deal_id) {
            *entry.get_mut() -= 1;
            if *entry.get() == 0 {
                entry.remove();
            }
        }
    }
}

/// One mutex per deal, kept in the map only while held or awaited
#[derive(Default)]
struct DealLocks {
    locks: Arc<DashMap<DealId, Arc<Mutex<()>>>>,
}

impl DealLocks {
    async fn acquire(&self, deal_id: DealId) -> DealLock {
        let lock = self.locks.entry(deal_id).or_default().clone();
        let guard = lock.lock_owned().await;
        DealLock {
            guard: Some(guard),
            locks: self.locks.clone(),
            deal_id,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

struct DealLock {
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<DealId, Arc<Mutex<()>>>>,
    deal_id: DealId,
}

impl Drop for DealLock {
    fn drop(&mut self) {
        self.guard.take();
        // Only the map's own reference left: nobody holds or waits for it
        self.locks
            .remove_if(&self.deal_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Held for the whole mutation of one deal
struct DealGuard {
    _lock: DealLock,
    _in_flight: InFlight,
}

pub(crate) struct EngineInner {
    pipeline_id: PipelineId,
    store: Arc<dyn ItemStore>,
    audit: AuditRecorder,
    allocator: PositionAllocator,
    view: RwLock<PipelineView>,
    deal_locks: DealLocks,
    in_flight: Arc<DashMap<DealId, usize>>,
    reconciler: Reconciler,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    max_conflict_retries: u32,
    shutdown: CancellationToken,
}

impl EngineInner {
    fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    fn ensure_running(&self) -> EngineResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(EngineError::InvalidOperation(
                "pipeline engine is shut down".to_string(),
            ));
        }
        Ok(())
    }

    /// Start mutating `deal_id`: drop its pending fetch, mark it in flight,
    /// then wait for earlier mutations of the same deal
    async fn begin(&self, deal_id: DealId) -> EngineResult<DealGuard> {
        self.ensure_running()?;
        self.reconciler.cancel(deal_id);
        let in_flight = InFlight::enter(&self.in_flight, deal_id);
        let lock = self.deal_locks.acquire(deal_id).await;
        Ok(DealGuard {
            _lock: lock,
            _in_flight: in_flight,
        })
    }

    fn is_in_flight(&self, deal_id: DealId) -> bool {
        self.in_flight.contains_key(&deal_id)
    }

    /// Snowflake id not yet used by a deal or stage of this view
    fn fresh_id(&self) -> i64 {
        let view = self.view.read();
        loop {
            let id = shared::util::snowflake_id();
            if view.deal(id).is_none() && !view.has_stage(id) {
                return id;
            }
        }
    }

    fn stage_name(&self, stage_id: StageId) -> String {
        self.view
            .read()
            .stage(stage_id)
            .map(|s| s.name.clone())
            .unwrap_or_default()
    }

    fn stage_view(&self, stage_id: StageId) -> Option<StageView> {
        let view = self.view.read();
        let stage = view.stage(stage_id)?;
        Some(StageAggregator::aggregate(stage, view.deals()))
    }

    /// Push fresh views of the given stages to their subscribers
    ///
    /// Views are computed under the read lock; callbacks run after it is released.
    fn publish(&self, stage_ids: &[StageId]) {
        let mut ids = stage_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        for stage_id in ids {
            let callbacks = self.notifier.callbacks_for(stage_id);
            if callbacks.is_empty() {
                continue;
            }
            let Some(stage_view) = self.stage_view(stage_id) else {
                continue;
            };
            for callback in callbacks {
                callback(&stage_view);
            }
        }
    }

    fn notify_success(&self, message: impl Into<String>, deal_id: Option<DealId>) {
        self.notifier.notify(Notification::success(message, deal_id));
    }

    fn notify_failure(&self, err: &EngineError, deal_id: Option<DealId>) {
        let app_error = AppError::from(err.clone());
        self.notifier.notify(Notification::error(&app_error, deal_id));
    }

    async fn read_deal(&self, deal_id: DealId) -> EngineResult<Deal> {
        self.store.read(deal_id).await.map_err(|e| {
            if e.is_not_found() {
                EngineError::DealNotFound(deal_id)
            } else {
                e.into()
            }
        })
    }

    /// Conditional write with silent retries
    ///
    /// On a stale version the stored row is re-read and `reapply` redoes the
    /// change on it. `reapply` returning `false` means the row already has
    /// the change; it is returned as is with [`Persisted::Unchanged`].
    async fn write_with_retry<F>(
        &self,
        deal: Deal,
        expected_version: u64,
        mut reapply: F,
    ) -> EngineResult<(Deal, Persisted)>
    where
        F: FnMut(&mut Deal) -> bool + Send,
    {
        let deal_id = deal.id;
        let mut candidate = deal;
        let mut expected = expected_version;
        let mut attempt = 0;

        loop {
            match self.store.write(candidate.clone(), Some(expected)).await {
                Ok(stored) => return Ok((stored, Persisted::Written)),
                Err(StoreError::Conflict { actual, .. }) if attempt < self.max_conflict_retries => {
                    attempt += 1;
                    tracing::debug!(
                        deal_id,
                        attempt,
                        expected,
                        actual = ?actual,
                        "Stale version, retrying on the stored row"
                    );
                    let mut fresh = self.read_deal(deal_id).await?;
                    if !reapply(&mut fresh) {
                        tracing::debug!(deal_id, "Stored row already has the change");
                        return Ok((fresh, Persisted::Unchanged));
                    }
                    expected = fresh.version;
                    candidate = fresh;
                }
                Err(StoreError::Conflict { .. }) => {
                    tracing::warn!(deal_id, attempt, "Conflict retries exhausted");
                    return Err(EngineError::Conflict { deal_id });
                }
                Err(e) if e.is_not_found() => return Err(EngineError::DealNotFound(deal_id)),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn schedule_reconcile(self: &Arc<Self>, deal_id: DealId) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let weak = Arc::downgrade(self);
        self.reconciler.schedule(deal_id, async move {
            if let Some(inner) = weak.upgrade() {
                inner.reconcile_deal(deal_id).await;
            }
        });
    }

    /// Re-fetch one deal and take the stored row if it is newer
    async fn reconcile_deal(&self, deal_id: DealId) {
        if self.is_in_flight(deal_id) || self.shutdown.is_cancelled() {
            return;
        }

        let touched = match self.store.read(deal_id).await {
            Ok(stored) => {
                let mut view = self.view.write();
                if self.is_in_flight(deal_id) || stored.pipeline_id != self.pipeline_id {
                    return;
                }
                let old_stage = view.deal(deal_id).map(|d| d.stage_id);
                let new_stage = stored.stage_id;
                if !view.commit_deal(stored) {
                    return;
                }
                tracing::debug!(deal_id, "Reconciled deal from store");
                vec![old_stage.unwrap_or(new_stage), new_stage]
            }
            Err(e) if e.is_not_found() => {
                let mut view = self.view.write();
                if self.is_in_flight(deal_id) {
                    return;
                }
                match view.remove_deal(deal_id) {
                    Some(gone) => {
                        tracing::info!(deal_id, "Deal no longer in store, dropped from view");
                        vec![gone.stage_id]
                    }
                    None => return,
                }
            }
            Err(e) => {
                tracing::warn!(deal_id, error = %e, "Reconciliation fetch failed");
                return;
            }
        };

        self.publish(&touched);
    }
}

/// Builder for [`PipelineEngine`]
pub struct EngineBuilder {
    pipeline_id: PipelineId,
    store: Arc<dyn ItemStore>,
    audit_sink: Option<Arc<dyn AuditSink>>,
    clock: Option<Arc<dyn Clock>>,
    config: Option<EngineConfig>,
    actor: Actor,
}

impl EngineBuilder {
    /// History sink; an in-memory one when not set
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Engine settings; [`EngineConfig::from_env`] when not set
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Actor stamped on history events
    pub fn actor(mut self, actor: Actor) -> Self {
        self.actor = actor;
        self
    }

    /// Load the pipeline's stages and deals and start the audit worker
    pub async fn load(self) -> EngineResult<PipelineEngine> {
        let config = self.config.unwrap_or_else(EngineConfig::from_env);
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let sink: Arc<dyn AuditSink> = match self.audit_sink {
            Some(sink) => sink,
            None => Arc::new(MemoryAuditSink::new()),
        };

        let stages = self.store.list_stages(self.pipeline_id).await?;
        let deals = self.store.list_deals(self.pipeline_id).await?;
        let mut view = PipelineView::new(self.pipeline_id);
        view.load(stages, deals);

        tracing::info!(
            pipeline_id = self.pipeline_id,
            stages = view.stages().len(),
            deals = view.deals().count(),
            "Pipeline loaded"
        );

        let (audit, _worker) = AuditRecorder::spawn(sink, clock.clone(), config.audit_buffer);

        let inner = EngineInner {
            pipeline_id: self.pipeline_id,
            store: self.store,
            audit,
            allocator: PositionAllocator::new(config.position_gap),
            view: RwLock::new(view),
            deal_locks: DealLocks::default(),
            in_flight: Arc::new(DashMap::new()),
            reconciler: Reconciler::new(config.reconcile_delay()),
            notifier: Notifier::new(config.notify_buffer),
            clock,
            max_conflict_retries: config.max_conflict_retries,
            shutdown: CancellationToken::new(),
        };

        Ok(PipelineEngine {
            inner: Arc::new(inner),
            actor: self.actor,
        })
    }
}

/// Handle to one loaded pipeline
///
/// Cheap to clone; clones share the same view, locks and channels, so a
/// mutation can be fired off with `tokio::spawn`. Every failure is also
/// pushed to [`PipelineEngine::notifications`].
#[derive(Clone)]
pub struct PipelineEngine {
    inner: Arc<EngineInner>,
    actor: Actor,
}

impl fmt::Debug for PipelineEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineEngine")
            .field("pipeline_id", &self.inner.pipeline_id)
            .field("actor", &self.actor)
            .field("reconciler", &self.inner.reconciler)
            .finish_non_exhaustive()
    }
}

impl PipelineEngine {
    pub fn builder(pipeline_id: PipelineId, store: Arc<dyn ItemStore>) -> EngineBuilder {
        EngineBuilder {
            pipeline_id,
            store,
            audit_sink: None,
            clock: None,
            config: None,
            actor: Actor::system(),
        }
    }

    /// Open the redb database under `config.data_dir` as both store and
    /// history sink, and load the pipeline
    pub async fn open(config: EngineConfig, pipeline_id: PipelineId) -> EngineResult<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .map_err(|e| StoreError::Database(format!("create {}: {e}", config.data_dir)))?;
        let store = Arc::new(RedbStore::open(config.database_path())?);
        tracing::info!(path = %config.database_path().display(), "Pipeline database opened");

        Self::builder(pipeline_id, store.clone())
            .audit_sink(store)
            .config(config)
            .load()
            .await
    }

    /// Same engine, history attributed to `actor`
    pub fn as_actor(&self, actor: Actor) -> Self {
        Self {
            inner: self.inner.clone(),
            actor,
        }
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn pipeline_id(&self) -> PipelineId {
        self.inner.pipeline_id
    }

    // ========== Views ==========

    pub fn stage_view(&self, stage_id: StageId) -> Option<StageView> {
        self.inner.stage_view(stage_id)
    }

    /// Every stage by ordinal
    pub fn board(&self) -> Vec<StageView> {
        let view = self.inner.view.read();
        StageAggregator::board(view.stages(), view.deals())
    }

    pub fn deal(&self, deal_id: DealId) -> Option<Deal> {
        self.inner.view.read().deal(deal_id).cloned()
    }

    // ========== Channels ==========

    /// Call `callback` with the stage's view every time it changes
    pub fn subscribe<F>(&self, stage_id: StageId, callback: F) -> SubscriptionId
    where
        F: Fn(&StageView) + Send + Sync + 'static,
    {
        self.inner.notifier.subscribe(stage_id, Arc::new(callback))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.notifier.unsubscribe(id)
    }

    /// Success, warning and error toasts
    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.inner.notifier.receiver()
    }

    // ========== History ==========

    pub async fn history(&self, deal_id: DealId) -> Result<Vec<HistoryEvent>, AuditError> {
        self.inner.audit.history(deal_id).await
    }

    pub async fn verify_history(&self, deal_id: DealId) -> Result<ChainVerification, AuditError> {
        self.inner.audit.verify(deal_id).await
    }

    /// Wait until every history event recorded so far reached the sink
    pub async fn flush_audit(&self) {
        self.inner.audit.flush().await;
    }

    // ========== Reconciliation ==========

    pub fn pending_reconciliations(&self) -> usize {
        self.inner.reconciler.pending_count()
    }

    /// Reload every stage and deal from the store
    ///
    /// Deals with a mutation in flight keep their local state.
    pub async fn reconcile_all(&self) -> EngineResult<()> {
        let inner = &self.inner;
        inner.ensure_running()?;
        let stages = inner.store.list_stages(inner.pipeline_id).await?;
        let deals = inner.store.list_deals(inner.pipeline_id).await?;

        let stage_ids = {
            let mut view = inner.view.write();

            let stored_stages: HashSet<StageId> = stages.iter().map(|s| s.id).collect();
            let stale_stages: Vec<StageId> = view
                .stages()
                .iter()
                .map(|s| s.id)
                .filter(|id| !stored_stages.contains(id))
                .collect();
            for stage_id in stale_stages {
                view.remove_stage(stage_id);
            }
            for stage in stages {
                view.upsert_stage(stage);
            }

            let stored_deals: HashSet<DealId> = deals.iter().map(|d| d.id).collect();
            let stale_deals: Vec<DealId> = view
                .deals()
                .map(|d| d.id)
                .filter(|id| !stored_deals.contains(id) && !inner.is_in_flight(*id))
                .collect();
            for deal_id in &stale_deals {
                view.remove_deal(*deal_id);
            }
            let mut refreshed = 0usize;
            for deal in deals {
                if !inner.is_in_flight(deal.id) && view.commit_deal(deal) {
                    refreshed += 1;
                }
            }

            tracing::info!(
                pipeline_id = inner.pipeline_id,
                refreshed,
                removed = stale_deals.len(),
                "Pipeline reconciled"
            );
            view.stages().iter().map(|s| s.id).collect::<Vec<_>>()
        };

        inner.publish(&stage_ids);
        Ok(())
    }

    /// Stop accepting mutations, drop pending fetches, drain the history queue
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.reconciler.cancel_all();
        self.inner.audit.flush().await;
        tracing::info!(pipeline_id = self.inner.pipeline_id, "Pipeline engine stopped");
    }

    /// Report a finished mutation's failure on the notification channel
    fn settle<T>(&self, deal_id: Option<DealId>, result: EngineResult<T>) -> EngineResult<T> {
        if let Err(err) = &result {
            if err.is_precondition() {
                tracing::debug!(deal_id = ?deal_id, error = %err, "Mutation rejected");
            } else {
                tracing::warn!(deal_id = ?deal_id, error = %err, "Mutation failed");
            }
            self.inner.notify_failure(err, deal_id);

            // The store lost the deal under us; let the next fetch drop it
            if let Some(id) = deal_id
                && matches!(err, EngineError::DealNotFound(missing) if *missing == id)
            {
                let still_shown = self.inner.view.read().deal(id).is_some();
                if still_shown {
                    self.inner.schedule_reconcile(id);
                }
            }
        }
        result
    }
}
