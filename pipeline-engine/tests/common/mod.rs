//! Shared fixtures: a three-stage pipeline over a MemoryStore
#![allow(dead_code)]

use std::sync::Arc;

use pipeline_engine::{DEFAULT_GAP, EngineConfig, FixedClock, MemoryAuditSink, MemoryStore, PipelineEngine};
use rust_decimal::Decimal;
use shared::models::{Deal, DealId, Stage, StageId};
use shared::pipeline::{Actor, HistoryEvent, HistoryEventKind, Notification};
use tokio::sync::broadcast;

pub const PIPELINE: i64 = 1;
pub const LEAD: StageId = 10;
pub const QUALIFIED: StageId = 20;
pub const WON: StageId = 30;

/// Fixed start time for history timestamps
pub const T0: i64 = 1_700_000_000_000;

pub fn stage(id: StageId, ordinal: i32, name: &str) -> Stage {
    Stage {
        id,
        pipeline_id: PIPELINE,
        name: name.to_string(),
        ordinal,
        color: "#94a3b8".to_string(),
    }
}

pub fn stages() -> Vec<Stage> {
    vec![
        stage(LEAD, 0, "Lead"),
        stage(QUALIFIED, 1, "Qualified"),
        stage(WON, 2, "Won"),
    ]
}

pub fn deal(id: DealId, stage_id: StageId, position: i64) -> Deal {
    Deal {
        id,
        pipeline_id: PIPELINE,
        stage_id,
        title: format!("Deal {id}"),
        value: Decimal::from(id * 100),
        position,
        company_id: None,
        person_id: None,
        partner_id: None,
        tag_ids: Default::default(),
        created_at: T0,
        updated_at: T0,
        version: 1,
    }
}

pub fn config(reconcile_delay_ms: u64) -> EngineConfig {
    let mut config = EngineConfig::from_env();
    config.position_gap = DEFAULT_GAP;
    config.reconcile_delay_ms = reconcile_delay_ms;
    config.max_conflict_retries = 2;
    config.audit_buffer = 256;
    config.notify_buffer = 256;
    config
}

pub struct Harness {
    pub engine: PipelineEngine,
    pub store: MemoryStore,
    pub sink: MemoryAuditSink,
    pub clock: Arc<FixedClock>,
}

impl Harness {
    pub async fn history(&self, deal_id: DealId) -> Vec<HistoryEvent> {
        self.engine.flush_audit().await;
        self.engine.history(deal_id).await.unwrap()
    }

    pub async fn history_kinds(&self, deal_id: DealId) -> Vec<HistoryEventKind> {
        self.history(deal_id).await.iter().map(|e| e.kind).collect()
    }

    /// Deal ids of a stage in board order
    pub fn order(&self, stage_id: StageId) -> Vec<DealId> {
        self.engine.stage_view(stage_id).unwrap().deal_ids()
    }
}

/// Engine with reconciliation far enough out not to interfere
pub async fn harness(deals: Vec<Deal>) -> Harness {
    harness_with(deals, config(60_000)).await
}

pub async fn harness_with(deals: Vec<Deal>, config: EngineConfig) -> Harness {
    let store = MemoryStore::with_data(stages(), deals);
    let sink = MemoryAuditSink::new();
    let clock = Arc::new(FixedClock::new(T0));
    let engine = PipelineEngine::builder(PIPELINE, Arc::new(store.clone()))
        .audit_sink(Arc::new(sink.clone()))
        .clock(clock.clone())
        .config(config)
        .actor(Actor::new(7, "Ana"))
        .load()
        .await
        .unwrap();
    Harness {
        engine,
        store,
        sink,
        clock,
    }
}

/// Everything currently queued on a notification receiver
pub fn drain(rx: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
    let mut out = Vec::new();
    while let Ok(n) = rx.try_recv() {
        out.push(n);
    }
    out
}
