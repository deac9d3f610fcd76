use std::sync::Arc;

use dashmap::DashMap;
use shared::models::DealId;
use shared::pipeline::{Actor, ChainVerification, HistoryEvent, HistoryEventKind, verify_chain};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::sink::{AuditError, AuditSink};
use super::worker::AuditWorker;
use crate::clock::Clock;

/// Past this many tracked deals, entries the clock has passed are dropped
const LAST_TS_PRUNE_AT: usize = 1024;

/// Message to the audit worker
#[derive(Debug)]
pub enum AuditCommand {
    Append(HistoryEvent),
    /// Answered once everything queued before it has been attempted
    Flush(oneshot::Sender<()>),
}

/// Front end of the history trail
///
/// `record` stamps the event and hands it to the worker over a bounded
/// channel; failures past that point are logged by the worker and never reach
/// the caller. Reads go straight to the sink.
#[derive(Clone)]
pub struct AuditRecorder {
    tx: mpsc::Sender<AuditCommand>,
    sink: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    /// Last timestamp handed out per deal
    last_ts: Arc<DashMap<DealId, i64>>,
}

impl std::fmt::Debug for AuditRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditRecorder")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl AuditRecorder {
    /// Create the recorder and the receiving end for an [`AuditWorker`]
    pub fn new(
        sink: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        buffer: usize,
    ) -> (Self, mpsc::Receiver<AuditCommand>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let recorder = Self {
            tx,
            sink,
            clock,
            last_ts: Arc::new(DashMap::new()),
        };
        (recorder, rx)
    }

    /// Create the recorder and spawn its worker on the current runtime
    pub fn spawn(
        sink: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        buffer: usize,
    ) -> (Self, JoinHandle<()>) {
        let (recorder, rx) = Self::new(sink.clone(), clock, buffer);
        let handle = tokio::spawn(AuditWorker::new(sink).run(rx));
        (recorder, handle)
    }

    /// Strictly increasing per deal, even if the clock stalls or goes back
    ///
    /// A deleted deal's entry is dropped. The sinks also bump a timestamp
    /// that would not follow the deal's last event.
    fn next_timestamp(&self, deal_id: DealId, kind: HistoryEventKind) -> i64 {
        let now = self.clock.now_millis();
        let ts = {
            let mut last = self.last_ts.entry(deal_id).or_insert(i64::MIN);
            let ts = if now > *last { now } else { *last + 1 };
            *last = ts;
            ts
        };

        if kind == HistoryEventKind::Deleted {
            self.last_ts.remove(&deal_id);
        } else if self.last_ts.len() > LAST_TS_PRUNE_AT {
            self.last_ts.retain(|_, last| *last >= now);
        }
        ts
    }

    /// Queue one history event
    pub async fn record(
        &self,
        deal_id: DealId,
        kind: HistoryEventKind,
        description: impl Into<String>,
        details: serde_json::Value,
        actor: &Actor,
    ) {
        let timestamp = self.next_timestamp(deal_id, kind);
        let event = HistoryEvent::new(
            deal_id,
            kind,
            description,
            details,
            timestamp,
            actor.clone(),
        );

        tracing::info!(
            target: "audit",
            deal_id,
            kind = %kind,
            actor_id = ?actor.id,
            description = %event.description,
            "deal history"
        );

        // Blocking send: history entries are not dropped under load
        if self.tx.send(AuditCommand::Append(event)).await.is_err() {
            tracing::error!(deal_id, kind = %kind, "Audit channel closed, history event lost");
        }
    }

    /// Wait until every event queued so far has been attempted
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(AuditCommand::Flush(done_tx)).await.is_err() {
            return;
        }
        let _ = done_rx.await;
    }

    /// A deal's history in timestamp order
    pub async fn history(&self, deal_id: DealId) -> Result<Vec<HistoryEvent>, AuditError> {
        self.sink.list_for_deal(deal_id).await
    }

    /// Check a deal's hash chain
    pub async fn verify(&self, deal_id: DealId) -> Result<ChainVerification, AuditError> {
        let events = self.history(deal_id).await?;
        Ok(verify_chain(&events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::clock::FixedClock;
    use serde_json::json;

    fn setup() -> (AuditRecorder, MemoryAuditSink, Arc<FixedClock>) {
        let sink = MemoryAuditSink::new();
        let clock = Arc::new(FixedClock::new(1_000));
        let (recorder, _handle) = AuditRecorder::spawn(Arc::new(sink.clone()), clock.clone(), 16);
        (recorder, sink, clock)
    }

    #[tokio::test]
    async fn records_in_order_with_strictly_increasing_timestamps() {
        let (recorder, _sink, clock) = setup();
        let actor = Actor::new(7, "Ana");

        recorder
            .record(1, HistoryEventKind::Created, "Created", json!({}), &actor)
            .await;
        recorder
            .record(1, HistoryEventKind::Updated, "Updated", json!({}), &actor)
            .await;
        clock.set(500);
        recorder
            .record(1, HistoryEventKind::Moved, "Moved", json!({}), &actor)
            .await;
        recorder.flush().await;

        let history = recorder.history(1).await.unwrap();
        let kinds: Vec<_> = history.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                HistoryEventKind::Created,
                HistoryEventKind::Updated,
                HistoryEventKind::Moved
            ]
        );
        assert_eq!(
            history.iter().map(|e| e.timestamp).collect::<Vec<_>>(),
            vec![1_000, 1_001, 1_002]
        );
        assert_eq!(history[0].actor, actor);
        assert!(recorder.verify(1).await.unwrap().chain_intact);
    }

    #[tokio::test]
    async fn timestamp_tracking_stays_bounded() {
        let (recorder, _sink, clock) = setup();
        let actor = Actor::system();

        recorder
            .record(1, HistoryEventKind::Created, "Created", json!({}), &actor)
            .await;
        recorder
            .record(1, HistoryEventKind::Deleted, "Deleted", json!({}), &actor)
            .await;
        assert!(recorder.last_ts.is_empty());

        for deal_id in 0..LAST_TS_PRUNE_AT as i64 {
            recorder
                .record(deal_id, HistoryEventKind::Updated, "Updated", json!({}), &actor)
                .await;
        }
        assert_eq!(recorder.last_ts.len(), LAST_TS_PRUNE_AT);

        // Everything stamped before the clock moved on is dropped
        clock.advance(10);
        recorder
            .record(9_999, HistoryEventKind::Updated, "Updated", json!({}), &actor)
            .await;
        assert_eq!(recorder.last_ts.len(), 1);
        assert_eq!(recorder.last_ts.get(&9_999).map(|t| *t), Some(1_010));
        recorder.flush().await;
    }

    #[tokio::test]
    async fn sink_failure_is_swallowed() {
        let (recorder, sink, _clock) = setup();
        sink.fail_next_appends(1);

        recorder
            .record(3, HistoryEventKind::Deleted, "Deleted", json!({}), &Actor::system())
            .await;
        recorder
            .record(3, HistoryEventKind::Created, "Created", json!({}), &Actor::system())
            .await;
        recorder.flush().await;

        let history = recorder.history(3).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, HistoryEventKind::Created);
    }

    #[tokio::test]
    async fn tampering_shows_up_in_verify() {
        let (recorder, sink, _clock) = setup();
        for i in 0..3 {
            recorder
                .record(
                    9,
                    HistoryEventKind::FieldChanged,
                    format!("change {i}"),
                    json!({ "i": i }),
                    &Actor::system(),
                )
                .await;
        }
        recorder.flush().await;

        let mut events = recorder.history(9).await.unwrap();
        events[2].details = json!({ "i": 99 });
        sink.replace_events(9, events);

        let report = recorder.verify(9).await.unwrap();
        assert!(!report.chain_intact);
        assert_eq!(report.breaks.len(), 1);
    }
}
