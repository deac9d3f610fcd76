use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use shared::error::{AppError, ErrorCode};
use shared::models::DealId;
use shared::pipeline::{GENESIS_HASH, HistoryEvent};
use thiserror::Error;

use crate::store::StoreError;

/// Audit errors (logged, never surfaced to the mutation that caused them)
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Audit sink unavailable: {0}")]
    Unavailable(String),

    #[error("Audit channel closed")]
    ChannelClosed,
}

impl From<AuditError> for AppError {
    fn from(err: AuditError) -> Self {
        AppError::with_message(ErrorCode::HistoryAppendFailed, err.to_string())
    }
}

/// Append-only destination for history events
///
/// The sink owns the per-deal hash chain: `append` links the event after the
/// deal's last one, bumping its timestamp if it would not be strictly later.
#[async_trait]
pub trait AuditSink: Send + Sync + 'static {
    /// Store the event and return it sealed
    async fn append(&self, event: HistoryEvent) -> Result<HistoryEvent, AuditError>;

    /// All events of one deal in timestamp order
    async fn list_for_deal(&self, deal_id: DealId) -> Result<Vec<HistoryEvent>, AuditError>;
}

/// In-process sink
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    events: Arc<Mutex<HashMap<DealId, Vec<HistoryEvent>>>>,
    failures: Arc<AtomicUsize>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` appends
    pub fn fail_next_appends(&self, count: usize) {
        self.failures.fetch_add(count, Ordering::SeqCst);
    }

    /// Every stored event across deals
    pub fn len(&self) -> usize {
        self.events.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Direct access for tamper tests
    pub fn replace_events(&self, deal_id: DealId, events: Vec<HistoryEvent>) {
        self.events.lock().insert(deal_id, events);
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, mut event: HistoryEvent) -> Result<HistoryEvent, AuditError> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(AuditError::Unavailable("injected failure".into()));
        }

        let mut events = self.events.lock();
        let chain = events.entry(event.deal_id).or_default();
        let prev_hash = match chain.last() {
            Some(last) => {
                if event.timestamp <= last.timestamp {
                    event.timestamp = last.timestamp + 1;
                }
                last.curr_hash.clone()
            }
            None => GENESIS_HASH.to_string(),
        };
        let sealed = event.seal(prev_hash);
        chain.push(sealed.clone());
        Ok(sealed)
    }

    async fn list_for_deal(&self, deal_id: DealId) -> Result<Vec<HistoryEvent>, AuditError> {
        Ok(self.events.lock().get(&deal_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared::pipeline::{Actor, HistoryEventKind, verify_chain};

    fn event(deal_id: DealId, ts: i64) -> HistoryEvent {
        HistoryEvent::new(
            deal_id,
            HistoryEventKind::Updated,
            "edit",
            json!({}),
            ts,
            Actor::system(),
        )
    }

    #[tokio::test]
    async fn chains_per_deal_and_keeps_timestamps_increasing() {
        let sink = MemoryAuditSink::new();
        sink.append(event(1, 100)).await.unwrap();
        let second = sink.append(event(1, 100)).await.unwrap();
        sink.append(event(2, 5)).await.unwrap();

        assert_eq!(second.timestamp, 101);
        let events = sink.list_for_deal(1).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(verify_chain(&events).chain_intact);
        assert_eq!(
            sink.list_for_deal(2).await.unwrap()[0].prev_hash,
            GENESIS_HASH
        );
    }

    #[tokio::test]
    async fn injected_failures_do_not_store() {
        let sink = MemoryAuditSink::new();
        sink.fail_next_appends(1);
        assert!(sink.append(event(1, 1)).await.is_err());
        assert!(sink.is_empty());
        assert!(sink.append(event(1, 2)).await.is_ok());
        assert_eq!(sink.len(), 1);
    }
}
