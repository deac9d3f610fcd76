//! Outbound channels
//!
//! - toast notifications over a tokio broadcast channel
//! - per-stage subscriptions receiving a fresh [`StageView`] on every change

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use shared::models::StageId;
use shared::pipeline::{Notification, StageView};
use tokio::sync::broadcast;

/// Stage subscription callback
pub type StageCallback = Arc<dyn Fn(&StageView) + Send + Sync>;

/// Handle returned by `subscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

pub struct Notifier {
    tx: broadcast::Sender<Notification>,
    subscriptions: RwLock<HashMap<SubscriptionId, (StageId, StageCallback)>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("subscriptions", &self.subscriptions.read().len())
            .finish_non_exhaustive()
    }
}

impl Notifier {
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self {
            tx,
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// No receivers is fine
    pub fn notify(&self, notification: Notification) {
        let _ = self.tx.send(notification);
    }

    pub fn receiver(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn subscribe(&self, stage_id: StageId, callback: StageCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.write().insert(id, (stage_id, callback));
        id
    }

    /// Returns whether the subscription existed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.write().remove(&id).is_some()
    }

    pub fn has_subscribers(&self, stage_id: StageId) -> bool {
        self.subscriptions
            .read()
            .values()
            .any(|(sid, _)| *sid == stage_id)
    }

    /// Callbacks to invoke for `stage_id`, cloned out of the lock
    pub fn callbacks_for(&self, stage_id: StageId) -> Vec<StageCallback> {
        self.subscriptions
            .read()
            .values()
            .filter(|(sid, _)| *sid == stage_id)
            .map(|(_, cb)| cb.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn subscribe_and_unsubscribe() {
        let notifier = Notifier::new(8);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let id = notifier.subscribe(
            10,
            Arc::new(move |_view: &StageView| {
                h.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert!(notifier.has_subscribers(10));
        assert_eq!(notifier.callbacks_for(10).len(), 1);
        assert!(notifier.callbacks_for(20).is_empty());

        assert!(notifier.unsubscribe(id));
        assert!(!notifier.unsubscribe(id));
        assert!(!notifier.has_subscribers(10));
    }

    #[tokio::test]
    async fn broadcast_reaches_receivers() {
        let notifier = Notifier::new(8);
        let mut rx = notifier.receiver();
        notifier.notify(Notification::success("Deal moved", Some(1)));
        assert_eq!(rx.recv().await.unwrap().deal_id(), Some(1));
    }
}
