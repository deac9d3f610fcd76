//! Debounced reconciliation timers
//!
//! After a commit the engine schedules a re-fetch of the deal. A newer
//! mutation of the same deal replaces (aborts) the pending timer, so a burst
//! of edits ends in a single fetch.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use shared::models::DealId;
use tokio::task::JoinHandle;

struct Pending {
    generation: u64,
    handle: JoinHandle<()>,
}

pub struct Reconciler {
    delay: Duration,
    pending: Arc<DashMap<DealId, Pending>>,
    next_generation: AtomicU64,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("delay", &self.delay)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl Reconciler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `task` after the debounce delay, replacing any pending one
    pub fn schedule<F>(&self, deal_id: DealId, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let pending = self.pending.clone();
        let delay = self.delay;

        // Entry guard held across spawn so the task can't finish before it is registered
        let entry = self.pending.entry(deal_id);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
            pending.remove_if(&deal_id, |_, p| p.generation == generation);
        });

        match entry {
            Entry::Occupied(mut slot) => {
                let previous = slot.insert(Pending { generation, handle });
                previous.handle.abort();
                tracing::trace!(deal_id, "Reconciliation rescheduled");
            }
            Entry::Vacant(slot) => {
                slot.insert(Pending { generation, handle });
            }
        }
    }

    /// Drop the pending fetch of a deal, if any
    pub fn cancel(&self, deal_id: DealId) -> bool {
        match self.pending.remove(&deal_id) {
            Some((_, p)) => {
                p.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, deal_id: DealId) -> bool {
        self.pending.contains_key(&deal_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn cancel_all(&self) {
        self.pending.retain(|_, p| {
            p.handle.abort();
            false
        });
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
