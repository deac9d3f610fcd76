use std::collections::BTreeSet;

use serde_json::json;
use shared::models::{DealId, TagId};
use shared::pipeline::HistoryEventKind;
use tracing::Instrument;

use super::{MutationPhase, Persisted, PipelineEngine, enter_phase};
use crate::pipeline::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum TagChange {
    Add,
    Remove,
}

impl TagChange {
    /// Returns whether the set changed
    fn apply(self, tags: &mut BTreeSet<TagId>, tag_id: TagId) -> bool {
        match self {
            Self::Add => tags.insert(tag_id),
            Self::Remove => tags.remove(&tag_id),
        }
    }

    fn kind(self) -> HistoryEventKind {
        match self {
            Self::Add => HistoryEventKind::TagAdded,
            Self::Remove => HistoryEventKind::TagRemoved,
        }
    }

    fn describe(self, tag_id: TagId) -> String {
        match self {
            Self::Add => format!("Added tag {tag_id}"),
            Self::Remove => format!("Removed tag {tag_id}"),
        }
    }
}

impl PipelineEngine {
    pub async fn add_tag(&self, deal_id: DealId, tag_id: TagId) -> EngineResult<()> {
        self.change_tag(deal_id, tag_id, TagChange::Add).await
    }

    pub async fn remove_tag(&self, deal_id: DealId, tag_id: TagId) -> EngineResult<()> {
        self.change_tag(deal_id, tag_id, TagChange::Remove).await
    }

    async fn change_tag(
        &self,
        deal_id: DealId,
        tag_id: TagId,
        change: TagChange,
    ) -> EngineResult<()> {
        let result = self.run_tag_change(deal_id, tag_id, change).await;
        if let Ok(true) = result {
            self.inner.notify_success(change.describe(tag_id), Some(deal_id));
        }
        self.settle(Some(deal_id), result.map(|_| ()))
    }

    /// Link or unlink one tag; `Ok(false)` when the stored deal already
    /// had it that way
    ///
    /// Reads the stored row right before writing so a tag set changed
    /// elsewhere is not overwritten with a stale one.
    pub(super) async fn run_tag_change(
        &self,
        deal_id: DealId,
        tag_id: TagId,
        change: TagChange,
    ) -> EngineResult<bool> {
        let span = tracing::info_span!(
            "tag_change",
            deal_id,
            tag_id,
            change = ?change,
            phase = tracing::field::Empty
        );
        self.apply_tag_change(deal_id, tag_id, change)
            .instrument(span)
            .await
    }

    async fn apply_tag_change(
        &self,
        deal_id: DealId,
        tag_id: TagId,
        change: TagChange,
    ) -> EngineResult<bool> {
        let inner = &self.inner;
        let _guard = inner.begin(deal_id).await?;

        let view_tags = inner
            .view
            .read()
            .deal(deal_id)
            .map(|d| d.tag_ids.clone())
            .ok_or(EngineError::DealNotFound(deal_id))?;

        let fresh = inner.read_deal(deal_id).await?;
        let mut candidate = fresh.clone();
        let now = inner.now();
        if !change.apply(&mut candidate.tag_ids, tag_id) {
            tracing::debug!(deal_id, tag_id, "Tag already in requested state");
            inner.view.write().commit_deal(fresh);
            return Ok(false);
        }
        candidate.updated_at = now;

        enter_phase(MutationPhase::Applying);
        if let Some(deal) = inner.view.write().deal_mut(deal_id) {
            change.apply(&mut deal.tag_ids, tag_id);
        }
        inner.publish(&[fresh.stage_id]);

        enter_phase(MutationPhase::Persisting);
        let persisted = inner
            .write_with_retry(candidate, fresh.version, move |row| {
                let changed = change.apply(&mut row.tag_ids, tag_id);
                if changed {
                    row.updated_at = now;
                }
                changed
            })
            .await;

        let stored = match persisted {
            Ok((stored, Persisted::Written)) => stored,
            Ok((stored, Persisted::Unchanged)) => {
                enter_phase(MutationPhase::Committed);
                inner.view.write().commit_deal(stored.clone());
                inner.publish(&[stored.stage_id]);
                enter_phase(MutationPhase::Idle);
                return Ok(false);
            }
            Err(e) => {
                enter_phase(MutationPhase::RollingBack);
                if let Some(deal) = inner.view.write().deal_mut(deal_id) {
                    deal.tag_ids = view_tags;
                }
                inner.publish(&[fresh.stage_id]);
                return Err(e);
            }
        };

        enter_phase(MutationPhase::Committed);
        inner.view.write().commit_deal(stored.clone());
        inner
            .audit
            .record(
                deal_id,
                change.kind(),
                change.describe(tag_id),
                json!({ "tag_id": tag_id }),
                &self.actor,
            )
            .await;

        tracing::info!(deal_id, tag_id, change = ?change, "Deal tags changed");
        inner.schedule_reconcile(deal_id);
        inner.publish(&[stored.stage_id]);
        enter_phase(MutationPhase::Idle);
        Ok(true)
    }
}
