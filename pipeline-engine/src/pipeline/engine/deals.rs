use std::collections::BTreeSet;

use shared::models::{Deal, DealCreate, DealId, DealUpdate, StageId, TagId};
use shared::pipeline::{HistoryEventKind, Notification};
use shared::util::is_blank;
use tracing::Instrument;

use super::layout;
use super::tags::TagChange;
use super::{MutationPhase, Persisted, PipelineEngine, enter_phase};
use crate::audit::diff::{self, changes_payload, diff_fields};
use crate::pipeline::error::{EngineError, EngineResult};

/// Result of [`PipelineEngine::create_deal`]
///
/// The deal exists once this is returned; `failed_tags` lists initial tags
/// that could not be linked.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateOutcome {
    pub deal_id: DealId,
    pub deal: Deal,
    pub failed_tags: Vec<TagId>,
}

impl CreateOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed_tags.is_empty()
    }
}

impl PipelineEngine {
    // ========== Create ==========

    /// Create a deal at the end of `stage_id`, then link its initial tags
    pub async fn create_deal(
        &self,
        stage_id: StageId,
        payload: DealCreate,
    ) -> EngineResult<CreateOutcome> {
        let deal_id = self.inner.fresh_id();
        let span = tracing::info_span!(
            "create_deal",
            deal_id,
            stage_id,
            phase = tracing::field::Empty
        );
        let tag_ids = payload.tag_ids.clone();
        let created = self
            .run_create(deal_id, stage_id, payload)
            .instrument(span)
            .await;
        let created = self.settle(None, created)?;

        // Parent stays even if a tag link fails
        let mut failed_tags = Vec::new();
        for tag_id in tag_ids {
            if let Err(e) = self.run_tag_change(deal_id, tag_id, TagChange::Add).await {
                tracing::warn!(deal_id, tag_id, error = %e, "Failed to link initial tag");
                failed_tags.push(tag_id);
            }
        }

        let inner = &self.inner;
        if failed_tags.is_empty() {
            inner.notify_success("Deal created", Some(deal_id));
        } else {
            inner.notifier.notify(Notification::warning(
                format!(
                    "Deal created, but {} of its tags could not be linked",
                    failed_tags.len()
                ),
                Some(deal_id),
            ));
        }
        inner.schedule_reconcile(deal_id);

        let deal = self.deal(deal_id).unwrap_or(created);
        Ok(CreateOutcome {
            deal_id,
            deal,
            failed_tags,
        })
    }

    async fn run_create(
        &self,
        deal_id: DealId,
        stage_id: StageId,
        payload: DealCreate,
    ) -> EngineResult<Deal> {
        if is_blank(&payload.title) {
            return Err(EngineError::TitleRequired);
        }

        let inner = &self.inner;
        let _guard = inner.begin(deal_id).await?;

        let now = inner.now();
        let (deal, stage_name, renumbering) = {
            let mut view = inner.view.write();
            let stage_name = view
                .stage(stage_id)
                .map(|s| s.name.clone())
                .ok_or(EngineError::StageNotFound(stage_id))?;

            enter_phase(MutationPhase::Applying);
            let others: Vec<Deal> = view.stage_deals(stage_id).into_iter().cloned().collect();
            let positions: Vec<i64> = others.iter().map(|d| d.position).collect();
            let placement = inner
                .allocator
                .place(&positions, positions.len())
                .map_err(|_| EngineError::PositionExhausted(stage_id))?;
            let renumbering = layout::renumbered(&others, placement.rebalanced.as_deref());
            layout::apply(&mut view, &renumbering);

            let deal = Deal {
                id: deal_id,
                pipeline_id: view.pipeline_id(),
                stage_id,
                title: payload.title.trim().to_string(),
                value: payload.value,
                position: placement.position,
                company_id: payload.company_id,
                person_id: payload.person_id,
                partner_id: payload.partner_id,
                tag_ids: BTreeSet::new(),
                created_at: now,
                updated_at: now,
                version: 0,
            };
            view.insert_deal(deal.clone());
            (deal, stage_name, renumbering)
        };
        inner.publish(&[stage_id]);

        enter_phase(MutationPhase::Persisting);
        let written = match inner.persist_renumbering(stage_id, &renumbering).await {
            Ok(written) => written,
            Err(e) => {
                enter_phase(MutationPhase::RollingBack);
                inner
                    .undo_placement(deal_id, None, &renumbering, Vec::new())
                    .await;
                inner.publish(&[stage_id]);
                return Err(e);
            }
        };

        let stored = match inner.store.write(deal, None).await {
            Ok(stored) => inner.sync_position(stored).await,
            Err(e) => {
                enter_phase(MutationPhase::RollingBack);
                inner
                    .undo_placement(deal_id, None, &renumbering, written)
                    .await;
                inner.publish(&[stage_id]);
                return Err(e.into());
            }
        };

        enter_phase(MutationPhase::Committed);
        {
            let mut view = inner.view.write();
            view.commit_deal(stored.clone());
            layout::commit_written(&mut view, written);
        }

        inner
            .audit
            .record(
                deal_id,
                HistoryEventKind::Created,
                format!("Created in '{stage_name}'"),
                diff::snapshot(&stored),
                &self.actor,
            )
            .await;

        tracing::info!(deal_id, stage_id, position = stored.position, "Deal created");
        inner.publish(&[stage_id]);
        enter_phase(MutationPhase::Idle);
        Ok(stored)
    }

    // ========== Update ==========

    /// Change title, value or linked records; an update that changes
    /// nothing is a no-op without history
    pub async fn update_deal(&self, deal_id: DealId, update: DealUpdate) -> EngineResult<()> {
        let span = tracing::info_span!("update_deal", deal_id, phase = tracing::field::Empty);
        let result = self.run_update(deal_id, update).instrument(span).await;
        self.settle(Some(deal_id), result)
    }

    async fn run_update(&self, deal_id: DealId, update: DealUpdate) -> EngineResult<()> {
        if update.title.as_deref().is_some_and(is_blank) {
            return Err(EngineError::TitleRequired);
        }

        let inner = &self.inner;
        let _guard = inner.begin(deal_id).await?;

        let now = inner.now();
        let (snapshot, candidate) = {
            let mut view = inner.view.write();
            let snapshot = view
                .deal(deal_id)
                .cloned()
                .ok_or(EngineError::DealNotFound(deal_id))?;

            let mut candidate = snapshot.clone();
            if !candidate.apply(&update) {
                tracing::debug!(deal_id, "Update changes nothing");
                return Ok(());
            }
            enter_phase(MutationPhase::Applying);
            candidate.updated_at = now;
            view.insert_deal(candidate.clone());
            (snapshot, candidate)
        };
        inner.publish(&[snapshot.stage_id]);

        enter_phase(MutationPhase::Persisting);
        // Row the change finally landed on; the stored one after a retry
        let mut base = snapshot.clone();
        let base_slot = &mut base;
        let reapplied = update.clone();
        let persisted = inner
            .write_with_retry(candidate, snapshot.version, move |fresh| {
                *base_slot = fresh.clone();
                let changed = fresh.apply(&reapplied);
                if changed {
                    fresh.updated_at = now;
                }
                changed
            })
            .await;

        let stored = match persisted {
            Ok((stored, Persisted::Written)) => stored,
            Ok((stored, Persisted::Unchanged)) => {
                tracing::debug!(deal_id, "Stored deal already had the update");
                enter_phase(MutationPhase::Committed);
                inner.view.write().commit_deal(stored.clone());
                inner.schedule_reconcile(deal_id);
                inner.publish(&[stored.stage_id]);
                enter_phase(MutationPhase::Idle);
                return Ok(());
            }
            Err(e) => {
                enter_phase(MutationPhase::RollingBack);
                if let Some(deal) = inner.view.write().deal_mut(deal_id) {
                    deal.title = snapshot.title.clone();
                    deal.value = snapshot.value;
                    deal.company_id = snapshot.company_id;
                    deal.person_id = snapshot.person_id;
                    deal.partner_id = snapshot.partner_id;
                    deal.updated_at = snapshot.updated_at;
                }
                inner.publish(&[snapshot.stage_id]);
                return Err(e);
            }
        };

        enter_phase(MutationPhase::Committed);
        inner.view.write().commit_deal(stored.clone());

        let changes = diff_fields(&base, &stored);
        let fields: Vec<&str> = changes.iter().map(|c| c.field.as_str()).collect();
        inner
            .audit
            .record(
                deal_id,
                HistoryEventKind::Updated,
                format!("Updated {}", fields.join(", ")),
                changes_payload(&changes),
                &self.actor,
            )
            .await;
        for change in &changes {
            inner
                .audit
                .record(
                    deal_id,
                    HistoryEventKind::FieldChanged,
                    format!("Changed {}", change.field),
                    change.to_value(),
                    &self.actor,
                )
                .await;
        }

        tracing::info!(deal_id, fields = ?fields, "Deal updated");
        inner.notify_success("Deal updated", Some(deal_id));
        inner.schedule_reconcile(deal_id);
        inner.publish(&[stored.stage_id]);
        enter_phase(MutationPhase::Idle);
        Ok(())
    }

    // ========== Remove ==========

    /// Delete a deal; a deal the store no longer has counts as deleted
    pub async fn remove_deal(&self, deal_id: DealId) -> EngineResult<()> {
        let span = tracing::info_span!("remove_deal", deal_id, phase = tracing::field::Empty);
        let result = self.run_remove(deal_id).instrument(span).await;
        self.settle(Some(deal_id), result)
    }

    async fn run_remove(&self, deal_id: DealId) -> EngineResult<()> {
        let inner = &self.inner;
        let guard = inner.begin(deal_id).await?;

        let snapshot = {
            let mut view = inner.view.write();
            let snapshot = view
                .remove_deal(deal_id)
                .ok_or(EngineError::DealNotFound(deal_id))?;
            enter_phase(MutationPhase::Applying);
            snapshot
        };
        let stage_id = snapshot.stage_id;
        let stage_name = inner.stage_name(stage_id);
        inner.publish(&[stage_id]);

        enter_phase(MutationPhase::Persisting);
        match inner.store.delete(deal_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::warn!(deal_id, "Deal already gone from store, treating as deleted");
            }
            Err(e) => {
                enter_phase(MutationPhase::RollingBack);
                inner.view.write().insert_deal(snapshot);
                inner.publish(&[stage_id]);
                return Err(e.into());
            }
        }

        enter_phase(MutationPhase::Committed);
        inner
            .audit
            .record(
                deal_id,
                HistoryEventKind::Deleted,
                format!("Deleted from '{stage_name}'"),
                diff::snapshot(&snapshot),
                &self.actor,
            )
            .await;

        tracing::info!(deal_id, stage_id, "Deal deleted");
        inner.reconciler.cancel(deal_id);
        drop(guard);

        inner.notify_success("Deal deleted", Some(deal_id));
        inner.publish(&[stage_id]);
        enter_phase(MutationPhase::Idle);
        Ok(())
    }
}
