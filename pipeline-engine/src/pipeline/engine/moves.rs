use serde_json::json;
use shared::models::{Deal, DealId, StageId};
use shared::pipeline::{HistoryEventKind, MoveIntent};
use tracing::Instrument;

use super::layout::{self, Renumber};
use super::{MutationPhase, PipelineEngine, enter_phase};
use crate::pipeline::error::{EngineError, EngineResult};

/// Everything decided while applying a move
struct MovePlan {
    snapshot: Deal,
    from_stage: String,
    to_stage: String,
    to_stage_id: StageId,
    position: i64,
    index: usize,
    renumbering: Vec<Renumber>,
}

impl MovePlan {
    fn description(&self) -> String {
        if self.snapshot.stage_id == self.to_stage_id {
            format!("Reordered within '{}'", self.to_stage)
        } else {
            format!("Moved from '{}' to '{}'", self.from_stage, self.to_stage)
        }
    }
}

impl PipelineEngine {
    /// Move a deal into slot `to_index` of `to_stage_id`
    ///
    /// `to_index` counts the destination's deals without the moving one and
    /// is clamped to the end of the stage.
    pub async fn move_deal(
        &self,
        deal_id: DealId,
        to_stage_id: StageId,
        to_index: usize,
    ) -> EngineResult<()> {
        self.apply_move(MoveIntent::new(deal_id, to_stage_id, to_index))
            .await
    }

    pub async fn apply_move(&self, intent: MoveIntent) -> EngineResult<()> {
        let span = tracing::info_span!(
            "move_deal",
            deal_id = intent.deal_id,
            to_stage_id = intent.to_stage_id,
            to_index = intent.to_index,
            phase = tracing::field::Empty
        );
        let result = self.run_move(&intent).instrument(span).await;
        self.settle(Some(intent.deal_id), result)
    }

    async fn run_move(&self, intent: &MoveIntent) -> EngineResult<()> {
        let inner = &self.inner;
        let deal_id = intent.deal_id;
        let _guard = inner.begin(deal_id).await?;

        let now = inner.now();
        let plan = {
            let mut view = inner.view.write();
            let snapshot = view
                .deal(deal_id)
                .cloned()
                .ok_or(EngineError::DealNotFound(deal_id))?;
            let to_stage = view
                .stage(intent.to_stage_id)
                .map(|s| s.name.clone())
                .ok_or(EngineError::StageNotFound(intent.to_stage_id))?;
            let from_stage = view
                .stage(snapshot.stage_id)
                .map(|s| s.name.clone())
                .unwrap_or_default();

            let others: Vec<Deal> = view
                .stage_deals_excluding(intent.to_stage_id, deal_id)
                .into_iter()
                .cloned()
                .collect();
            let index = intent.to_index.min(others.len());

            if snapshot.stage_id == intent.to_stage_id {
                let current = view
                    .stage_deals(snapshot.stage_id)
                    .iter()
                    .position(|d| d.id == deal_id);
                if current == Some(index) {
                    tracing::debug!(deal_id, index, "Deal already in place");
                    return Ok(());
                }
            }

            enter_phase(MutationPhase::Applying);
            let positions: Vec<i64> = others.iter().map(|d| d.position).collect();
            let placement = inner
                .allocator
                .place(&positions, index)
                .map_err(|_| EngineError::PositionExhausted(intent.to_stage_id))?;
            let renumbering = layout::renumbered(&others, placement.rebalanced.as_deref());

            layout::apply(&mut view, &renumbering);
            if let Some(deal) = view.deal_mut(deal_id) {
                deal.stage_id = intent.to_stage_id;
                deal.position = placement.position;
                deal.updated_at = now;
            }

            MovePlan {
                snapshot,
                from_stage,
                to_stage,
                to_stage_id: intent.to_stage_id,
                position: placement.position,
                index: placement.index,
                renumbering,
            }
        };
        let touched = [plan.snapshot.stage_id, plan.to_stage_id];
        inner.publish(&touched);

        enter_phase(MutationPhase::Persisting);
        let written = match inner
            .persist_renumbering(plan.to_stage_id, &plan.renumbering)
            .await
        {
            Ok(written) => written,
            Err(e) => {
                enter_phase(MutationPhase::RollingBack);
                inner
                    .undo_placement(deal_id, Some(&plan.snapshot), &plan.renumbering, Vec::new())
                    .await;
                inner.publish(&touched);
                return Err(e);
            }
        };

        let mut candidate = plan.snapshot.clone();
        candidate.stage_id = plan.to_stage_id;
        candidate.position = plan.position;
        candidate.updated_at = now;
        let (to_stage_id, position) = (plan.to_stage_id, plan.position);
        let persisted = inner
            .write_with_retry(candidate, plan.snapshot.version, move |fresh| {
                fresh.stage_id = to_stage_id;
                fresh.position = position;
                fresh.updated_at = now;
                true
            })
            .await;

        let stored = match persisted {
            Ok((stored, _)) => inner.sync_position(stored).await,
            Err(e) => {
                enter_phase(MutationPhase::RollingBack);
                inner
                    .undo_placement(deal_id, Some(&plan.snapshot), &plan.renumbering, written)
                    .await;
                inner.publish(&touched);
                return Err(e);
            }
        };

        enter_phase(MutationPhase::Committed);
        {
            let mut view = inner.view.write();
            view.commit_deal(stored.clone());
            layout::commit_written(&mut view, written);
        }

        let description = plan.description();
        inner
            .audit
            .record(
                deal_id,
                HistoryEventKind::Moved,
                description.clone(),
                json!({
                    "from_stage_id": plan.snapshot.stage_id,
                    "to_stage_id": plan.to_stage_id,
                    "from_position": plan.snapshot.position,
                    "to_position": stored.position,
                    "to_index": plan.index,
                }),
                &self.actor,
            )
            .await;

        tracing::info!(
            deal_id,
            from_stage_id = plan.snapshot.stage_id,
            to_stage_id = plan.to_stage_id,
            position = stored.position,
            renumbered = plan.renumbering.len(),
            "Deal moved"
        );
        inner.notify_success(description, Some(deal_id));
        inner.schedule_reconcile(deal_id);
        inner.publish(&touched);
        enter_phase(MutationPhase::Idle);
        Ok(())
    }
}
