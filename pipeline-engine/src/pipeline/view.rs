//! Local board state
//!
//! The engine's working copy of one pipeline. Mutations are applied here
//! first (optimistically) and confirmed or undone once the store answers.
//! Always accessed under the engine's `RwLock`, never across an `.await`.

use std::collections::HashMap;

use shared::models::{Deal, DealId, PipelineId, Stage, StageId};

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineView {
    pipeline_id: PipelineId,
    stages: HashMap<StageId, Stage>,
    deals: HashMap<DealId, Deal>,
}

impl PipelineView {
    pub fn new(pipeline_id: PipelineId) -> Self {
        Self {
            pipeline_id,
            stages: HashMap::new(),
            deals: HashMap::new(),
        }
    }

    /// Replace everything with freshly loaded rows of this pipeline
    pub fn load(&mut self, stages: Vec<Stage>, deals: Vec<Deal>) {
        let pipeline_id = self.pipeline_id;
        self.stages = stages
            .into_iter()
            .filter(|s| s.pipeline_id == pipeline_id)
            .map(|s| (s.id, s))
            .collect();
        self.deals = deals
            .into_iter()
            .filter(|d| d.pipeline_id == pipeline_id)
            .map(|d| (d.id, d))
            .collect();
    }

    pub fn pipeline_id(&self) -> PipelineId {
        self.pipeline_id
    }

    // ========== Stages ==========

    pub fn stage(&self, stage_id: StageId) -> Option<&Stage> {
        self.stages.get(&stage_id)
    }

    pub fn has_stage(&self, stage_id: StageId) -> bool {
        self.stages.contains_key(&stage_id)
    }

    /// Ordered by ordinal, then id
    pub fn stages(&self) -> Vec<&Stage> {
        let mut stages: Vec<&Stage> = self.stages.values().collect();
        stages.sort_by_key(|s| (s.ordinal, s.id));
        stages
    }

    pub fn upsert_stage(&mut self, stage: Stage) {
        self.stages.insert(stage.id, stage);
    }

    pub fn remove_stage(&mut self, stage_id: StageId) -> Option<Stage> {
        self.stages.remove(&stage_id)
    }

    pub fn next_ordinal(&self) -> i32 {
        self.stages
            .values()
            .map(|s| s.ordinal)
            .max()
            .map_or(0, |max| max.saturating_add(1))
    }

    // ========== Deals ==========

    pub fn deal(&self, deal_id: DealId) -> Option<&Deal> {
        self.deals.get(&deal_id)
    }

    pub fn deal_mut(&mut self, deal_id: DealId) -> Option<&mut Deal> {
        self.deals.get_mut(&deal_id)
    }

    pub fn deals(&self) -> impl Iterator<Item = &Deal> {
        self.deals.values()
    }

    /// Deals of a stage, ascending position, ties by id
    pub fn stage_deals(&self, stage_id: StageId) -> Vec<&Deal> {
        let mut deals: Vec<&Deal> = self
            .deals
            .values()
            .filter(|d| d.stage_id == stage_id)
            .collect();
        deals.sort_by_key(|d| (d.position, d.id));
        deals
    }

    /// Same as [`Self::stage_deals`] without `exclude`
    pub fn stage_deals_excluding(&self, stage_id: StageId, exclude: DealId) -> Vec<&Deal> {
        let mut deals = self.stage_deals(stage_id);
        deals.retain(|d| d.id != exclude);
        deals
    }

    pub fn stage_is_empty(&self, stage_id: StageId) -> bool {
        !self.deals.values().any(|d| d.stage_id == stage_id)
    }

    /// Insert or replace unconditionally
    pub fn insert_deal(&mut self, deal: Deal) -> Option<Deal> {
        self.deals.insert(deal.id, deal)
    }

    pub fn remove_deal(&mut self, deal_id: DealId) -> Option<Deal> {
        self.deals.remove(&deal_id)
    }

    /// Take a stored row unless the view already has a newer version
    ///
    /// Returns whether the view changed.
    pub fn commit_deal(&mut self, stored: Deal) -> bool {
        match self.deals.get(&stored.id) {
            Some(current) if current.version > stored.version => false,
            Some(current) if *current == stored => false,
            _ => {
                self.deals.insert(stored.id, stored);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn stage(id: StageId, ordinal: i32) -> Stage {
        Stage {
            id,
            pipeline_id: 1,
            name: format!("S{id}"),
            ordinal,
            color: "#000".into(),
        }
    }

    fn deal(id: DealId, stage_id: StageId, position: i64, version: u64) -> Deal {
        Deal {
            id,
            pipeline_id: 1,
            stage_id,
            title: format!("D{id}"),
            value: Decimal::ZERO,
            position,
            company_id: None,
            person_id: None,
            partner_id: None,
            tag_ids: Default::default(),
            created_at: 0,
            updated_at: 0,
            version,
        }
    }

    #[test]
    fn load_filters_other_pipelines() {
        let mut view = PipelineView::new(1);
        let mut foreign = deal(9, 10, 0, 1);
        foreign.pipeline_id = 2;
        view.load(vec![stage(10, 0)], vec![deal(1, 10, 0, 1), foreign]);
        assert!(view.deal(9).is_none());
        assert!(view.deal(1).is_some());
    }

    #[test]
    fn stage_deals_sorted_by_position_then_id() {
        let mut view = PipelineView::new(1);
        view.load(
            vec![stage(10, 0)],
            vec![deal(3, 10, 5, 1), deal(1, 10, 5, 1), deal(2, 10, 1, 1)],
        );
        let ids: Vec<_> = view.stage_deals(10).iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![2, 1, 3]);
        let ids: Vec<_> = view
            .stage_deals_excluding(10, 1)
            .iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn commit_never_regresses_version() {
        let mut view = PipelineView::new(1);
        view.insert_deal(deal(1, 10, 0, 5));
        assert!(!view.commit_deal(deal(1, 10, 99, 4)));
        assert_eq!(view.deal(1).map(|d| d.position), Some(0));
        assert!(view.commit_deal(deal(1, 10, 99, 6)));
        assert_eq!(view.deal(1).map(|d| d.position), Some(99));
    }

    #[test]
    fn stages_ordered_and_next_ordinal() {
        let mut view = PipelineView::new(1);
        assert_eq!(view.next_ordinal(), 0);
        view.load(vec![stage(20, 1), stage(10, 0)], vec![]);
        let ids: Vec<_> = view.stages().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![10, 20]);
        assert_eq!(view.next_ordinal(), 2);
    }
}
