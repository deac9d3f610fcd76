//! Stage view models
//!
//! Pure projection of the current board snapshot: ordered deals, count and
//! summed value per stage. Recomputed on demand, never stored.

use rust_decimal::Decimal;
use shared::models::{Deal, Stage};
use shared::pipeline::StageView;

pub struct StageAggregator;

impl StageAggregator {
    /// View of one stage; deals of other stages are ignored
    pub fn aggregate<'a>(stage: &Stage, deals: impl IntoIterator<Item = &'a Deal>) -> StageView {
        let mut deals: Vec<Deal> = deals
            .into_iter()
            .filter(|d| d.stage_id == stage.id)
            .cloned()
            .collect();
        deals.sort_by_key(|d| (d.position, d.id));

        let total_value = deals.iter().map(|d| d.value).sum::<Decimal>();

        StageView {
            stage: stage.clone(),
            count: deals.len(),
            deals,
            total_value,
        }
    }

    /// Every stage, by ordinal then id
    pub fn board<'a>(
        stages: impl IntoIterator<Item = &'a Stage>,
        deals: impl IntoIterator<Item = &'a Deal>,
    ) -> Vec<StageView> {
        let mut stages: Vec<&Stage> = stages.into_iter().collect();
        stages.sort_by_key(|s| (s.ordinal, s.id));
        let deals: Vec<&Deal> = deals.into_iter().collect();

        stages
            .into_iter()
            .map(|stage| Self::aggregate(stage, deals.iter().copied()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn stage(id: i64, ordinal: i32) -> Stage {
        Stage {
            id,
            pipeline_id: 1,
            name: format!("S{id}"),
            ordinal,
            color: "#000".into(),
        }
    }

    fn deal(id: i64, stage_id: i64, position: i64, value: &str) -> Deal {
        Deal {
            id,
            pipeline_id: 1,
            stage_id,
            title: format!("D{id}"),
            value: Decimal::from_str(value).unwrap(),
            position,
            company_id: None,
            person_id: None,
            partner_id: None,
            tag_ids: Default::default(),
            created_at: 0,
            updated_at: 0,
            version: 1,
        }
    }

    #[test]
    fn aggregate_orders_counts_and_sums() {
        let deals = vec![
            deal(1, 10, 20_000, "100.50"),
            deal(2, 10, 10_000, "99.50"),
            deal(3, 20, 0, "1000"),
        ];
        let view = StageAggregator::aggregate(&stage(10, 0), &deals);
        assert_eq!(view.deal_ids(), vec![2, 1]);
        assert_eq!(view.count, 2);
        assert_eq!(view.total_value, Decimal::from(200));
    }

    #[test]
    fn empty_stage() {
        let view = StageAggregator::aggregate(&stage(10, 0), &[]);
        assert_eq!(view.count, 0);
        assert_eq!(view.total_value, Decimal::ZERO);
    }

    #[test]
    fn board_follows_ordinals() {
        let stages = vec![stage(20, 1), stage(10, 0), stage(30, 2)];
        let deals = vec![deal(1, 20, 0, "5"), deal(2, 30, 0, "7")];
        let board = StageAggregator::board(&stages, &deals);
        let ids: Vec<_> = board.iter().map(|v| v.stage.id).collect();
        assert_eq!(ids, vec![10, 20, 30]);
        assert_eq!(board[1].count, 1);
        assert_eq!(board[2].total_value, Decimal::from(7));
    }
}
