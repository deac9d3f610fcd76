use serde::{Deserialize, Serialize};

use crate::models::{DealId, StageId};

/// Drag-and-drop request: put `deal_id` at `to_index` of `to_stage_id`
///
/// `to_index` counts deals of the destination stage without the moving deal;
/// out-of-range values clamp to the tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveIntent {
    pub deal_id: DealId,
    pub to_stage_id: StageId,
    pub to_index: usize,
}

impl MoveIntent {
    pub fn new(deal_id: DealId, to_stage_id: StageId, to_index: usize) -> Self {
        Self {
            deal_id,
            to_stage_id,
            to_index,
        }
    }
}
