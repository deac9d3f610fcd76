//! Stage view model

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{Deal, Stage};

/// One column as rendered: ordered deals plus its totals
///
/// Derived data, recomputed from the current snapshot; never a source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageView {
    pub stage: Stage,
    /// Ascending position, ties broken by id
    pub deals: Vec<Deal>,
    pub count: usize,
    pub total_value: Decimal,
}

impl StageView {
    pub fn deal_ids(&self) -> Vec<i64> {
        self.deals.iter().map(|d| d.id).collect()
    }
}
