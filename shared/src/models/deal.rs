//! Deal Model

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{DealId, PipelineId, StageId, TagId, double_option};

/// Deal entity (an item on the board)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deal {
    pub id: DealId,
    pub pipeline_id: PipelineId,
    /// Owning stage (exactly one)
    pub stage_id: StageId,
    pub title: String,
    /// Monetary value
    pub value: Decimal,
    /// Sort key, only meaningful against deals of the same stage
    pub position: i64,
    pub company_id: Option<i64>,
    pub person_id: Option<i64>,
    pub partner_id: Option<i64>,
    #[serde(default)]
    pub tag_ids: BTreeSet<TagId>,
    /// Unix millis
    pub created_at: i64,
    /// Unix millis
    pub updated_at: i64,
    /// Store-assigned concurrency token, bumped on every write
    #[serde(default)]
    pub version: u64,
}

/// Create deal payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DealCreate {
    pub title: String,
    #[serde(default)]
    pub value: Decimal,
    pub company_id: Option<i64>,
    pub person_id: Option<i64>,
    pub partner_id: Option<i64>,
    /// Linked one by one after the deal exists
    #[serde(default)]
    pub tag_ids: BTreeSet<TagId>,
}

/// Update deal payload
///
/// Stage and position are not part of it; they change only through a move.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DealUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "double_option")]
    pub company_id: Option<Option<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "double_option")]
    pub person_id: Option<Option<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "double_option")]
    pub partner_id: Option<Option<i64>>,
}

impl DealUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.value.is_none()
            && self.company_id.is_none()
            && self.person_id.is_none()
            && self.partner_id.is_none()
    }
}

impl Deal {
    /// Apply an update in place, returning whether anything changed
    pub fn apply(&mut self, update: &DealUpdate) -> bool {
        let before = (
            self.title.clone(),
            self.value,
            self.company_id,
            self.person_id,
            self.partner_id,
        );
        if let Some(title) = &update.title {
            self.title = title.clone();
        }
        if let Some(value) = update.value {
            self.value = value;
        }
        if let Some(company_id) = update.company_id {
            self.company_id = company_id;
        }
        if let Some(person_id) = update.person_id {
            self.person_id = person_id;
        }
        if let Some(partner_id) = update.partner_id {
            self.partner_id = partner_id;
        }
        before
            != (
                self.title.clone(),
                self.value,
                self.company_id,
                self.person_id,
                self.partner_id,
            )
    }

    pub fn has_tag(&self, tag_id: TagId) -> bool {
        self.tag_ids.contains(&tag_id)
    }
}
