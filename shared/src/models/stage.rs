//! Stage Model

use serde::{Deserialize, Serialize};

use super::{PipelineId, StageId};

/// Default stage color when none is given
pub const DEFAULT_STAGE_COLOR: &str = "#94a3b8";

/// Stage entity (a column of the board)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub id: StageId,
    pub pipeline_id: PipelineId,
    pub name: String,
    /// Column order within the pipeline (ascending)
    pub ordinal: i32,
    pub color: String,
}

/// Create stage payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageCreate {
    pub name: String,
    pub color: Option<String>,
    /// Defaults to after the last existing stage
    pub ordinal: Option<i32>,
}

/// Update stage payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageUpdate {
    pub name: Option<String>,
    pub color: Option<String>,
    pub ordinal: Option<i32>,
}

impl StageUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.color.is_none() && self.ordinal.is_none()
    }
}

impl Stage {
    /// Apply an update, returning whether anything changed
    pub fn apply(&mut self, update: &StageUpdate) -> bool {
        let mut changed = false;
        if let Some(name) = &update.name
            && *name != self.name
        {
            self.name = name.clone();
            changed = true;
        }
        if let Some(color) = &update.color
            && *color != self.color
        {
            self.color = color.clone();
            changed = true;
        }
        if let Some(ordinal) = update.ordinal
            && ordinal != self.ordinal
        {
            self.ordinal = ordinal;
            changed = true;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lead() -> Stage {
        Stage {
            id: 1,
            pipeline_id: 7,
            name: "Lead".into(),
            ordinal: 0,
            color: DEFAULT_STAGE_COLOR.into(),
        }
    }

    #[test]
    fn apply_reports_changes_only_when_values_differ() {
        let mut stage = lead();
        assert!(!stage.apply(&StageUpdate {
            name: Some("Lead".into()),
            ..Default::default()
        }));
        assert!(stage.apply(&StageUpdate {
            name: Some("Qualified".into()),
            ordinal: Some(3),
            ..Default::default()
        }));
        assert_eq!(stage.name, "Qualified");
        assert_eq!(stage.ordinal, 3);
    }

    #[test]
    fn empty_update() {
        assert!(StageUpdate::default().is_empty());
        assert!(
            !StageUpdate {
                color: Some("#fff".into()),
                ..Default::default()
            }
            .is_empty()
        );
    }
}
