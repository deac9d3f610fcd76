//! Stage management
//!
//! Stages are configuration rather than drag targets: changes are persisted
//! first and only then applied to the view.

use shared::models::{DEFAULT_STAGE_COLOR, Stage, StageCreate, StageId, StageUpdate};
use shared::util::is_blank;

use super::PipelineEngine;
use crate::pipeline::error::{EngineError, EngineResult};
use crate::store::StoreError;

impl PipelineEngine {
    /// Stages of the pipeline by ordinal
    pub fn stages(&self) -> Vec<Stage> {
        self.inner
            .view
            .read()
            .stages()
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn create_stage(&self, payload: StageCreate) -> EngineResult<Stage> {
        let result = self.run_create_stage(payload).await;
        self.settle(None, result)
    }

    async fn run_create_stage(&self, payload: StageCreate) -> EngineResult<Stage> {
        let inner = &self.inner;
        inner.ensure_running()?;
        if is_blank(&payload.name) {
            return Err(EngineError::InvalidOperation(
                "Stage name is required".to_string(),
            ));
        }

        let stage = Stage {
            id: inner.fresh_id(),
            pipeline_id: inner.pipeline_id,
            name: payload.name.trim().to_string(),
            ordinal: payload
                .ordinal
                .unwrap_or_else(|| inner.view.read().next_ordinal()),
            color: payload
                .color
                .unwrap_or_else(|| DEFAULT_STAGE_COLOR.to_string()),
        };

        let stored = inner.store.write_stage(stage).await?;
        inner.view.write().upsert_stage(stored.clone());

        tracing::info!(
            stage_id = stored.id,
            name = %stored.name,
            ordinal = stored.ordinal,
            "Stage created"
        );
        inner.publish(&[stored.id]);
        Ok(stored)
    }

    /// Rename, recolor or reorder a stage
    pub async fn update_stage(
        &self,
        stage_id: StageId,
        update: StageUpdate,
    ) -> EngineResult<Stage> {
        let result = self.run_update_stage(stage_id, update).await;
        self.settle(None, result)
    }

    async fn run_update_stage(
        &self,
        stage_id: StageId,
        update: StageUpdate,
    ) -> EngineResult<Stage> {
        let inner = &self.inner;
        inner.ensure_running()?;
        if update.name.as_deref().is_some_and(is_blank) {
            return Err(EngineError::InvalidOperation(
                "Stage name is required".to_string(),
            ));
        }

        let mut stage = inner
            .view
            .read()
            .stage(stage_id)
            .cloned()
            .ok_or(EngineError::StageNotFound(stage_id))?;
        if !stage.apply(&update) {
            return Ok(stage);
        }

        let stored = inner.store.write_stage(stage).await?;
        inner.view.write().upsert_stage(stored.clone());

        tracing::info!(stage_id, name = %stored.name, ordinal = stored.ordinal, "Stage updated");
        inner.publish(&[stage_id]);
        Ok(stored)
    }

    /// Delete an empty stage
    pub async fn delete_stage(&self, stage_id: StageId) -> EngineResult<()> {
        let result = self.run_delete_stage(stage_id).await;
        self.settle(None, result)
    }

    async fn run_delete_stage(&self, stage_id: StageId) -> EngineResult<()> {
        let inner = &self.inner;
        inner.ensure_running()?;

        {
            let view = inner.view.read();
            if !view.has_stage(stage_id) {
                return Err(EngineError::StageNotFound(stage_id));
            }
            if !view.stage_is_empty(stage_id) {
                return Err(EngineError::StageNotEmpty(stage_id));
            }
        }

        match inner.store.delete_stage(stage_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::warn!(stage_id, "Stage already gone from store, treating as deleted");
            }
            Err(StoreError::Rejected(reason)) => {
                tracing::warn!(stage_id, reason = %reason, "Store refused to delete stage");
                return Err(EngineError::StageNotEmpty(stage_id));
            }
            Err(e) => return Err(e.into()),
        }

        inner.view.write().remove_stage(stage_id);
        tracing::info!(stage_id, "Stage deleted");
        Ok(())
    }
}
