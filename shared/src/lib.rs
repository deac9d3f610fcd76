//! Shared types for the deal pipeline
//!
//! Domain types used by the engine and by any consumer layer on top of it:
//! stages and deals, create/update payloads, the per-deal history record,
//! stage view models, toast notifications and the unified error system.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod util;

// Re-exports
pub use serde::{Deserialize, Serialize};

pub use error::{AppError, AppResult, ErrorCategory, ErrorCode};
pub use models::{
    Deal, DealCreate, DealId, DealUpdate, PipelineId, Stage, StageCreate, StageId, StageUpdate,
    TagId,
};
pub use pipeline::{
    Actor, HistoryEvent, HistoryEventKind, MoveIntent, Notification, StageView,
};
