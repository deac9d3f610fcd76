//! Deal pipeline engine
//!
//! Keeps deals ordered inside kanban stages, moves them between stages with
//! optimistic local updates, and records a per-deal history trail.
//!
//! # Module layout
//!
//! ```text
//! pipeline-engine/src/
//! ├── core/          # configuration
//! ├── position/      # sort-key allocation and renumbering
//! ├── store/         # ItemStore trait, memory and redb adapters
//! ├── audit/         # history recorder, worker, sinks, field diffs
//! ├── pipeline/      # engine, views, reconciliation, notifications
//! ├── clock.rs       # time source
//! └── utils/         # logger
//! ```
//!
//! # Example
//!
//! ```ignore
//! let store = Arc::new(MemoryStore::new());
//! let engine = PipelineEngine::builder(pipeline_id, store).load().await?;
//! let payload = DealCreate {
//!     title: "Acme renewal".into(),
//!     ..Default::default()
//! };
//! let created = engine.create_deal(lead, payload).await?;
//! engine.move_deal(created.deal_id, won, 0).await?;
//! ```

pub mod audit;
pub mod clock;
pub mod core;
pub mod pipeline;
pub mod position;
pub mod store;
pub mod utils;

pub use audit::{AuditError, AuditRecorder, AuditSink, MemoryAuditSink};
#[cfg(any(test, feature = "testing"))]
pub use clock::FixedClock;
pub use clock::{Clock, SystemClock};
pub use core::EngineConfig;
pub use pipeline::{
    CreateOutcome, EngineBuilder, EngineError, EngineResult, MutationPhase, PipelineEngine,
    StageAggregator, SubscriptionId,
};
pub use position::{DEFAULT_GAP, Placement, PositionAllocator, PositionError};
pub use store::{ItemStore, MemoryStore, RedbStore, StoreError, StoreResult};

// Re-export logger functions
pub use utils::logger::{cleanup_old_logs, init_logger, init_logger_with_file};
