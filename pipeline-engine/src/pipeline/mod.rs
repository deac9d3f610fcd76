//! Move orchestration and stage views
//!
//! - [`PipelineEngine`]: optimistic apply, persist, commit or roll back
//! - [`StageAggregator`]: per-stage view models from the local board
//! - [`Reconciler`]: debounced re-fetch after a commit
//! - [`Notifier`]: toasts and stage subscriptions

pub mod aggregator;
pub mod engine;
pub mod error;
pub mod notify;
pub mod reconcile;
pub mod view;

pub use aggregator::StageAggregator;
pub use engine::{CreateOutcome, EngineBuilder, MutationPhase, PipelineEngine};
pub use error::{EngineError, EngineResult};
pub use notify::{Notifier, StageCallback, SubscriptionId};
pub use reconcile::Reconciler;
pub use view::PipelineView;
