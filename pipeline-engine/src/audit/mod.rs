//! Deal history trail
//!
//! # Architecture
//!
//! ```text
//! committed mutation
//!   └─ AuditRecorder::record() → mpsc → AuditWorker → AuditSink (memory / redb)
//!
//! per deal: genesis → event₁ → event₂ → ... → eventₙ (SHA256 chain)
//! ```
//!
//! Recording is best effort: a failed append is logged by the worker and
//! never rolls back or fails the mutation that produced it.

pub mod diff;
pub mod recorder;
pub mod sink;
pub mod worker;

pub use diff::{FieldChange, diff_fields};
pub use recorder::{AuditCommand, AuditRecorder};
pub use sink::{AuditError, AuditSink, MemoryAuditSink};
pub use worker::AuditWorker;
