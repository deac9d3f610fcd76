//! Position allocation
//!
//! Deals of a stage are ordered by an `i64` sort key. New keys are picked
//! between the neighbours of the target slot so a move rewrites one row; only
//! when two neighbours are adjacent integers is the stage renumbered.
//!
//! ```text
//! empty stage          → GAP
//! head  (next = n)     → max(0, n - GAP)
//! tail  (prev = p)     → p + GAP
//! between p and n      → ⌊(p + n) / 2⌋
//! no room              → RebalanceRequired → renumber to multiples of GAP
//! ```

mod allocator;
mod rebalance;

pub use allocator::{Placement, PositionAllocator, PositionError, neighbors};
pub use rebalance::rebalance;

/// Default spacing between freshly numbered positions
pub const DEFAULT_GAP: i64 = 10_000;
