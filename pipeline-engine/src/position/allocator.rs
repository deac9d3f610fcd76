use thiserror::Error;

use super::DEFAULT_GAP;
use super::rebalance::rebalance;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PositionError {
    /// No integer fits strictly between the neighbours
    #[error("no room between {prev:?} and {next:?}, stage must be renumbered")]
    RebalanceRequired { prev: Option<i64>, next: Option<i64> },

    /// Still no room after renumbering
    #[error("position space exhausted")]
    Exhausted,
}

/// Where a deal goes, plus the new positions of the stage's other deals when
/// the stage had to be renumbered first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub position: i64,
    /// Clamped slot index the position was computed for
    pub index: usize,
    /// New positions for the existing deals, same order as the input
    pub rebalanced: Option<Vec<i64>>,
}

/// Pure sort-key arithmetic, no I/O
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionAllocator {
    gap: i64,
}

impl Default for PositionAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_GAP)
    }
}

impl PositionAllocator {
    /// `gap` below 2 leaves no room for a midpoint and is raised to 2
    pub fn new(gap: i64) -> Self {
        Self { gap: gap.max(2) }
    }

    pub fn gap(&self) -> i64 {
        self.gap
    }

    /// Key strictly between `prev` and `next` (either may be absent)
    pub fn compute_position(
        &self,
        prev: Option<i64>,
        next: Option<i64>,
    ) -> Result<i64, PositionError> {
        let no_room = PositionError::RebalanceRequired { prev, next };
        match (prev, next) {
            (None, None) => Ok(self.gap),
            (None, Some(n)) => {
                let pos = n.saturating_sub(self.gap).max(0);
                if pos < n { Ok(pos) } else { Err(no_room) }
            }
            (Some(p), None) => p.checked_add(self.gap).ok_or(no_room),
            (Some(p), Some(n)) => {
                let mid = (i128::from(p) + i128::from(n)).div_euclid(2) as i64;
                if p < mid && mid < n {
                    Ok(mid)
                } else {
                    Err(no_room)
                }
            }
        }
    }

    /// Compute the key for slot `index` of `ordered`, renumbering once if needed
    ///
    /// `ordered` holds the ascending positions of the destination stage without
    /// the deal being placed.
    pub fn place(&self, ordered: &[i64], index: usize) -> Result<Placement, PositionError> {
        let index = index.min(ordered.len());
        let (prev, next) = neighbors(ordered, index);

        match self.compute_position(prev, next) {
            Ok(position) => Ok(Placement {
                position,
                index,
                rebalanced: None,
            }),
            Err(PositionError::RebalanceRequired { .. }) => {
                let renumbered = rebalance(ordered.len(), index, self.gap);
                let (prev, next) = neighbors(&renumbered, index);
                let position = self
                    .compute_position(prev, next)
                    .map_err(|_| PositionError::Exhausted)?;
                tracing::debug!(
                    len = ordered.len(),
                    index,
                    position,
                    "Stage renumbered to make room"
                );
                Ok(Placement {
                    position,
                    index,
                    rebalanced: Some(renumbered),
                })
            }
            Err(e) => Err(e),
        }
    }
}

/// Neighbours of slot `index`; the index is clamped to the list length
pub fn neighbors(ordered: &[i64], index: usize) -> (Option<i64>, Option<i64>) {
    let index = index.min(ordered.len());
    let prev = index.checked_sub(1).and_then(|i| ordered.get(i)).copied();
    let next = ordered.get(index).copied();
    (prev, next)
}
