//! Renumbered neighbours
//!
//! When a placement needs a rebalance, the other deals of the destination
//! stage get new positions. They are written before the placed deal, each
//! with its own conditional write, and put back if the placement fails.
//!
//! No stage-wide lock is taken, so placements into one stage can overlap.
//! The view is the authority on positions: every writer pushes the position
//! the view holds at write time, and a neighbour renumbered again by a later
//! placement is left to that placement.

use shared::models::{Deal, StageId};

use super::EngineInner;
use crate::pipeline::error::{EngineError, EngineResult};
use crate::pipeline::view::PipelineView;
use crate::store::StoreError;

/// A neighbour that moves to `position`
#[derive(Debug, Clone)]
pub(super) struct Renumber {
    /// View copy before the rebalance
    pub deal: Deal,
    pub position: i64,
}

/// A neighbour already written, with the position to restore
pub(super) type Written = (Deal, i64);

/// Neighbours whose position actually changes
pub(super) fn renumbered(others: &[Deal], rebalanced: Option<&[i64]>) -> Vec<Renumber> {
    let Some(positions) = rebalanced else {
        return Vec::new();
    };
    others
        .iter()
        .zip(positions)
        .filter(|(deal, position)| deal.position != **position)
        .map(|(deal, position)| Renumber {
            deal: deal.clone(),
            position: *position,
        })
        .collect()
}

pub(super) fn apply(view: &mut PipelineView, changes: &[Renumber]) {
    for change in changes {
        if let Some(deal) = view.deal_mut(change.deal.id) {
            deal.position = change.position;
        }
    }
}

/// Take the stored rows of written neighbours, except those a later
/// placement has renumbered again in the meantime
pub(super) fn commit_written(view: &mut PipelineView, written: Vec<Written>) {
    for (stored, _) in written {
        let current = view.deal(stored.id).map(|d| d.position);
        if current.is_none_or(|p| p == stored.position) {
            view.commit_deal(stored);
        }
    }
}

/// Put back positions the view still holds from [`apply`]
pub(super) fn revert(view: &mut PipelineView, changes: &[Renumber]) {
    for change in changes {
        if let Some(deal) = view.deal_mut(change.deal.id)
            && deal.position == change.position
        {
            deal.position = change.deal.position;
        }
    }
}

impl EngineInner {
    /// Write the renumbered neighbours in order
    ///
    /// A failure puts back the ones already written, in the store and the
    /// view, before returning the error.
    pub(super) async fn persist_renumbering(
        &self,
        stage_id: StageId,
        changes: &[Renumber],
    ) -> EngineResult<Vec<Written>> {
        let mut written = Vec::with_capacity(changes.len());
        for change in changes {
            match self.write_neighbour(stage_id, change).await {
                Ok(Some(stored)) => written.push((stored, change.deal.position)),
                Ok(None) => {
                    tracing::debug!(deal_id = change.deal.id, "Neighbour left the stage, skipped");
                }
                Err(e) => {
                    tracing::warn!(
                        stage_id,
                        deal_id = change.deal.id,
                        error = %e,
                        "Renumbering failed"
                    );
                    let restored = self.compensate_renumbering(written).await;
                    let mut view = self.view.write();
                    for deal in restored {
                        view.commit_deal(deal);
                    }
                    return Err(e);
                }
            }
        }
        if !written.is_empty() {
            tracing::info!(stage_id, renumbered = written.len(), "Stage renumbered");
        }
        Ok(written)
    }

    /// One neighbour, built on its stored row so only the position changes
    ///
    /// `None` when there is nothing to write: the deal is gone, left the
    /// stage, is not stored there yet, already has the position, or was
    /// renumbered again in the view since.
    async fn write_neighbour(
        &self,
        stage_id: StageId,
        change: &Renumber,
    ) -> EngineResult<Option<Deal>> {
        let deal_id = change.deal.id;
        let mut attempt = 0;
        loop {
            if !self.holds_position(deal_id, change.position) {
                return Ok(None);
            }
            let mut fresh = match self.store.read(deal_id).await {
                Ok(fresh) => fresh,
                Err(e) if e.is_not_found() => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            if fresh.stage_id != stage_id || fresh.position == change.position {
                return Ok(None);
            }
            fresh.position = change.position;
            let expected = fresh.version;

            match self.store.write(fresh, Some(expected)).await {
                Ok(stored) => return Ok(Some(stored)),
                Err(StoreError::Conflict { .. }) if attempt < self.max_conflict_retries => {
                    attempt += 1;
                    tracing::debug!(deal_id, attempt, "Neighbour changed while renumbering, retrying");
                }
                Err(StoreError::Conflict { .. }) => return Err(EngineError::Conflict { deal_id }),
                Err(e) if e.is_not_found() => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn holds_position(&self, deal_id: shared::models::DealId, position: i64) -> bool {
        self.view
            .read()
            .deal(deal_id)
            .is_some_and(|d| d.position == position)
    }

    /// Push the view's position of a just-written deal if an overlapping
    /// placement renumbered it while the write was in flight
    ///
    /// Best effort: a failure is logged and the next reconciliation fetch
    /// settles the row.
    pub(super) async fn sync_position(&self, stored: Deal) -> Deal {
        let current = self.view.read().deal(stored.id).map(|d| d.position);
        let Some(target) = current.filter(|p| *p != stored.position) else {
            return stored;
        };
        tracing::debug!(
            deal_id = stored.id,
            written = stored.position,
            target,
            "Deal renumbered while persisting"
        );

        let mut candidate = stored.clone();
        candidate.position = target;
        let expected = stored.version;
        let synced = self
            .write_with_retry(candidate, expected, move |fresh| {
                if fresh.position == target {
                    return false;
                }
                fresh.position = target;
                true
            })
            .await;
        match synced {
            Ok((deal, _)) => deal,
            Err(e) => {
                tracing::warn!(deal_id = stored.id, error = %e, "Failed to store renumbered position");
                stored
            }
        }
    }

    /// Best effort: failures are logged, restored rows returned
    pub(super) async fn compensate_renumbering(&self, written: Vec<Written>) -> Vec<Deal> {
        let restores = written.into_iter().map(|(stored, old_position)| async move {
            let deal_id = stored.id;
            let expected = stored.version;
            let mut restore = stored;
            restore.position = old_position;
            match self.store.write(restore, Some(expected)).await {
                Ok(restored) => Some(restored),
                Err(e) => {
                    tracing::error!(deal_id, error = %e, "Failed to restore renumbered position");
                    None
                }
            }
        });
        futures::future::join_all(restores)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Roll a failed placement back in the view
    ///
    /// `snapshot` is the placed deal before the mutation; `None` for a new deal.
    pub(super) async fn undo_placement(
        &self,
        deal_id: shared::models::DealId,
        snapshot: Option<&Deal>,
        changes: &[Renumber],
        written: Vec<Written>,
    ) {
        let restored = self.compensate_renumbering(written).await;
        let mut view = self.view.write();
        match snapshot {
            Some(snapshot) => {
                view.insert_deal(snapshot.clone());
            }
            None => {
                view.remove_deal(deal_id);
            }
        }
        revert(&mut view, changes);
        for deal in restored {
            view.commit_deal(deal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn deal(id: i64, position: i64) -> Deal {
        Deal {
            id,
            pipeline_id: 1,
            stage_id: 10,
            title: format!("D{id}"),
            value: Decimal::ZERO,
            position,
            company_id: None,
            person_id: None,
            partner_id: None,
            tag_ids: Default::default(),
            created_at: 0,
            updated_at: 0,
            version: 1,
        }
    }

    #[test]
    fn only_changed_positions_are_renumbered() {
        let others = vec![deal(1, 0), deal(2, 1), deal(3, 20_000)];
        let changes = renumbered(&others, Some(&[0, 10_000, 20_000][..]));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].deal.id, 2);
        assert_eq!(changes[0].position, 10_000);
        assert!(renumbered(&others, None).is_empty());
    }

    #[test]
    fn revert_leaves_foreign_positions_alone() {
        let mut view = PipelineView::new(1);
        view.insert_deal(deal(1, 0));
        view.insert_deal(deal(2, 1));
        let changes = vec![
            Renumber {
                deal: deal(1, 0),
                position: 10_000,
            },
            Renumber {
                deal: deal(2, 1),
                position: 20_000,
            },
        ];
        apply(&mut view, &changes);
        assert_eq!(view.deal(2).map(|d| d.position), Some(20_000));

        // Someone else moved deal 1 in between
        if let Some(d) = view.deal_mut(1) {
            d.position = 55;
        }
        revert(&mut view, &changes);
        assert_eq!(view.deal(1).map(|d| d.position), Some(55));
        assert_eq!(view.deal(2).map(|d| d.position), Some(1));
    }

    #[test]
    fn neighbours_renumbered_again_keep_the_view_position() {
        let mut view = PipelineView::new(1);
        view.insert_deal(deal(1, 10_000));
        view.insert_deal(deal(2, 30_000));

        let mut first = deal(1, 10_000);
        first.version = 2;
        // Written as 20000, but a later placement already moved it to 30000
        let mut second = deal(2, 20_000);
        second.version = 2;
        commit_written(&mut view, vec![(first.clone(), 0), (second, 1)]);

        assert_eq!(view.deal(1), Some(&first));
        assert_eq!(
            view.deal(2).map(|d| (d.position, d.version)),
            Some((30_000, 1))
        );
    }
}
