//! Concurrent mutations
//!
//! Runs on a paused clock with a per-write delay so overlapping mutations
//! really interleave at their store round trips.

mod common;

use std::time::Duration;

use common::*;
use shared::models::DealUpdate;
use shared::pipeline::HistoryEventKind;

const WRITE_DELAY: Duration = Duration::from_millis(100);

#[tokio::test(start_paused = true)]
async fn moves_of_different_deals_into_different_stages_overlap() {
    let h = harness(vec![
        deal(1, LEAD, 10_000),
        deal(2, LEAD, 20_000),
        deal(4, QUALIFIED, 10_000),
    ])
    .await;
    h.store.set_write_delay(Some(WRITE_DELAY));

    let start = tokio::time::Instant::now();
    let (a, b) = tokio::join!(
        h.engine.move_deal(1, WON, 0),
        h.engine.move_deal(4, LEAD, 0),
    );
    a.unwrap();
    b.unwrap();

    assert!(start.elapsed() < WRITE_DELAY + WRITE_DELAY / 2);
    assert_eq!(h.order(WON), vec![1]);
    assert_eq!(h.order(LEAD), vec![4, 2]);
    assert!(h.order(QUALIFIED).is_empty());
}

#[tokio::test(start_paused = true)]
async fn moves_into_the_same_stage_overlap() {
    let h = harness(vec![deal(1, LEAD, 10_000), deal(2, LEAD, 20_000)]).await;
    h.store.set_write_delay(Some(WRITE_DELAY));

    let start = tokio::time::Instant::now();
    let first = tokio::spawn({
        let engine = h.engine.clone();
        async move { engine.move_deal(1, WON, 0).await }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;
    let second = tokio::spawn({
        let engine = h.engine.clone();
        async move { engine.move_deal(2, WON, 0).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Both show up while the first write is still in flight
    assert_eq!(h.order(WON), vec![2, 1]);
    assert!(h.order(LEAD).is_empty());

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();
    assert!(start.elapsed() < WRITE_DELAY + WRITE_DELAY / 2);

    assert_eq!(h.order(WON), vec![2, 1]);
    assert_eq!(h.store.get(1).unwrap().position, 10_000);
    assert_eq!(h.store.get(2).unwrap().position, 0);
    assert_eq!(h.engine.deal(1), h.store.get(1));
    assert_eq!(h.engine.deal(2), h.store.get(2));
}

#[tokio::test(start_paused = true)]
async fn renumbering_during_an_overlapping_move_reaches_the_store() {
    let h = harness(vec![
        deal(1, LEAD, 10_000),
        deal(2, LEAD, 20_000),
        deal(5, WON, 0),
        deal(6, WON, 1),
    ])
    .await;
    h.store.set_write_delay(Some(WRITE_DELAY));

    // Deal 1 lands between 5 and 6, which have no room left: the stage is
    // renumbered. Deal 2 then takes the head while deal 1 is still persisting.
    let first = tokio::spawn({
        let engine = h.engine.clone();
        async move { engine.move_deal(1, WON, 1).await }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;
    let second = tokio::spawn({
        let engine = h.engine.clone();
        async move { engine.move_deal(2, WON, 0).await }
    });
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    assert_eq!(h.order(WON), vec![2, 5, 1, 6]);
    let won = h.engine.stage_view(WON).unwrap();
    assert!(won.deals.windows(2).all(|w| w[0].position < w[1].position));
    for deal in &won.deals {
        assert_eq!(Some(deal.clone()), h.store.get(deal.id));
    }
    assert_eq!(h.history_kinds(1).await, vec![HistoryEventKind::Moved]);
    assert_eq!(h.history_kinds(2).await, vec![HistoryEventKind::Moved]);
}

#[tokio::test(start_paused = true)]
async fn many_head_moves_keep_the_stage_consistent() {
    let ids: Vec<i64> = (100..120).collect();
    let deals = ids
        .iter()
        .enumerate()
        .map(|(i, id)| deal(*id, LEAD, (i as i64 + 1) * 10_000))
        .collect();
    let h = harness(deals).await;
    h.store.set_write_delay(Some(Duration::from_millis(5)));

    let tasks: Vec<_> = ids
        .iter()
        .map(|id| {
            let engine = h.engine.clone();
            let id = *id;
            tokio::spawn(async move { engine.move_deal(id, WON, 0).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert!(h.order(LEAD).is_empty());
    let won = h.engine.stage_view(WON).unwrap();
    assert_eq!(won.count, ids.len());
    assert!(
        won.deals.windows(2).all(|w| w[0].position < w[1].position),
        "positions must be strictly increasing: {:?}",
        won.deals.iter().map(|d| d.position).collect::<Vec<_>>()
    );

    // View and store agree on every row
    for deal in &won.deals {
        assert_eq!(Some(deal.clone()), h.store.get(deal.id));
    }
    for id in &ids {
        assert_eq!(h.history_kinds(*id).await, vec![HistoryEventKind::Moved]);
    }
}

#[tokio::test(start_paused = true)]
async fn update_during_renumbering_keeps_both_changes() {
    let h = harness(vec![
        deal(1, LEAD, 10_000),
        deal(5, WON, 0),
        deal(6, WON, 1),
    ])
    .await;
    h.store.set_write_delay(Some(Duration::from_millis(10)));

    // The move renumbers deal 6 while it is being renamed
    let (moved, updated) = tokio::join!(
        h.engine.move_deal(1, WON, 1),
        h.engine.update_deal(
            6,
            DealUpdate {
                title: Some("Renamed".into()),
                ..Default::default()
            },
        ),
    );
    moved.unwrap();
    updated.unwrap();

    let stored = h.store.get(6).unwrap();
    assert_eq!(stored.title, "Renamed");
    assert_eq!(stored.position, 10_000);
    assert_eq!(h.engine.deal(6), Some(stored));
    assert_eq!(h.order(WON), vec![5, 1, 6]);
}

#[tokio::test(start_paused = true)]
async fn mutations_of_one_deal_queue_up() {
    let h = harness(vec![deal(1, LEAD, 10_000)]).await;
    h.store.set_write_delay(Some(Duration::from_millis(20)));

    let (moved, tagged, updated) = tokio::join!(
        h.engine.move_deal(1, QUALIFIED, 0),
        h.engine.add_tag(1, 3),
        h.engine.update_deal(
            1,
            DealUpdate {
                title: Some("Queued".into()),
                ..Default::default()
            },
        ),
    );
    moved.unwrap();
    tagged.unwrap();
    updated.unwrap();

    let stored = h.store.get(1).unwrap();
    assert_eq!(stored.stage_id, QUALIFIED);
    assert!(stored.has_tag(3));
    assert_eq!(stored.title, "Queued");
    assert_eq!(stored.version, 4);
    assert_eq!(h.engine.deal(1), Some(stored));
    assert_eq!(h.history(1).await.len(), 4);
}
