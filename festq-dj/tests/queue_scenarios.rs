//! End-to-end scenarios against DjService
//!
//! Rounds, the queue handoff, skips and restart recovery, driven the way the
//! HTTP layer and the scheduler drive them.

use std::sync::Arc;

use festq_common::db::{init_database, init_memory_database};
use festq_common::events::{EntryStatus, PlaybackState, RoundStatus};
use festq_dj::config::ServiceConfig;
use festq_dj::db::SqliteStore;
use festq_dj::{DjService, Error, Role};
use uuid::Uuid;

async fn manual_service() -> Arc<DjService> {
    let pool = init_memory_database().await.unwrap();
    Arc::new(DjService::new(
        Arc::new(SqliteStore::new(pool)),
        ServiceConfig::manual(),
    ))
}

async fn add_tracks(service: &DjService, names: &[&str]) -> Vec<Uuid> {
    let mut ids = Vec::new();
    for name in names {
        let track = service
            .add_track(Role::Operator, name, "Headliner", 200)
            .await
            .unwrap();
        ids.push(track.id);
    }
    ids
}

#[tokio::test]
async fn closed_round_feeds_next_and_promote_returns_it() {
    let service = manual_service().await;
    let ids = add_tracks(&service, &["Warm Up", "T1", "T2"]).await;
    let (warm_up, t1, t2) = (ids[0], ids[1], ids[2]);

    // Something already playing, so the round result waits in the queue
    service.enqueue(Role::Operator, warm_up).await.unwrap();
    assert_eq!(service.playback_snapshot().state, PlaybackState::Playing);

    let round = service
        .open_round(Role::Operator, vec![t1, t2], Some(300))
        .await
        .unwrap();
    service.cast_vote(round.round_id, "v1", t1).await.unwrap();
    service.cast_vote(round.round_id, "v2", t1).await.unwrap();
    service.cast_vote(round.round_id, "v3", t2).await.unwrap();

    let tally = service
        .close_round(Role::Operator, round.round_id)
        .await
        .unwrap();
    assert_eq!(tally.status, RoundStatus::Closed);
    assert_eq!(tally.votes_for(t1), Some(2));
    assert_eq!(tally.votes_for(t2), Some(1));

    let next = service.promote_top().await.unwrap();
    assert_eq!(next.track_id, t1);
    assert_eq!(next.status, EntryStatus::Next);
    assert_eq!(next.vote_count_at_promotion, Some(2));

    let queue = service.queue_snapshot().await;
    assert_eq!(queue.playing.as_ref().unwrap().track_id, warm_up);
    assert_eq!(queue.next.as_ref().unwrap().track_id, t1);
    assert!(queue.ordered_track_ids().contains(&t2));
}

#[tokio::test]
async fn double_close_returns_same_tally() {
    let service = manual_service().await;
    let ids = add_tracks(&service, &["A", "B"]).await;

    let round = service
        .open_round(Role::Operator, ids.clone(), Some(300))
        .await
        .unwrap();
    service.cast_vote(round.round_id, "v1", ids[1]).await.unwrap();
    service.cast_vote(round.round_id, "v2", ids[0]).await.unwrap();

    let first = service
        .close_round(Role::Operator, round.round_id)
        .await
        .unwrap();
    let second = service
        .close_round(Role::Operator, round.round_id)
        .await
        .unwrap();

    assert_eq!(first.closed_at, second.closed_at);
    assert_eq!(first.total_votes, second.total_votes);
    assert_eq!(first.candidates.len(), second.candidates.len());

    // The result was applied once: one entry per candidate, not two
    let queue = service.queue_snapshot().await;
    let entries = queue.playing.iter().count() + queue.next.iter().count();
    let queued = queue
        .order
        .iter()
        .filter(|r| r.entry_id.is_some())
        .count();
    assert_eq!(entries + queued, 2);
}

#[tokio::test]
async fn vote_after_close_rejected() {
    let service = manual_service().await;
    let ids = add_tracks(&service, &["A", "B"]).await;
    let round = service
        .open_round(Role::Operator, ids.clone(), Some(300))
        .await
        .unwrap();
    service
        .close_round(Role::Operator, round.round_id)
        .await
        .unwrap();

    let result = service.cast_vote(round.round_id, "late", ids[0]).await;
    assert!(matches!(result, Err(Error::RoundClosed(_))));
}

#[tokio::test]
async fn promote_on_empty_queue_leaves_state_unchanged() {
    let service = manual_service().await;
    let before = service.queue_snapshot().await;
    let sequence = service.gateway().last_sequence();

    let result = service.promote_top().await;
    assert!(matches!(result, Err(Error::QueueEmpty)));

    let after = service.queue_snapshot().await;
    assert!(after.playing.is_none());
    assert!(after.next.is_none());
    assert_eq!(before.order.len(), after.order.len());
    assert_eq!(service.gateway().last_sequence(), sequence);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_votes_all_counted() {
    let service = manual_service().await;
    let ids = add_tracks(&service, &["A", "B", "C"]).await;
    let round = service
        .open_round(Role::Operator, ids.clone(), Some(300))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..60 {
        let service = service.clone();
        let track = ids[i % ids.len()];
        let round_id = round.round_id;
        handles.push(tokio::spawn(async move {
            service
                .cast_vote(round_id, &format!("voter-{}", i), track)
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let tally = service.current_tally().await.unwrap();
    assert_eq!(tally.total_votes, 60);
    let sum: u32 = tally.candidates.iter().map(|c| c.votes).sum();
    assert_eq!(sum, 60);
    for id in &ids {
        assert_eq!(tally.votes_for(*id), Some(20));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicate_votes_count_once() {
    let service = manual_service().await;
    let ids = add_tracks(&service, &["A", "B"]).await;
    let round = service
        .open_round(Role::Operator, ids.clone(), Some(300))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..10 {
        let service = service.clone();
        let track = ids[i % 2];
        let round_id = round.round_id;
        handles.push(tokio::spawn(async move {
            service.cast_vote(round_id, "same-phone", track).await
        }));
    }

    let mut accepted = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(Error::DuplicateVote { .. }) => duplicates += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(duplicates, 9);
    assert_eq!(service.current_tally().await.unwrap().total_votes, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rapid_double_skip_advances_once() {
    let service = manual_service().await;
    let ids = add_tracks(&service, &["Now", "Then", "Later"]).await;
    for id in &ids {
        service.enqueue(Role::Operator, *id).await.unwrap();
    }

    let before = service.playback_snapshot();
    let playing = before.now_playing_entry_id().unwrap();

    let a = {
        let service = service.clone();
        tokio::spawn(async move { service.skip(Role::Operator, Some(playing)).await })
    };
    let b = {
        let service = service.clone();
        tokio::spawn(async move { service.skip(Role::Operator, Some(playing)).await })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    let after = service.playback_snapshot();
    assert_eq!(after.advance_count, before.advance_count + 1);
    assert_eq!(after.state, PlaybackState::Playing);
    assert_eq!(after.now_playing.unwrap().track_id, ids[1]);
}

#[tokio::test]
async fn skip_with_nothing_queued_empties_playback() {
    let service = manual_service().await;
    let ids = add_tracks(&service, &["Only"]).await;
    service.enqueue(Role::Operator, ids[0]).await.unwrap();

    let snapshot = service.skip(Role::Operator, None).await.unwrap();
    assert_eq!(snapshot.state, PlaybackState::Empty);
    assert!(snapshot.now_playing.is_none());
}

#[tokio::test]
async fn state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("festq.db");

    let (ids, round_id, playing_track) = {
        let pool = init_database(&db_path).await.unwrap();
        let service = DjService::new(
            Arc::new(SqliteStore::new(pool.clone())),
            ServiceConfig::manual(),
        );
        let ids = add_tracks(&service, &["A", "B", "C"]).await;

        service.enqueue(Role::Operator, ids[2]).await.unwrap();
        let round = service
            .open_round(Role::Operator, vec![ids[0], ids[1]], Some(600))
            .await
            .unwrap();
        service.cast_vote(round.round_id, "v1", ids[0]).await.unwrap();
        service.cast_vote(round.round_id, "v2", ids[1]).await.unwrap();
        service.cast_vote(round.round_id, "v3", ids[1]).await.unwrap();

        let playing = service.playback_snapshot().now_playing.unwrap().track_id;
        pool.close().await;
        (ids, round.round_id, playing)
    };

    let pool = init_database(&db_path).await.unwrap();
    let service = DjService::restore(Arc::new(SqliteStore::new(pool)), ServiceConfig::manual())
        .await
        .unwrap();

    assert_eq!(service.catalog().len(), 3);

    let tally = service.current_tally().await.unwrap();
    assert_eq!(tally.round_id, round_id);
    assert_eq!(tally.status, RoundStatus::Open);
    assert_eq!(tally.total_votes, 3);
    assert_eq!(tally.votes_for(ids[1]), Some(2));

    // Ledger came back too
    assert!(matches!(
        service.cast_vote(round_id, "v2", ids[0]).await,
        Err(Error::DuplicateVote { .. })
    ));
    service.cast_vote(round_id, "v4", ids[0]).await.unwrap();

    let playback = service.playback_snapshot();
    assert_eq!(playback.state, PlaybackState::Playing);
    assert_eq!(playback.now_playing.unwrap().track_id, playing_track);

    // The restored round still blocks a second open
    assert!(matches!(
        service.open_round(Role::Operator, vec![ids[0]], None).await,
        Err(Error::RoundAlreadyOpen(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn votes_racing_close_land_wholly_before_or_after() {
    let service = manual_service().await;
    let ids = add_tracks(&service, &["A", "B"]).await;
    let round = service
        .open_round(Role::Operator, ids.clone(), Some(300))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..100 {
        let service = service.clone();
        let track = ids[i % 2];
        let round_id = round.round_id;
        handles.push(tokio::spawn(async move {
            service
                .cast_vote(round_id, &format!("voter-{}", i), track)
                .await
        }));
    }
    let closer = {
        let service = service.clone();
        let round_id = round.round_id;
        tokio::spawn(async move { service.close_round(Role::Operator, round_id).await })
    };

    let mut accepted = 0u32;
    let mut rejected = 0u32;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(Error::RoundClosed(_)) => rejected += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    let closed = closer.await.unwrap().unwrap();

    assert_eq!(accepted + rejected, 100);
    assert_eq!(closed.status, RoundStatus::Closed);
    assert_eq!(closed.total_votes, accepted);
    let sum: u32 = closed.candidates.iter().map(|c| c.votes).sum();
    assert_eq!(sum, accepted);

    // Closing again reports the frozen tally
    let again = service
        .close_round(Role::Operator, round.round_id)
        .await
        .unwrap();
    assert_eq!(again.total_votes, accepted);

    // Exactly the accepted votes reached the queue
    let queue = service.queue_snapshot().await;
    let queued: u32 = queue.playing.iter().map(|e| e.votes).sum::<u32>()
        + queue.next.iter().map(|e| e.votes).sum::<u32>()
        + queue.order.iter().map(|r| r.votes).sum::<u32>();
    assert_eq!(queued, accepted);
}

#[tokio::test]
async fn close_of_evicted_round_returns_stored_tally() {
    let service = manual_service().await;
    let ids = add_tracks(&service, &["A", "B"]).await;

    let first = service
        .open_round(Role::Operator, ids.clone(), Some(300))
        .await
        .unwrap();
    service.cast_vote(first.round_id, "v1", ids[0]).await.unwrap();
    service.cast_vote(first.round_id, "v2", ids[1]).await.unwrap();
    service.cast_vote(first.round_id, "v3", ids[1]).await.unwrap();
    let closed = service
        .close_round(Role::Operator, first.round_id)
        .await
        .unwrap();

    // Two later rounds push the first one out of memory
    for _ in 0..2 {
        let round = service
            .open_round(Role::Operator, ids.clone(), Some(300))
            .await
            .unwrap();
        service
            .close_round(Role::Operator, round.round_id)
            .await
            .unwrap();
    }
    assert!(matches!(
        service.cast_vote(first.round_id, "v9", ids[0]).await,
        Err(Error::RoundNotFound(_))
    ));

    let queue_before = service.queue_snapshot().await;
    let sequence = service.gateway().last_sequence();

    let again = service
        .close_round(Role::Operator, first.round_id)
        .await
        .unwrap();
    assert_eq!(again.round_id, first.round_id);
    assert_eq!(again.status, RoundStatus::Closed);
    assert_eq!(again.closed_at, closed.closed_at);
    assert_eq!(again.total_votes, 3);
    assert_eq!(again.votes_for(ids[1]), Some(2));

    // Nothing re-applied, nothing broadcast
    assert_eq!(service.queue_snapshot().await, queue_before);
    assert_eq!(service.gateway().last_sequence(), sequence);

    assert!(matches!(
        service.close_round(Role::Operator, Uuid::new_v4()).await,
        Err(Error::RoundNotFound(_))
    ));
}

#[tokio::test]
async fn promotion_counts_open_round_votes() {
    let service = manual_service().await;
    let ids = add_tracks(&service, &["W", "A", "B", "C", "D"]).await;
    let (w, a, b, c, d) = (ids[0], ids[1], ids[2], ids[3], ids[4]);

    for id in [w, a, b, c] {
        service.enqueue(Role::Operator, id).await.unwrap();
    }
    let queue = service.queue_snapshot().await;
    assert_eq!(queue.playing.unwrap().track_id, w);
    assert_eq!(queue.next.unwrap().track_id, a);
    assert_eq!(queue.order[0].track_id, b);

    let round = service
        .open_round(Role::Operator, vec![c, d], Some(300))
        .await
        .unwrap();
    service.cast_vote(round.round_id, "v1", c).await.unwrap();
    service.cast_vote(round.round_id, "v2", c).await.unwrap();

    // C leads the published order on live votes
    let queue = service.queue_snapshot().await;
    assert_eq!(queue.order[0].track_id, c);

    // ...and the refill after a skip takes the same row
    service.skip(Role::Operator, None).await.unwrap();
    let queue = service.queue_snapshot().await;
    assert_eq!(queue.playing.unwrap().track_id, a);
    let next = queue.next.unwrap();
    assert_eq!(next.track_id, c);
    assert_eq!(next.vote_count_at_promotion, Some(2));
}

#[tokio::test]
async fn event_sequence_keeps_rising_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("festq.db");

    let old_last = {
        let pool = init_database(&db_path).await.unwrap();
        let service =
            DjService::restore(Arc::new(SqliteStore::new(pool.clone())), ServiceConfig::manual())
                .await
                .unwrap();
        let ids = add_tracks(&service, &["A", "B"]).await;
        service.enqueue(Role::Operator, ids[0]).await.unwrap();
        service.enqueue(Role::Operator, ids[1]).await.unwrap();

        let last = service.gateway().last_sequence();
        assert!(last > 0);
        pool.close().await;
        last
    };

    let pool = init_database(&db_path).await.unwrap();
    let service = DjService::restore(Arc::new(SqliteStore::new(pool)), ServiceConfig::manual())
        .await
        .unwrap();

    // A client still holding the old cursor is told to resync
    assert!(service.gateway().last_sequence() >= old_last);
    assert!(!service.gateway().replay_since(old_last).complete);

    let mut rx = service.gateway().subscribe();
    service.skip(Role::Operator, None).await.unwrap();
    let first = rx.try_recv().unwrap();
    assert!(first.sequence_number > old_last);
}
