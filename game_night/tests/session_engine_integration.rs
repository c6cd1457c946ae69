//! Integration tests for the session-state mutation engine.
//!
//! Covers active-session uniqueness, table and hand numbering under
//! concurrency, partida lifecycle through finalize, cancellation cascades,
//! replace-by-diff sync and post-commit notifications.

#[macro_use]
mod common;

use common::{at, clear_active_sessions, count, draft_session, player_ids, seated_table};
use game_night::{
    ConflictKind, GameError, HandPatch, HandSpec, PairScores, SessionPayload, SessionStatus,
    TableDetail, TableSpec,
    game::{AnecdotePayload, AnecdoteSpec, EntityRef, HandPayload, PairPayload, TablePayload},
};
use serial_test::serial;
use tokio::sync::mpsc;

fn hand(pair_1_score: i32, pair_2_score: i32) -> HandSpec {
    HandSpec {
        pair_1_score,
        pair_2_score,
        ..Default::default()
    }
}

// ============================================================================
// Sessions
// ============================================================================

#[tokio::test]
#[serial]
async fn test_second_active_session_conflicts() {
    let h = harness!();
    clear_active_sessions(&h.pool).await;

    let first = h
        .games
        .upsert_session(SessionPayload {
            status: Some(SessionStatus::Active),
            ..Default::default()
        })
        .await
        .unwrap();

    let second = h
        .games
        .upsert_session(SessionPayload {
            status: Some(SessionStatus::Active),
            ..Default::default()
        })
        .await;
    assert!(matches!(
        second,
        Err(GameError::Conflict(ConflictKind::ActiveSession))
    ));

    // Promoting a draft is rejected the same way
    let draft = draft_session(&h.games).await;
    let promoted = h
        .games
        .upsert_session(SessionPayload {
            id: Some(draft),
            status: Some(SessionStatus::Active),
            ..Default::default()
        })
        .await;
    assert!(matches!(
        promoted,
        Err(GameError::Conflict(ConflictKind::ActiveSession))
    ));

    // Re-saving the active session itself is fine
    h.games
        .upsert_session(SessionPayload {
            id: Some(first),
            summary: Some("still going".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    let active = h.games.get_active_session().await.unwrap().unwrap();
    assert_eq!(active.id, first);
    assert_eq!(active.summary.as_deref(), Some("still going"));

    h.games.delete_session(first).await.unwrap();
    h.games.delete_session(draft).await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_concurrent_activation_has_single_winner() {
    let h = harness!();
    clear_active_sessions(&h.pool).await;

    let attempts = (0..4).map(|_| {
        let games = h.games.clone();
        tokio::spawn(async move {
            games
                .upsert_session(SessionPayload {
                    status: Some(SessionStatus::Active),
                    ..Default::default()
                })
                .await
        })
    });

    let mut created = Vec::new();
    for attempt in attempts.collect::<Vec<_>>() {
        match attempt.await.unwrap() {
            Ok(id) => created.push(id),
            Err(e) => assert_eq!(e.conflict_kind(), Some(&ConflictKind::ActiveSession)),
        }
    }

    assert_eq!(created.len(), 1);
    let active: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM game_sessions WHERE status = 'active'")
        .fetch_one(h.pool.as_ref())
        .await
        .unwrap();
    assert_eq!(active, 1);

    h.games.delete_session(created[0]).await.unwrap();
}

#[tokio::test]
async fn test_finishing_sets_closed_at() {
    let h = harness!();
    let session_id = draft_session(&h.games).await;

    h.games
        .upsert_session(SessionPayload {
            id: Some(session_id),
            status: Some(SessionStatus::Finished),
            ..Default::default()
        })
        .await
        .unwrap();

    let session = h.games.get_session(session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Finished);
    assert!(session.closed_at.is_some());

    let missing = h
        .games
        .upsert_session(SessionPayload {
            id: Some(i64::MAX),
            ..Default::default()
        })
        .await;
    assert!(matches!(missing, Err(GameError::NotFound { .. })));

    h.games.delete_session(session_id).await.unwrap();
}

// ============================================================================
// Tables
// ============================================================================

#[tokio::test]
async fn test_add_table_numbers_and_seats() {
    let h = harness!();
    let session_id = draft_session(&h.games).await;
    let players = player_ids::<4>();

    let first = seated_table(&h.games, session_id, players).await;
    let second = h
        .games
        .add_table(session_id, TableSpec::default())
        .await
        .unwrap();

    assert_eq!(first.table.table_number, 1);
    assert_eq!(first.table.target_score, 100);
    assert_eq!(second.table.table_number, 2);
    assert_eq!(first.pairs.len(), 2);
    assert_eq!(first.pairs[0].pair_index, 1);
    assert_eq!(first.pairs[0].players, [Some(players[0]), Some(players[1])]);
    assert_eq!(first.pairs[1].players, [Some(players[2]), Some(players[3])]);
    assert_eq!(second.pairs[0].players, [None, None]);

    let duplicate = h
        .games
        .add_table(
            session_id,
            TableSpec {
                table_number: Some(2),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(
        duplicate,
        Err(GameError::Conflict(ConflictKind::DuplicateTableNumber))
    ));

    h.games.delete_session(session_id).await.unwrap();
}

#[tokio::test]
async fn test_add_table_rejects_bad_input() {
    let h = harness!();
    let session_id = draft_session(&h.games).await;

    let low_target = h
        .games
        .add_table(
            session_id,
            TableSpec {
                target_score: Some(99),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(low_target, Err(GameError::BadRequest(_))));

    let seated_twice = h
        .games
        .add_table(
            session_id,
            TableSpec {
                pairs: [[Some(1), Some(2)], [Some(2), Some(3)]],
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(seated_twice, Err(GameError::BadRequest(_))));

    let missing = h.games.add_table(i64::MAX, TableSpec::default()).await;
    assert!(matches!(missing, Err(GameError::NotFound { .. })));

    h.games
        .upsert_session(SessionPayload {
            id: Some(session_id),
            status: Some(SessionStatus::Cancelled),
            ..Default::default()
        })
        .await
        .unwrap();
    let closed = h.games.add_table(session_id, TableSpec::default()).await;
    assert!(matches!(
        closed,
        Err(GameError::Conflict(ConflictKind::SessionClosed))
    ));

    h.games.delete_session(session_id).await.unwrap();
}

#[tokio::test]
async fn test_update_pair_scores() {
    let h = harness!();
    let session_id = draft_session(&h.games).await;
    let table = seated_table(&h.games, session_id, player_ids::<4>()).await;
    let (pair1, pair2) = (table.pairs[0].id, table.pairs[1].id);

    // Deltas follow each pair's index, not argument order
    let detail = h
        .games
        .update_pair_scores(
            table.table.id,
            PairScores {
                pair1_id: pair2,
                pair2_id: pair1,
                pair1_score: 80,
                pair2_score: 45,
                pair1_won_delta: 1,
                pair2_won_delta: 0,
            },
        )
        .await
        .unwrap();

    assert_eq!(detail.table.games_won_pair1, 0);
    assert_eq!(detail.table.games_won_pair2, 1);
    assert_eq!(detail.pairs[0].score, 45);
    assert_eq!(detail.pairs[1].score, 80);

    let negative = h
        .games
        .update_pair_scores(
            table.table.id,
            PairScores {
                pair1_id: pair1,
                pair2_id: pair2,
                pair1_won_delta: -1,
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(negative, Err(GameError::BadRequest(_))));

    let overflow = h
        .games
        .update_pair_scores(
            table.table.id,
            PairScores {
                pair1_id: pair1,
                pair2_id: pair2,
                pair2_won_delta: i32::MAX,
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(overflow, Err(GameError::BadRequest(_))));
    assert_eq!(
        h.games.get_table(table.table.id).await.unwrap().table.games_won_pair2,
        1
    );

    let same_pair = h
        .games
        .update_pair_scores(
            table.table.id,
            PairScores {
                pair1_id: pair1,
                pair2_id: pair1,
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(same_pair, Err(GameError::BadRequest(_))));

    let other = h
        .games
        .add_table(session_id, TableSpec::default())
        .await
        .unwrap();
    let foreign = h
        .games
        .update_pair_scores(
            table.table.id,
            PairScores {
                pair1_id: pair1,
                pair2_id: other.pairs[0].id,
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(foreign, Err(GameError::BadRequest(_))));

    h.games.delete_session(session_id).await.unwrap();
}

// ============================================================================
// Hands and partidas
// ============================================================================

#[tokio::test]
async fn test_concurrent_hands_get_unique_numbers() {
    let h = harness!();
    let session_id = draft_session(&h.games).await;
    let table = seated_table(&h.games, session_id, player_ids::<4>()).await;

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let games = h.games.clone();
            let table_id = table.table.id;
            tokio::spawn(async move { games.add_hand(table_id, hand(i * 5, 0)).await })
        })
        .collect();

    let mut numbers = Vec::new();
    for handle in handles {
        numbers.push(handle.await.unwrap().unwrap().hand_number);
    }
    numbers.sort_unstable();
    assert_eq!(numbers, (1..=8).collect::<Vec<_>>());

    // Every hand of the burst landed in the same, single open partida
    let partidas = h.games.list_partidas(table.table.id).await.unwrap();
    assert_eq!(partidas.len(), 1);
    assert!(partidas[0].is_open());

    h.games.delete_session(session_id).await.unwrap();
}

#[tokio::test]
async fn test_duplicate_hand_number_conflicts() {
    let h = harness!();
    let session_id = draft_session(&h.games).await;
    let table = seated_table(&h.games, session_id, player_ids::<4>()).await;

    let explicit = HandSpec {
        hand_number: Some(7),
        ..hand(20, 0)
    };
    h.games
        .add_hand(table.table.id, explicit.clone())
        .await
        .unwrap();
    let duplicate = h.games.add_hand(table.table.id, explicit).await;
    assert!(matches!(
        duplicate,
        Err(GameError::Conflict(ConflictKind::DuplicateHandNumber))
    ));

    let next = h.games.add_hand(table.table.id, hand(0, 10)).await.unwrap();
    assert_eq!(next.hand_number, 8);

    let both_scored = h.games.add_hand(table.table.id, hand(10, 10)).await;
    assert!(matches!(both_scored, Err(GameError::BadRequest(_))));

    h.games.delete_session(session_id).await.unwrap();
}

#[tokio::test]
async fn test_racing_explicit_hand_numbers_have_single_winner() {
    let h = harness!();
    let session_id = draft_session(&h.games).await;
    let table = seated_table(&h.games, session_id, player_ids::<4>()).await;

    let handles: Vec<_> = (0..2)
        .map(|i| {
            let games = h.games.clone();
            let table_id = table.table.id;
            let spec = HandSpec {
                hand_number: Some(3),
                ..hand(10 * (i + 1), 0)
            };
            tokio::spawn(async move { games.add_hand(table_id, spec).await })
        })
        .collect();

    let mut successes = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(added) => {
                assert_eq!(added.hand_number, 3);
                successes += 1;
            }
            Err(GameError::Conflict(ConflictKind::DuplicateHandNumber)) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!((successes, conflicts), (1, 1));

    let detail = h.games.get_table(table.table.id).await.unwrap();
    assert_eq!(detail.hands.len(), 1);

    h.games.delete_session(session_id).await.unwrap();
}

#[tokio::test]
async fn test_hand_duration_and_partial_update() {
    let h = harness!();
    let session_id = draft_session(&h.games).await;
    let table = seated_table(&h.games, session_id, player_ids::<4>()).await;

    let added = h
        .games
        .add_hand(
            table.table.id,
            HandSpec {
                start_time: Some(at(21, 0)),
                end_time: Some(at(21, 10)),
                ..hand(35, 0)
            },
        )
        .await
        .unwrap();
    assert_eq!(added.duration, Some(600));
    assert!(added.partida_id.is_some());

    let updated = h
        .games
        .update_hand(
            added.id,
            HandPatch {
                pair_1_score: Some(0),
                pair_2_score: Some(50),
                end_time: Some(at(21, 15)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.pair_1_score, 0);
    assert_eq!(updated.pair_2_score, 50);
    assert_eq!(updated.hand_number, added.hand_number);
    assert_eq!(updated.duration, Some(900));

    let invalid = h
        .games
        .update_hand(
            added.id,
            HandPatch {
                pair_1_score: Some(5),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(invalid, Err(GameError::BadRequest(_))));

    // Cached pair scores are not recomputed from hands
    let detail = h.games.get_table(table.table.id).await.unwrap();
    assert!(detail.pairs.iter().all(|p| p.score == 0));

    let missing = h.games.update_hand(i64::MAX, HandPatch::default()).await;
    assert!(matches!(missing, Err(GameError::NotFound { .. })));

    h.games.delete_session(session_id).await.unwrap();
}

#[tokio::test]
async fn test_finalize_closes_partida_and_snapshots() {
    let h = harness!();
    let session_id = draft_session(&h.games).await;
    let players = player_ids::<4>();
    let table = seated_table(&h.games, session_id, players).await;
    let table_id = table.table.id;

    h.games.add_hand(table_id, hand(60, 0)).await.unwrap();
    h.games.add_hand(table_id, hand(0, 25)).await.unwrap();
    h.games.add_hand(table_id, hand(45, 0)).await.unwrap();

    let outcome = h.games.finalize_table(table_id, 1, 0).await.unwrap();
    assert!(outcome.table.finished);
    assert!(outcome.table.finished_at.is_some());
    assert_eq!(outcome.table.games_won_pair1, 1);
    assert_eq!(outcome.table.games_won_pair2, 0);
    assert!(outcome.partida_closed);
    assert_eq!(outcome.winner_pair_index, Some(1));

    let partidas = h.games.list_partidas(table_id).await.unwrap();
    assert_eq!(partidas.len(), 1);
    assert!(!partidas[0].is_open());
    assert_eq!(partidas[0].winner_pair_index, Some(1));

    let snapshots = h.games.list_snapshots(table_id).await.unwrap();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0].pair_index, 1);
    assert_eq!(snapshots[0].points, 105);
    assert!(snapshots[0].won);
    assert_eq!(snapshots[0].player_1_id, Some(players[0]));
    assert_eq!(snapshots[1].points, 25);
    assert!(!snapshots[1].won);
    assert_eq!(snapshots[1].player_2_id, Some(players[3]));

    // The next hand starts a fresh partida
    let next = h.games.add_hand(table_id, hand(10, 0)).await.unwrap();
    let partidas = h.games.list_partidas(table_id).await.unwrap();
    assert_eq!(partidas.len(), 2);
    assert_eq!(partidas[1].partida_index, 2);
    assert_eq!(next.partida_id, Some(partidas[1].id));

    h.games.delete_session(session_id).await.unwrap();
}

#[tokio::test]
async fn test_finalize_tie_and_without_open_partida() {
    let h = harness!();
    let session_id = draft_session(&h.games).await;
    let table = seated_table(&h.games, session_id, player_ids::<4>()).await;

    let outcome = h.games.finalize_table(table.table.id, 0, 0).await.unwrap();
    assert!(!outcome.partida_closed);
    assert_eq!(outcome.winner_pair_index, None);
    assert!(outcome.table.finished);

    let negative = h.games.finalize_table(table.table.id, -1, 0).await;
    assert!(matches!(negative, Err(GameError::BadRequest(_))));

    h.games.finalize_table(table.table.id, 1, 0).await.unwrap();
    let overflow = h.games.finalize_table(table.table.id, i32::MAX, 0).await;
    assert!(matches!(overflow, Err(GameError::BadRequest(_))));

    let missing = h.games.finalize_table(i64::MAX, 1, 0).await;
    assert!(matches!(missing, Err(GameError::NotFound { .. })));

    h.games.delete_session(session_id).await.unwrap();
}

// ============================================================================
// Deletes
// ============================================================================

#[tokio::test]
async fn test_cancel_table_removes_everything() {
    let h = harness!();
    let session_id = draft_session(&h.games).await;
    let table = seated_table(&h.games, session_id, player_ids::<4>()).await;
    let table_id = table.table.id;

    h.games.add_hand(table_id, hand(20, 0)).await.unwrap();
    h.games.add_hand(table_id, hand(0, 15)).await.unwrap();

    h.games.cancel_table(table_id).await.unwrap();

    assert!(matches!(
        h.games.get_table(table_id).await,
        Err(GameError::NotFound { .. })
    ));
    for sql in [
        "SELECT COUNT(*) FROM game_hands WHERE table_id = $1",
        "SELECT COUNT(*) FROM game_partidas WHERE table_id = $1",
        "SELECT COUNT(*) FROM game_partida_snapshots WHERE table_id = $1",
        "SELECT COUNT(*) FROM game_pairs WHERE table_id = $1",
    ] {
        assert_eq!(count(&h.pool, sql, table_id).await, 0, "{sql}");
    }
    let seats: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM game_pair_players WHERE pair_id = ANY($1)",
    )
    .bind(table.pairs.iter().map(|p| p.id).collect::<Vec<_>>())
    .fetch_one(h.pool.as_ref())
    .await
    .unwrap();
    assert_eq!(seats, 0);

    h.games.delete_session(session_id).await.unwrap();
}

#[tokio::test]
async fn test_cancel_table_with_progress_conflicts() {
    let h = harness!();
    let session_id = draft_session(&h.games).await;
    let table = seated_table(&h.games, session_id, player_ids::<4>()).await;

    h.games
        .update_pair_scores(
            table.table.id,
            PairScores {
                pair1_id: table.pairs[0].id,
                pair2_id: table.pairs[1].id,
                pair2_won_delta: 1,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let cancelled = h.games.cancel_table(table.table.id).await;
    assert!(matches!(
        cancelled,
        Err(GameError::Conflict(ConflictKind::TableInProgress))
    ));
    assert!(h.games.get_table(table.table.id).await.is_ok());

    h.games.delete_session(session_id).await.unwrap();
}

#[tokio::test]
async fn test_delete_session_cascade() {
    let h = harness!();
    let session_id = draft_session(&h.games).await;
    let players = player_ids::<4>();
    let table = seated_table(&h.games, session_id, players).await;
    h.games.add_hand(table.table.id, hand(30, 0)).await.unwrap();
    h.games.finalize_table(table.table.id, 1, 0).await.unwrap();
    h.attendance
        .check_in(session_id, players[0], Some(at(20, 0)))
        .await
        .unwrap();
    h.games
        .add_anecdote(
            session_id,
            AnecdoteSpec {
                player_id: Some(players[1]),
                body: "Capicúa on the last tile".to_string(),
            },
        )
        .await
        .unwrap();

    h.games.delete_session(session_id).await.unwrap();

    assert!(matches!(
        h.games.get_session(session_id).await,
        Err(GameError::NotFound { .. })
    ));
    for sql in [
        "SELECT COUNT(*) FROM game_tables WHERE session_id = $1",
        "SELECT COUNT(*) FROM game_partidas WHERE session_id = $1",
        "SELECT COUNT(*) FROM game_partida_snapshots WHERE session_id = $1",
        "SELECT COUNT(*) FROM game_attendance WHERE session_id = $1",
        "SELECT COUNT(*) FROM game_anecdotes WHERE session_id = $1",
    ] {
        assert_eq!(count(&h.pool, sql, session_id).await, 0, "{sql}");
    }

    assert!(matches!(
        h.games.delete_session(session_id).await,
        Err(GameError::NotFound { .. })
    ));
}

// ============================================================================
// Replace-by-diff sync
// ============================================================================

fn table_payload(id: EntityRef, table_number: i32, players: [i64; 4]) -> TablePayload {
    TablePayload {
        id,
        table_number,
        target_score: None,
        finished: false,
        games_won_pair1: 0,
        games_won_pair2: 0,
        pairs: vec![
            PairPayload {
                id: EntityRef::Temporary(format!("p1-{table_number}")),
                pair_index: 1,
                score: 0,
                players: [Some(players[0]), Some(players[1])],
            },
            PairPayload {
                id: EntityRef::Temporary(format!("p2-{table_number}")),
                pair_index: 2,
                score: 0,
                players: [Some(players[2]), Some(players[3])],
            },
        ],
        hands: vec![],
    }
}

#[tokio::test]
async fn test_upsert_replaces_nested_collections_by_diff() {
    let h = harness!();
    let players = player_ids::<8>();

    let session_id = h
        .games
        .upsert_session(SessionPayload {
            date: Some(at(9, 0)),
            status: Some(SessionStatus::Draft),
            tables: Some(vec![
                table_payload(EntityRef::Temporary("t1".into()), 1, [players[0], players[1], players[2], players[3]]),
                table_payload(EntityRef::Temporary("t2".into()), 2, [players[4], players[5], players[6], players[7]]),
            ]),
            anecdotes: Some(vec![AnecdotePayload {
                id: EntityRef::Temporary("a1".into()),
                player_id: None,
                body: "first".to_string(),
            }]),
            ..Default::default()
        })
        .await
        .unwrap();

    let detail = h.games.get_session_detail(session_id).await.unwrap();
    assert_eq!(detail.tables.len(), 2);
    assert_eq!(detail.anecdotes.len(), 1);
    let kept = &detail.tables[0];
    assert_eq!(kept.pairs[1].players, [Some(players[2]), Some(players[3])]);

    // Keep table 1 (renumbered, with its stored pairs), drop table 2
    let mut kept_payload = table_payload(EntityRef::Persisted(kept.table.id), 5, [players[0], players[2], players[1], players[3]]);
    kept_payload.pairs[0].id = EntityRef::Persisted(kept.pairs[0].id);
    kept_payload.pairs[1].id = EntityRef::Persisted(kept.pairs[1].id);
    h.games
        .upsert_session(SessionPayload {
            id: Some(session_id),
            tables: Some(vec![kept_payload]),
            ..Default::default()
        })
        .await
        .unwrap();

    let detail = h.games.get_session_detail(session_id).await.unwrap();
    assert_eq!(detail.tables.len(), 1);
    assert_eq!(detail.tables[0].table.id, kept.table.id);
    assert_eq!(detail.tables[0].table.table_number, 5);
    assert_eq!(detail.tables[0].pairs[0].id, kept.pairs[0].id);
    assert_eq!(detail.tables[0].pairs[0].players, [Some(players[0]), Some(players[2])]);
    // Anecdotes were not in the payload and stay untouched
    assert_eq!(detail.anecdotes.len(), 1);

    // A persisted id from elsewhere is rejected and nothing changes
    let foreign = h
        .games
        .upsert_session(SessionPayload {
            id: Some(session_id),
            anecdotes: Some(vec![AnecdotePayload {
                id: EntityRef::Persisted(i64::MAX),
                player_id: None,
                body: "ghost".to_string(),
            }]),
            tables: Some(vec![]),
            ..Default::default()
        })
        .await;
    assert!(matches!(foreign, Err(GameError::NotFound { .. })));
    assert_eq!(
        h.games.get_session_detail(session_id).await.unwrap().tables.len(),
        1
    );

    // Empty collections delete everything
    h.games
        .upsert_session(SessionPayload {
            id: Some(session_id),
            tables: Some(vec![]),
            anecdotes: Some(vec![]),
            ..Default::default()
        })
        .await
        .unwrap();
    let detail = h.games.get_session_detail(session_id).await.unwrap();
    assert!(detail.tables.is_empty());
    assert!(detail.anecdotes.is_empty());

    h.games.delete_session(session_id).await.unwrap();
}

fn hand_payload(id: EntityRef, hand_number: i32, pair_1_score: i32) -> HandPayload {
    HandPayload {
        id,
        hand_number,
        pair_1_score,
        pair_2_score: 0,
        start_time: None,
        end_time: None,
        duration: None,
    }
}

/// Payload that mirrors a stored table, every nested row by its id
fn stored_payload(table: &TableDetail) -> TablePayload {
    TablePayload {
        id: EntityRef::Persisted(table.table.id),
        table_number: table.table.table_number,
        target_score: Some(table.table.target_score),
        finished: table.table.finished,
        games_won_pair1: table.table.games_won_pair1,
        games_won_pair2: table.table.games_won_pair2,
        pairs: table
            .pairs
            .iter()
            .map(|p| PairPayload {
                id: EntityRef::Persisted(p.id),
                pair_index: p.pair_index,
                score: p.score,
                players: p.players,
            })
            .collect(),
        hands: table
            .hands
            .iter()
            .map(|h| HandPayload {
                id: EntityRef::Persisted(h.id),
                hand_number: h.hand_number,
                pair_1_score: h.pair_1_score,
                pair_2_score: h.pair_2_score,
                start_time: h.start_time,
                end_time: h.end_time,
                duration: h.duration,
            })
            .collect(),
    }
}

async fn sync_tables(
    games: &game_night::GameManager,
    session_id: i64,
    tables: Vec<TablePayload>,
) -> Result<i64, GameError> {
    games
        .upsert_session(SessionPayload {
            id: Some(session_id),
            tables: Some(tables),
            ..Default::default()
        })
        .await
}

#[tokio::test]
async fn test_upsert_requires_both_pairs() {
    let h = harness!();
    let session_id = draft_session(&h.games).await;
    let table = seated_table(&h.games, session_id, player_ids::<4>()).await;

    let mut one_pair = stored_payload(&table);
    one_pair.pairs.truncate(1);
    let result = sync_tables(&h.games, session_id, vec![one_pair]).await;
    assert!(matches!(result, Err(GameError::BadRequest(_))));

    let mut fresh = table_payload(EntityRef::Temporary("t9".into()), 9, [1, 2, 3, 4]);
    fresh.pairs.clear();
    let result = sync_tables(&h.games, session_id, vec![stored_payload(&table), fresh]).await;
    assert!(matches!(result, Err(GameError::BadRequest(_))));

    let detail = h.games.get_session_detail(session_id).await.unwrap();
    assert_eq!(detail.tables.len(), 1);
    assert_eq!(detail.tables[0].pairs.len(), 2);

    h.games.delete_session(session_id).await.unwrap();
}

#[tokio::test]
async fn test_upsert_swaps_numbers_between_stored_rows() {
    let h = harness!();
    let session_id = draft_session(&h.games).await;
    let first = seated_table(&h.games, session_id, player_ids::<4>()).await;
    let second = seated_table(&h.games, session_id, player_ids::<4>()).await;
    h.games.add_hand(first.table.id, hand(10, 0)).await.unwrap();
    h.games.add_hand(first.table.id, hand(0, 20)).await.unwrap();
    let first = h.games.get_table(first.table.id).await.unwrap();

    let mut first_payload = stored_payload(&first);
    let mut second_payload = stored_payload(&second);
    first_payload.table_number = 2;
    second_payload.table_number = 1;
    first_payload.hands[0].hand_number = 2;
    first_payload.hands[1].hand_number = 1;
    first_payload.pairs[0].pair_index = 2;
    first_payload.pairs[1].pair_index = 1;

    sync_tables(&h.games, session_id, vec![first_payload, second_payload])
        .await
        .unwrap();

    let swapped = h.games.get_table(first.table.id).await.unwrap();
    assert_eq!(swapped.table.table_number, 2);
    assert_eq!(
        h.games.get_table(second.table.id).await.unwrap().table.table_number,
        1
    );
    // Hands come back ordered by number
    assert_eq!(swapped.hands[0].id, first.hands[1].id);
    assert_eq!(swapped.hands[1].id, first.hands[0].id);
    assert_eq!(swapped.pairs[0].id, first.pairs[1].id);

    // A real duplicate is still refused once the transaction commits
    let mut clash = stored_payload(&swapped);
    clash.table_number = 1;
    let result = sync_tables(
        &h.games,
        session_id,
        vec![clash, stored_payload(&h.games.get_table(second.table.id).await.unwrap())],
    )
    .await;
    assert!(matches!(
        result,
        Err(GameError::Conflict(ConflictKind::DuplicateTableNumber))
    ));
    assert_eq!(
        h.games.get_table(first.table.id).await.unwrap().table.table_number,
        2
    );

    h.games.delete_session(session_id).await.unwrap();
}

#[tokio::test]
async fn test_upsert_finishing_table_closes_its_partida() {
    let h = harness!();
    let session_id = draft_session(&h.games).await;
    let players = player_ids::<4>();
    let table = seated_table(&h.games, session_id, players).await;
    h.games.add_hand(table.table.id, hand(70, 0)).await.unwrap();
    let table = h.games.get_table(table.table.id).await.unwrap();

    let mut finishing = stored_payload(&table);
    finishing.finished = true;
    finishing.games_won_pair1 = 1;
    finishing
        .hands
        .push(hand_payload(EntityRef::Temporary("last".into()), 2, 40));
    sync_tables(&h.games, session_id, vec![finishing]).await.unwrap();

    let partidas = h.games.list_partidas(table.table.id).await.unwrap();
    assert_eq!(partidas.len(), 1);
    assert!(!partidas[0].is_open());
    assert_eq!(partidas[0].winner_pair_index, Some(1));

    let snapshots = h.games.list_snapshots(table.table.id).await.unwrap();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0].points, 110);
    assert!(snapshots[0].won);
    assert_eq!(snapshots[0].player_1_id, Some(players[0]));

    let detail = h.games.get_table(table.table.id).await.unwrap();
    assert!(detail.table.finished_at.is_some());
    assert!(detail.hands.iter().all(|h| h.partida_id == Some(partidas[0].id)));

    // Later hands open a new round instead of joining the closed one
    let next = h.games.add_hand(table.table.id, hand(5, 0)).await.unwrap();
    let partidas = h.games.list_partidas(table.table.id).await.unwrap();
    assert_eq!(partidas.len(), 2);
    assert_eq!(next.partida_id, Some(partidas[1].id));

    h.games.delete_session(session_id).await.unwrap();
}

#[tokio::test]
async fn test_unchanged_rows_keep_their_timestamps() {
    let h = harness!();
    let session_id = draft_session(&h.games).await;
    let table = seated_table(&h.games, session_id, player_ids::<4>()).await;
    h.games.add_hand(table.table.id, hand(15, 0)).await.unwrap();
    let before = h.games.get_table(table.table.id).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    sync_tables(&h.games, session_id, vec![stored_payload(&before)])
        .await
        .unwrap();

    let after = h.games.get_table(table.table.id).await.unwrap();
    assert_eq!(after.table.updated_at, before.table.updated_at);
    assert_eq!(after.hands[0].updated_at, before.hands[0].updated_at);

    // An edited hand is touched, its neighbours are not
    let mut edited = stored_payload(&before);
    edited.hands[0].pair_1_score = 25;
    sync_tables(&h.games, session_id, vec![edited]).await.unwrap();
    let after = h.games.get_table(table.table.id).await.unwrap();
    assert!(after.hands[0].updated_at > before.hands[0].updated_at);
    assert_eq!(after.table.updated_at, before.table.updated_at);

    h.games.delete_session(session_id).await.unwrap();
}

// ============================================================================
// Anecdotes and notifications
// ============================================================================

#[tokio::test]
async fn test_anecdote_lifecycle() {
    let h = harness!();
    let session_id = draft_session(&h.games).await;

    let created = h
        .games
        .add_anecdote(
            session_id,
            AnecdoteSpec {
                player_id: None,
                body: "  Six-double on the first hand  ".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(created.body, "Six-double on the first hand");

    let updated = h
        .games
        .update_anecdote(
            created.id,
            AnecdoteSpec {
                player_id: Some(12),
                body: "Double six on the first hand".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.player_id, Some(12));

    let empty = h
        .games
        .add_anecdote(session_id, AnecdoteSpec::default())
        .await;
    assert!(matches!(empty, Err(GameError::BadRequest(_))));

    h.games.delete_anecdote(created.id).await.unwrap();
    assert!(matches!(
        h.games.delete_anecdote(created.id).await,
        Err(GameError::NotFound { .. })
    ));

    h.games.delete_session(session_id).await.unwrap();
}

#[tokio::test]
async fn test_mutations_publish_after_commit() {
    let h = harness!();
    let session_id = draft_session(&h.games).await;
    let (tx, mut rx) = mpsc::channel(16);
    h.events.subscribe(session_id, tx).await;

    let next_type = |frame: String| -> String {
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["sessionId"], session_id);
        value["type"].as_str().unwrap().to_string()
    };

    assert_eq!(next_type(rx.recv().await.unwrap()), "READY");

    let table = seated_table(&h.games, session_id, player_ids::<4>()).await;
    assert_eq!(next_type(rx.recv().await.unwrap()), "TABLE_CREATED");

    h.games.add_hand(table.table.id, hand(15, 0)).await.unwrap();
    assert_eq!(next_type(rx.recv().await.unwrap()), "HAND_ADDED");

    h.games.finalize_table(table.table.id, 1, 0).await.unwrap();
    assert_eq!(next_type(rx.recv().await.unwrap()), "TABLE_FINALIZED");

    // A failed mutation publishes nothing
    let _ = h.games.cancel_table(table.table.id).await;
    assert!(rx.try_recv().is_err());

    h.games.delete_session(session_id).await.unwrap();
    assert_eq!(next_type(rx.recv().await.unwrap()), "SESSION_DELETED");
}
