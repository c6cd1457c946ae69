//! Replace-by-diff synchronization of nested session collections.
//!
//! Every element of a collection names itself with an [`EntityRef`]: stored
//! ids are updated, temporary ids are inserted, and stored rows under the same
//! parent that the payload no longer lists are deleted.
#![allow(clippy::needless_raw_string_hashes)]

use chrono::{DateTime, Utc};
use sqlx::{Postgres, Row, Transaction};
use std::collections::HashSet;

use super::{
    MIN_TARGET_SCORE, SessionId, TableId, cascade,
    models::{
        AnecdotePayload, EntityRef, HandPayload, PairPayload, TablePayload, hand_duration_secs,
        validate_hand_scores, validate_pair_indexes,
    },
};
use crate::{
    errors::{Entity, GameError, GameResult},
    partida::{PartidaManager, winner_from_increments},
};

/// Stored ids that the incoming collection no longer mentions
///
/// # Errors
///
/// * `GameError::NotFound` - A persisted reference is not stored under this parent
/// * `GameError::BadRequest` - The same persisted id appears twice
pub(crate) fn stale_ids<'a>(
    entity: Entity,
    existing: &[i64],
    incoming: impl IntoIterator<Item = &'a EntityRef>,
) -> GameResult<Vec<i64>> {
    let mut kept = HashSet::new();
    for id in incoming.into_iter().filter_map(EntityRef::persisted_id) {
        if !existing.contains(&id) {
            return Err(GameError::not_found(entity, id));
        }
        if !kept.insert(id) {
            return Err(GameError::bad_request(format!(
                "{entity} {id} listed more than once"
            )));
        }
    }

    Ok(existing
        .iter()
        .copied()
        .filter(|id| !kept.contains(id))
        .collect())
}

async fn child_ids(
    tx: &mut Transaction<'_, Postgres>,
    sql: &str,
    parent_id: i64,
) -> GameResult<Vec<i64>> {
    let rows = sqlx::query(sql)
        .bind(parent_id)
        .fetch_all(&mut **tx)
        .await?;
    Ok(rows.iter().map(|row| row.get::<i64, _>("id")).collect())
}

/// Synchronize the tables of a session, including their pairs and hands
///
/// Numbers may be swapped between stored rows in one payload, so the
/// per-table and per-session number constraints are checked at commit.
/// A stored table that turns finished closes its open partida and records
/// its snapshots, after the payload's hands have joined that round.
pub(crate) async fn sync_tables(
    tx: &mut Transaction<'_, Postgres>,
    session_id: SessionId,
    tables: &[TablePayload],
) -> GameResult<()> {
    for table in tables {
        if table.target_score.unwrap_or(MIN_TARGET_SCORE) < MIN_TARGET_SCORE {
            return Err(GameError::bad_request(format!(
                "target score must be at least {MIN_TARGET_SCORE}"
            )));
        }
        validate_pair_indexes(&table.pairs)?;
        for hand in &table.hands {
            validate_hand_scores(hand.pair_1_score, hand.pair_2_score)?;
        }
    }

    sqlx::query(
        r#"
        SET CONSTRAINTS game_tables_session_table_number_key,
                        game_pairs_table_pair_index_key,
                        game_hands_table_hand_number_key
        DEFERRED
        "#,
    )
    .execute(&mut **tx)
    .await?;

    let stored = sqlx::query(
        r#"
        SELECT id, finished, games_won_pair1, games_won_pair2
        FROM game_tables
        WHERE session_id = $1
        ORDER BY id
        FOR UPDATE
        "#,
    )
    .bind(session_id)
    .fetch_all(&mut **tx)
    .await?;
    let existing: Vec<i64> = stored.iter().map(|row| row.get("id")).collect();

    for stale in stale_ids(Entity::Table, &existing, tables.iter().map(|t| &t.id))? {
        cascade::delete_table(tx, stale).await?;
    }

    for table in tables {
        let target_score = table.target_score.unwrap_or(MIN_TARGET_SCORE);

        let (table_id, finishing) = match &table.id {
            EntityRef::Persisted(id) => {
                let previous = stored
                    .iter()
                    .find(|row| row.get::<i64, _>("id") == *id)
                    .ok_or(GameError::not_found(Entity::Table, *id))?;
                let was_finished: bool = previous.get("finished");

                let updated = sqlx::query(
                    r#"
                    UPDATE game_tables
                    SET table_number = $2,
                        target_score = $3,
                        finished = $4,
                        finished_at = CASE
                            WHEN $4 AND finished_at IS NULL THEN NOW()
                            WHEN NOT $4 THEN NULL
                            ELSE finished_at
                        END,
                        games_won_pair1 = $5,
                        games_won_pair2 = $6,
                        updated_at = NOW()
                    WHERE id = $1
                      AND (table_number, target_score, finished, games_won_pair1, games_won_pair2)
                          IS DISTINCT FROM ($2::INTEGER, $3::INTEGER, $4::BOOLEAN, $5::INTEGER, $6::INTEGER)
                    RETURNING finished_at
                    "#,
                )
                .bind(id)
                .bind(table.table_number)
                .bind(target_score)
                .bind(table.finished)
                .bind(table.games_won_pair1)
                .bind(table.games_won_pair2)
                .fetch_optional(&mut **tx)
                .await?;

                let finishing = (!was_finished && table.finished).then(|| RoundClose {
                    finished_at: updated
                        .and_then(|row| row.get::<Option<DateTime<Utc>>, _>("finished_at"))
                        .unwrap_or_else(Utc::now),
                    winner_pair_index: winner_from_increments(
                        table.games_won_pair1 - previous.get::<i32, _>("games_won_pair1"),
                        table.games_won_pair2 - previous.get::<i32, _>("games_won_pair2"),
                    ),
                });
                (*id, finishing)
            }
            EntityRef::Temporary(tag) => {
                let row = sqlx::query(
                    r#"
                    INSERT INTO game_tables
                        (session_id, table_number, target_score, finished, finished_at,
                         games_won_pair1, games_won_pair2)
                    VALUES ($1, $2, $3, $4, CASE WHEN $4 THEN NOW() END, $5, $6)
                    RETURNING id
                    "#,
                )
                .bind(session_id)
                .bind(table.table_number)
                .bind(target_score)
                .bind(table.finished)
                .bind(table.games_won_pair1)
                .bind(table.games_won_pair2)
                .fetch_one(&mut **tx)
                .await?;
                let id: i64 = row.get("id");
                log::debug!("Inserted table {} for temporary id {}", id, tag);
                (id, None)
            }
        };

        // Hands on a table that was already finished stay outside any round
        let joins_rounds = !table.finished || finishing.is_some();

        sync_pairs(tx, table_id, &table.pairs).await?;
        sync_hands(tx, table_id, joins_rounds, &table.hands).await?;

        if let Some(close) = finishing {
            let closed = PartidaManager::close(
                tx,
                table_id,
                close.finished_at,
                close.winner_pair_index,
            )
            .await?;
            if let Some(partida) = &closed {
                PartidaManager::record_snapshots(tx, partida).await?;
                log::info!(
                    "Partida {} at table {} closed by sync",
                    partida.partida_index,
                    table_id
                );
            }
        }
    }

    Ok(())
}

/// Round closing owed by a table that turned finished
struct RoundClose {
    finished_at: DateTime<Utc>,
    winner_pair_index: Option<i16>,
}

async fn sync_pairs(
    tx: &mut Transaction<'_, Postgres>,
    table_id: TableId,
    pairs: &[PairPayload],
) -> GameResult<()> {
    let existing = child_ids(
        tx,
        "SELECT id FROM game_pairs WHERE table_id = $1 ORDER BY id FOR UPDATE",
        table_id,
    )
    .await?;

    for stale in stale_ids(Entity::Pair, &existing, pairs.iter().map(|p| &p.id))? {
        cascade::delete_pair(tx, stale).await?;
    }

    for pair in pairs {
        let pair_id: i64 = match &pair.id {
            EntityRef::Persisted(id) => {
                sqlx::query(
                    r#"
                    UPDATE game_pairs SET pair_index = $2, score = $3, updated_at = NOW()
                    WHERE id = $1 AND (pair_index, score) IS DISTINCT FROM ($2::SMALLINT, $3::INTEGER)
                    "#,
                )
                .bind(id)
                .bind(pair.pair_index)
                .bind(pair.score)
                .execute(&mut **tx)
                .await?;
                *id
            }
            EntityRef::Temporary(_) => sqlx::query(
                "INSERT INTO game_pairs (table_id, pair_index, score) VALUES ($1, $2, $3) RETURNING id",
            )
            .bind(table_id)
            .bind(pair.pair_index)
            .bind(pair.score)
            .fetch_one(&mut **tx)
            .await?
            .get("id"),
        };

        sqlx::query("DELETE FROM game_pair_players WHERE pair_id = $1")
            .bind(pair_id)
            .execute(&mut **tx)
            .await?;

        for (slot, player_id) in (1i16..).zip(pair.players) {
            if let Some(player_id) = player_id {
                sqlx::query(
                    "INSERT INTO game_pair_players (pair_id, slot, player_id) VALUES ($1, $2, $3)",
                )
                .bind(pair_id)
                .bind(slot)
                .bind(player_id)
                .execute(&mut **tx)
                .await?;
            }
        }
    }

    Ok(())
}

async fn sync_hands(
    tx: &mut Transaction<'_, Postgres>,
    table_id: TableId,
    joins_rounds: bool,
    hands: &[HandPayload],
) -> GameResult<()> {
    let existing = child_ids(
        tx,
        "SELECT id FROM game_hands WHERE table_id = $1 ORDER BY id FOR UPDATE",
        table_id,
    )
    .await?;

    let stale = stale_ids(Entity::Hand, &existing, hands.iter().map(|h| &h.id))?;
    if !stale.is_empty() {
        sqlx::query("DELETE FROM game_hands WHERE id = ANY($1)")
            .bind(&stale)
            .execute(&mut **tx)
            .await?;
    }

    for hand in hands {
        let duration = hand
            .duration
            .or_else(|| hand_duration_secs(hand.start_time, hand.end_time));

        match &hand.id {
            EntityRef::Persisted(id) => {
                sqlx::query(
                    r#"
                    UPDATE game_hands
                    SET hand_number = $2, pair_1_score = $3, pair_2_score = $4,
                        start_time = $5, end_time = $6, duration = $7, updated_at = NOW()
                    WHERE id = $1
                      AND (hand_number, pair_1_score, pair_2_score, start_time, end_time, duration)
                          IS DISTINCT FROM
                          ($2::INTEGER, $3::INTEGER, $4::INTEGER, $5::TIMESTAMPTZ, $6::TIMESTAMPTZ, $7::INTEGER)
                    "#,
                )
                .bind(id)
                .bind(hand.hand_number)
                .bind(hand.pair_1_score)
                .bind(hand.pair_2_score)
                .bind(hand.start_time)
                .bind(hand.end_time)
                .bind(duration)
                .execute(&mut **tx)
                .await?;
            }
            EntityRef::Temporary(_) => {
                let partida_id = if joins_rounds {
                    Some(PartidaManager::get_or_open(tx, table_id).await?.id)
                } else {
                    None
                };

                sqlx::query(
                    r#"
                    INSERT INTO game_hands
                        (table_id, partida_id, hand_number, pair_1_score, pair_2_score,
                         start_time, end_time, duration)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    "#,
                )
                .bind(table_id)
                .bind(partida_id)
                .bind(hand.hand_number)
                .bind(hand.pair_1_score)
                .bind(hand.pair_2_score)
                .bind(hand.start_time)
                .bind(hand.end_time)
                .bind(duration)
                .execute(&mut **tx)
                .await?;
            }
        }
    }

    Ok(())
}

/// Synchronize the anecdotes of a session
pub(crate) async fn sync_anecdotes(
    tx: &mut Transaction<'_, Postgres>,
    session_id: SessionId,
    anecdotes: &[AnecdotePayload],
) -> GameResult<()> {
    let existing = child_ids(
        tx,
        "SELECT id FROM game_anecdotes WHERE session_id = $1 ORDER BY id FOR UPDATE",
        session_id,
    )
    .await?;

    let stale = stale_ids(Entity::Anecdote, &existing, anecdotes.iter().map(|a| &a.id))?;
    if !stale.is_empty() {
        sqlx::query("DELETE FROM game_anecdotes WHERE id = ANY($1)")
            .bind(&stale)
            .execute(&mut **tx)
            .await?;
    }

    for anecdote in anecdotes {
        match &anecdote.id {
            EntityRef::Persisted(id) => {
                sqlx::query(
                    r#"
                    UPDATE game_anecdotes SET player_id = $2, body = $3, updated_at = NOW()
                    WHERE id = $1 AND (player_id, body) IS DISTINCT FROM ($2::BIGINT, $3::TEXT)
                    "#,
                )
                .bind(id)
                .bind(anecdote.player_id)
                .bind(&anecdote.body)
                .execute(&mut **tx)
                .await?;
            }
            EntityRef::Temporary(_) => {
                sqlx::query(
                    "INSERT INTO game_anecdotes (session_id, player_id, body) VALUES ($1, $2, $3)",
                )
                .bind(session_id)
                .bind(anecdote.player_id)
                .bind(&anecdote.body)
                .execute(&mut **tx)
                .await?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs(items: &[EntityRef]) -> impl Iterator<Item = &EntityRef> {
        items.iter()
    }

    #[test]
    fn test_stale_ids_keeps_listed_rows() {
        let incoming = vec![
            EntityRef::Persisted(2),
            EntityRef::Temporary("new-1".to_string()),
        ];

        let stale = stale_ids(Entity::Table, &[1, 2, 3], refs(&incoming)).unwrap();

        assert_eq!(stale, vec![1, 3]);
    }

    #[test]
    fn test_empty_collection_removes_everything() {
        let stale = stale_ids(Entity::Hand, &[4, 5], refs(&[])).unwrap();
        assert_eq!(stale, vec![4, 5]);
    }

    #[test]
    fn test_foreign_id_is_not_found() {
        let incoming = vec![EntityRef::Persisted(99)];

        let err = stale_ids(Entity::Pair, &[1, 2], refs(&incoming)).unwrap_err();

        assert!(matches!(
            err,
            GameError::NotFound {
                entity: Entity::Pair,
                id: 99
            }
        ));
    }

    #[test]
    fn test_duplicate_reference_rejected() {
        let incoming = vec![EntityRef::Persisted(1), EntityRef::Persisted(1)];

        let err = stale_ids(Entity::Anecdote, &[1], refs(&incoming)).unwrap_err();

        assert!(matches!(err, GameError::BadRequest(_)));
    }
}
