//! Game manager: transactional mutations of sessions, tables, pairs, hands
//! and anecdotes.
#![allow(clippy::needless_raw_string_hashes)]

use chrono::Utc;
use sqlx::{PgConnection, PgPool, Row};
use std::{collections::HashSet, sync::Arc};

use super::{
    cascade,
    models::{
        Anecdote, AnecdoteId, AnecdoteSpec, FinalizeOutcome, GameSession, GameTable, Hand, HandId,
        HandPatch, HandSpec, MIN_TARGET_SCORE, Pair, PairScores, SessionDetail, SessionId,
        SessionPayload, SessionStatus, TableDetail, TableId, TableSpec, apply_won_increments,
        hand_duration_secs, validate_hand_scores,
    },
    sync,
};
use crate::{
    attendance::AttendanceLedger,
    errors::{ConflictKind, Entity, GameError, GameResult},
    partida::{Partida, PartidaManager, PartidaSnapshot, winner_from_increments},
    realtime::{EventDistributor, EventKind},
};

const SESSION_COLUMNS: &str =
    "id, date, summary, location_name, location_address, status, closed_at, created_at, updated_at";

const TABLE_COLUMNS: &str = "id, session_id, table_number, target_score, finished, finished_at, \
     games_won_pair1, games_won_pair2, created_at, updated_at";

const HAND_COLUMNS: &str = "id, table_id, partida_id, hand_number, pair_1_score, pair_2_score, \
     start_time, end_time, duration, created_at, updated_at";

const ANECDOTE_COLUMNS: &str = "id, session_id, player_id, body, created_at, updated_at";

/// Game manager
#[derive(Clone)]
pub struct GameManager {
    pool: Arc<PgPool>,
    events: Arc<EventDistributor>,
}

impl GameManager {
    /// Create a new game manager
    ///
    /// # Arguments
    ///
    /// * `pool` - Database connection pool
    /// * `events` - Distributor notified after every committed mutation
    pub fn new(pool: Arc<PgPool>, events: Arc<EventDistributor>) -> Self {
        Self { pool, events }
    }

    /// Distributor this manager publishes to
    pub fn events(&self) -> &Arc<EventDistributor> {
        &self.events
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Create or update a session and synchronize its nested collections
    ///
    /// Fields left out of the payload keep their stored value. Finishing a
    /// session closes every forgotten check-out in the same transaction.
    ///
    /// # Returns
    ///
    /// * `GameResult<SessionId>` - ID of the written session
    ///
    /// # Errors
    ///
    /// * `GameError::NotFound` - Payload names a missing session or a foreign nested row
    /// * `GameError::Conflict(ActiveSession)` - Another session is already active
    /// * `GameError::BadRequest` - Invalid nested table, pair or hand
    pub async fn upsert_session(&self, payload: SessionPayload) -> GameResult<SessionId> {
        let mut tx = self.pool.begin().await?;

        let previous = match payload.id {
            Some(id) => Some(lock_session(&mut tx, id).await?),
            None => None,
        };
        let previous_status = previous.as_ref().map(|s| s.status);
        let status = payload
            .status
            .or(previous_status)
            .unwrap_or(SessionStatus::Draft);

        if status == SessionStatus::Active || previous_status == Some(SessionStatus::Active) {
            let others = sqlx::query(
                r#"
                SELECT id FROM game_sessions
                WHERE status = 'active' AND ($1::BIGINT IS NULL OR id <> $1)
                FOR UPDATE
                "#,
            )
            .bind(payload.id)
            .fetch_all(&mut *tx)
            .await?;

            if status == SessionStatus::Active && !others.is_empty() {
                return Err(GameError::Conflict(ConflictKind::ActiveSession));
            }
        }

        let now = Utc::now();
        let closed_at = if status.is_closed() {
            previous.as_ref().and_then(|s| s.closed_at).or(Some(now))
        } else {
            None
        };

        let row = match &previous {
            Some(current) => {
                sqlx::query(&format!(
                    "UPDATE game_sessions
                     SET date = $2, summary = $3, location_name = $4, location_address = $5,
                         status = $6, closed_at = $7, updated_at = NOW()
                     WHERE id = $1
                     RETURNING {SESSION_COLUMNS}"
                ))
                .bind(current.id)
                .bind(payload.date.unwrap_or(current.date))
                .bind(payload.summary.as_ref().or(current.summary.as_ref()))
                .bind(payload.location_name.as_ref().or(current.location_name.as_ref()))
                .bind(
                    payload
                        .location_address
                        .as_ref()
                        .or(current.location_address.as_ref()),
                )
                .bind(status.as_str())
                .bind(closed_at)
                .fetch_one(&mut *tx)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "INSERT INTO game_sessions
                         (date, summary, location_name, location_address, status, closed_at)
                     VALUES ($1, $2, $3, $4, $5, $6)
                     RETURNING {SESSION_COLUMNS}"
                ))
                .bind(payload.date.unwrap_or(now))
                .bind(&payload.summary)
                .bind(&payload.location_name)
                .bind(&payload.location_address)
                .bind(status.as_str())
                .bind(closed_at)
                .fetch_one(&mut *tx)
                .await?
            }
        };
        let session = GameSession::from_row(&row)?;

        if let Some(tables) = &payload.tables {
            sync::sync_tables(&mut tx, session.id, tables).await?;
        }
        if let Some(anecdotes) = &payload.anecdotes {
            sync::sync_anecdotes(&mut tx, session.id, anecdotes).await?;
        }

        // Check-outs are derived from the hands and seating written above
        if status == SessionStatus::Finished && previous_status != Some(SessionStatus::Finished) {
            AttendanceLedger::backfill_in_tx(&mut tx, session.id).await?;
        }

        tx.commit().await?;

        log::info!("Session {} saved with status {}", session.id, session.status);
        self.events
            .publish(session.id, EventKind::SessionUpdated, &session)
            .await;

        Ok(session.id)
    }

    /// Delete a session and everything recorded under it
    ///
    /// # Errors
    ///
    /// * `GameError::NotFound` - Session does not exist
    pub async fn delete_session(&self, session_id: SessionId) -> GameResult<()> {
        let mut tx = self.pool.begin().await?;

        lock_session(&mut tx, session_id).await?;
        cascade::delete_session(&mut tx, session_id).await?;

        tx.commit().await?;

        log::info!("Session {} deleted", session_id);
        self.events
            .publish(
                session_id,
                EventKind::SessionDeleted,
                &serde_json::json!({ "id": session_id }),
            )
            .await;

        Ok(())
    }

    // ========================================================================
    // Tables and pairs
    // ========================================================================

    /// Open a new table with its two pairs
    ///
    /// # Arguments
    ///
    /// * `session_id` - Session hosting the table
    /// * `spec` - Table number (next free when omitted), target score and seating
    ///
    /// # Errors
    ///
    /// * `GameError::NotFound` - Session does not exist
    /// * `GameError::Conflict(SessionClosed)` - Session is finished or cancelled
    /// * `GameError::Conflict(DuplicateTableNumber)` - Table number already used
    /// * `GameError::BadRequest` - Target score below minimum or a player seated twice
    pub async fn add_table(&self, session_id: SessionId, spec: TableSpec) -> GameResult<TableDetail> {
        let target_score = spec.target_score.unwrap_or(MIN_TARGET_SCORE);
        if target_score < MIN_TARGET_SCORE {
            return Err(GameError::bad_request(format!(
                "target score must be at least {MIN_TARGET_SCORE}"
            )));
        }

        let mut seated = HashSet::new();
        for player_id in spec.pairs.iter().flatten().flatten() {
            if !seated.insert(*player_id) {
                return Err(GameError::bad_request(format!(
                    "player {player_id} is seated twice"
                )));
            }
        }

        let mut tx = self.pool.begin().await?;

        let session = lock_session(&mut tx, session_id).await?;
        if session.status.is_closed() {
            return Err(GameError::Conflict(ConflictKind::SessionClosed));
        }

        let table_number = match spec.table_number {
            Some(number) => number,
            None => sqlx::query(
                "SELECT COALESCE(MAX(table_number), 0) + 1 AS next FROM game_tables WHERE session_id = $1",
            )
            .bind(session_id)
            .fetch_one(&mut *tx)
            .await?
            .get("next"),
        };

        let row = sqlx::query(&format!(
            "INSERT INTO game_tables (session_id, table_number, target_score)
             VALUES ($1, $2, $3)
             RETURNING {TABLE_COLUMNS}"
        ))
        .bind(session_id)
        .bind(table_number)
        .bind(target_score)
        .fetch_one(&mut *tx)
        .await?;
        let table = GameTable::from_row(&row);

        for (pair_index, seats) in (1i16..).zip(spec.pairs) {
            let pair_id: i64 = sqlx::query(
                "INSERT INTO game_pairs (table_id, pair_index) VALUES ($1, $2) RETURNING id",
            )
            .bind(table.id)
            .bind(pair_index)
            .fetch_one(&mut *tx)
            .await?
            .get("id");

            for (slot, player_id) in (1i16..).zip(seats) {
                if let Some(player_id) = player_id {
                    sqlx::query(
                        "INSERT INTO game_pair_players (pair_id, slot, player_id) VALUES ($1, $2, $3)",
                    )
                    .bind(pair_id)
                    .bind(slot)
                    .bind(player_id)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        let detail = load_table_detail(&mut tx, table).await?;
        tx.commit().await?;

        log::info!(
            "Table {} (number {}) created in session {}",
            detail.table.id,
            detail.table.table_number,
            session_id
        );
        self.events
            .publish(session_id, EventKind::TableCreated, &detail)
            .await;

        Ok(detail)
    }

    /// Write both pair scores of a table and apply won-counter deltas
    ///
    /// Each pair's delta goes to the counter of that pair's index.
    ///
    /// # Errors
    ///
    /// * `GameError::NotFound` - Table does not exist
    /// * `GameError::BadRequest` - Same pair twice, pair from another table, or a
    ///   counter that would go negative or overflow
    pub async fn update_pair_scores(
        &self,
        table_id: TableId,
        scores: PairScores,
    ) -> GameResult<TableDetail> {
        if scores.pair1_id == scores.pair2_id {
            return Err(GameError::bad_request("the two pairs must differ"));
        }

        let mut tx = self.pool.begin().await?;

        let table = lock_table(&mut tx, table_id).await?;

        let pairs = sqlx::query(
            "SELECT id, pair_index FROM game_pairs WHERE table_id = $1 AND id = ANY($2) FOR UPDATE",
        )
        .bind(table_id)
        .bind(vec![scores.pair1_id, scores.pair2_id])
        .fetch_all(&mut *tx)
        .await?;

        let index_of = |pair_id: i64| {
            pairs
                .iter()
                .find(|row| row.get::<i64, _>("id") == pair_id)
                .map(|row| row.get::<i16, _>("pair_index"))
        };
        let (Some(index1), Some(index2)) = (index_of(scores.pair1_id), index_of(scores.pair2_id))
        else {
            return Err(GameError::bad_request(format!(
                "pairs {} and {} must both belong to table {}",
                scores.pair1_id, scores.pair2_id, table_id
            )));
        };

        let won = apply_won_increments(
            [table.games_won_pair1, table.games_won_pair2],
            [
                (index1, scores.pair1_won_delta),
                (index2, scores.pair2_won_delta),
            ],
        )?;

        for (pair_id, score) in [
            (scores.pair1_id, scores.pair1_score),
            (scores.pair2_id, scores.pair2_score),
        ] {
            sqlx::query("UPDATE game_pairs SET score = $2, updated_at = NOW() WHERE id = $1")
                .bind(pair_id)
                .bind(score)
                .execute(&mut *tx)
                .await?;
        }

        let row = sqlx::query(&format!(
            "UPDATE game_tables
             SET games_won_pair1 = $2, games_won_pair2 = $3, updated_at = NOW()
             WHERE id = $1
             RETURNING {TABLE_COLUMNS}"
        ))
        .bind(table_id)
        .bind(won[0])
        .bind(won[1])
        .fetch_one(&mut *tx)
        .await?;

        let detail = load_table_detail(&mut tx, GameTable::from_row(&row)).await?;
        tx.commit().await?;

        self.events
            .publish(detail.table.session_id, EventKind::PairScoresUpdated, &detail)
            .await;

        Ok(detail)
    }

    /// Finish a table, closing its open partida
    ///
    /// The increments are added to the won counters as given. The partida
    /// winner is the pair with the larger increment, none on a tie.
    ///
    /// # Errors
    ///
    /// * `GameError::NotFound` - Table does not exist
    /// * `GameError::BadRequest` - Negative increment or a counter out of range
    pub async fn finalize_table(
        &self,
        table_id: TableId,
        games_won_pair1: i32,
        games_won_pair2: i32,
    ) -> GameResult<FinalizeOutcome> {
        if games_won_pair1 < 0 || games_won_pair2 < 0 {
            return Err(GameError::bad_request("won increments cannot be negative"));
        }

        let mut tx = self.pool.begin().await?;

        let current = lock_table(&mut tx, table_id).await?;
        let won = apply_won_increments(
            [current.games_won_pair1, current.games_won_pair2],
            [(1, games_won_pair1), (2, games_won_pair2)],
        )?;

        let finished_at = Utc::now();
        let row = sqlx::query(&format!(
            "UPDATE game_tables
             SET games_won_pair1 = $2,
                 games_won_pair2 = $3,
                 finished = TRUE,
                 finished_at = $4,
                 updated_at = NOW()
             WHERE id = $1
             RETURNING {TABLE_COLUMNS}"
        ))
        .bind(table_id)
        .bind(won[0])
        .bind(won[1])
        .bind(finished_at)
        .fetch_one(&mut *tx)
        .await?;
        let table = GameTable::from_row(&row);

        let winner_pair_index = winner_from_increments(games_won_pair1, games_won_pair2);
        let closed =
            PartidaManager::close(&mut tx, table_id, finished_at, winner_pair_index).await?;
        if let Some(partida) = &closed {
            PartidaManager::record_snapshots(&mut tx, partida).await?;
        }

        tx.commit().await?;

        let outcome = FinalizeOutcome {
            table,
            partida_closed: closed.is_some(),
            winner_pair_index,
        };

        log::info!(
            "Table {} finalized (winner pair: {:?}, partida closed: {})",
            table_id,
            outcome.winner_pair_index,
            outcome.partida_closed
        );
        self.events
            .publish(outcome.table.session_id, EventKind::TableFinalized, &outcome)
            .await;

        Ok(outcome)
    }

    /// Remove a table that has not recorded any progress
    ///
    /// # Errors
    ///
    /// * `GameError::NotFound` - Table does not exist
    /// * `GameError::Conflict(TableInProgress)` - Table is finished or has wins
    pub async fn cancel_table(&self, table_id: TableId) -> GameResult<()> {
        let mut tx = self.pool.begin().await?;

        let table = lock_table(&mut tx, table_id).await?;
        if table.has_progress() {
            return Err(GameError::Conflict(ConflictKind::TableInProgress));
        }

        cascade::delete_table(&mut tx, table_id).await?;
        tx.commit().await?;

        log::info!("Table {} cancelled in session {}", table_id, table.session_id);
        self.events
            .publish(
                table.session_id,
                EventKind::TableCancelled,
                &serde_json::json!({ "id": table_id, "table_number": table.table_number }),
            )
            .await;

        Ok(())
    }

    // ========================================================================
    // Hands
    // ========================================================================

    /// Record a hand, opening the table's next partida if none is open
    ///
    /// # Errors
    ///
    /// * `GameError::NotFound` - Table does not exist
    /// * `GameError::Conflict(DuplicateHandNumber)` - Hand number already used
    /// * `GameError::BadRequest` - Both pairs scored
    pub async fn add_hand(&self, table_id: TableId, spec: HandSpec) -> GameResult<Hand> {
        validate_hand_scores(spec.pair_1_score, spec.pair_2_score)?;

        let mut tx = self.pool.begin().await?;

        let table = lock_table(&mut tx, table_id).await?;

        let hand_number = match spec.hand_number {
            Some(number) => {
                ensure_hand_number_free(&mut tx, table_id, number, None).await?;
                number
            }
            None => sqlx::query(
                "SELECT COALESCE(MAX(hand_number), 0) + 1 AS next FROM game_hands WHERE table_id = $1",
            )
            .bind(table_id)
            .fetch_one(&mut *tx)
            .await?
            .get("next"),
        };

        let partida = PartidaManager::get_or_open(&mut tx, table_id).await?;
        let duration = spec
            .duration
            .or_else(|| hand_duration_secs(spec.start_time, spec.end_time));

        let row = sqlx::query(&format!(
            "INSERT INTO game_hands
                 (table_id, partida_id, hand_number, pair_1_score, pair_2_score,
                  start_time, end_time, duration)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING {HAND_COLUMNS}"
        ))
        .bind(table_id)
        .bind(partida.id)
        .bind(hand_number)
        .bind(spec.pair_1_score)
        .bind(spec.pair_2_score)
        .bind(spec.start_time)
        .bind(spec.end_time)
        .bind(duration)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let hand = Hand::from_row(&row);
        log::debug!(
            "Hand {} added at table {} in partida {}",
            hand.hand_number,
            table_id,
            partida.partida_index
        );
        self.events
            .publish(table.session_id, EventKind::HandAdded, &hand)
            .await;

        Ok(hand)
    }

    /// Apply a partial update to a hand
    ///
    /// Pair scores cached on the table are left as they are.
    ///
    /// # Errors
    ///
    /// * `GameError::NotFound` - Hand does not exist
    /// * `GameError::Conflict(DuplicateHandNumber)` - New hand number already used
    /// * `GameError::BadRequest` - Both pairs would have scored
    pub async fn update_hand(&self, hand_id: HandId, patch: HandPatch) -> GameResult<Hand> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT h.id, h.table_id, h.partida_id, h.hand_number, h.pair_1_score, h.pair_2_score,
                   h.start_time, h.end_time, h.duration, h.created_at, h.updated_at,
                   t.session_id
            FROM game_hands h
            JOIN game_tables t ON t.id = h.table_id
            WHERE h.id = $1
            FOR UPDATE OF h
            "#,
        )
        .bind(hand_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(GameError::not_found(Entity::Hand, hand_id))?;

        let current = Hand::from_row(&row);
        let session_id: SessionId = row.get("session_id");

        let pair_1_score = patch.pair_1_score.unwrap_or(current.pair_1_score);
        let pair_2_score = patch.pair_2_score.unwrap_or(current.pair_2_score);
        validate_hand_scores(pair_1_score, pair_2_score)?;

        let hand_number = patch.hand_number.unwrap_or(current.hand_number);
        if hand_number != current.hand_number {
            ensure_hand_number_free(&mut tx, current.table_id, hand_number, Some(hand_id)).await?;
        }

        let start_time = patch.start_time.or(current.start_time);
        let end_time = patch.end_time.or(current.end_time);
        let duration = match patch.duration {
            Some(duration) => Some(duration),
            None if patch.start_time.is_some() || patch.end_time.is_some() => {
                hand_duration_secs(start_time, end_time).or(current.duration)
            }
            None => current.duration,
        };

        let row = sqlx::query(&format!(
            "UPDATE game_hands
             SET hand_number = $2, pair_1_score = $3, pair_2_score = $4,
                 start_time = $5, end_time = $6, duration = $7, updated_at = NOW()
             WHERE id = $1
             RETURNING {HAND_COLUMNS}"
        ))
        .bind(hand_id)
        .bind(hand_number)
        .bind(pair_1_score)
        .bind(pair_2_score)
        .bind(start_time)
        .bind(end_time)
        .bind(duration)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let hand = Hand::from_row(&row);
        self.events
            .publish(session_id, EventKind::HandUpdated, &hand)
            .await;

        Ok(hand)
    }

    // ========================================================================
    // Anecdotes
    // ========================================================================

    /// Attach an anecdote to a session
    pub async fn add_anecdote(
        &self,
        session_id: SessionId,
        spec: AnecdoteSpec,
    ) -> GameResult<Anecdote> {
        validate_anecdote(&spec)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT id FROM game_sessions WHERE id = $1 FOR SHARE")
            .bind(session_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(GameError::not_found(Entity::Session, session_id))?;

        let row = sqlx::query(&format!(
            "INSERT INTO game_anecdotes (session_id, player_id, body)
             VALUES ($1, $2, $3)
             RETURNING {ANECDOTE_COLUMNS}"
        ))
        .bind(session_id)
        .bind(spec.player_id)
        .bind(spec.body.trim())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let anecdote = Anecdote::from_row(&row);
        self.events
            .publish(session_id, EventKind::AnecdoteCreated, &anecdote)
            .await;

        Ok(anecdote)
    }

    /// Rewrite an anecdote
    pub async fn update_anecdote(
        &self,
        anecdote_id: AnecdoteId,
        spec: AnecdoteSpec,
    ) -> GameResult<Anecdote> {
        validate_anecdote(&spec)?;

        let row = sqlx::query(&format!(
            "UPDATE game_anecdotes
             SET player_id = $2, body = $3, updated_at = NOW()
             WHERE id = $1
             RETURNING {ANECDOTE_COLUMNS}"
        ))
        .bind(anecdote_id)
        .bind(spec.player_id)
        .bind(spec.body.trim())
        .fetch_optional(self.pool.as_ref())
        .await?
        .ok_or(GameError::not_found(Entity::Anecdote, anecdote_id))?;

        let anecdote = Anecdote::from_row(&row);
        self.events
            .publish(anecdote.session_id, EventKind::AnecdoteUpdated, &anecdote)
            .await;

        Ok(anecdote)
    }

    /// Remove an anecdote
    pub async fn delete_anecdote(&self, anecdote_id: AnecdoteId) -> GameResult<()> {
        let session_id: SessionId =
            sqlx::query("DELETE FROM game_anecdotes WHERE id = $1 RETURNING session_id")
                .bind(anecdote_id)
                .fetch_optional(self.pool.as_ref())
                .await?
                .ok_or(GameError::not_found(Entity::Anecdote, anecdote_id))?
                .get("session_id");

        self.events
            .publish(
                session_id,
                EventKind::AnecdoteDeleted,
                &serde_json::json!({ "id": anecdote_id }),
            )
            .await;

        Ok(())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn get_session(&self, session_id: SessionId) -> GameResult<GameSession> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM game_sessions WHERE id = $1"
        ))
        .bind(session_id)
        .fetch_optional(self.pool.as_ref())
        .await?
        .ok_or(GameError::not_found(Entity::Session, session_id))?;

        GameSession::from_row(&row)
    }

    /// The session currently marked active, if any
    pub async fn get_active_session(&self) -> GameResult<Option<GameSession>> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM game_sessions WHERE status = 'active'"
        ))
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.as_ref().map(GameSession::from_row).transpose()
    }

    /// Session with its tables, pairs, hands and anecdotes
    pub async fn get_session_detail(&self, session_id: SessionId) -> GameResult<SessionDetail> {
        let session = self.get_session(session_id).await?;
        let mut conn = self.pool.acquire().await?;

        let tables: Vec<GameTable> = sqlx::query(&format!(
            "SELECT {TABLE_COLUMNS} FROM game_tables WHERE session_id = $1 ORDER BY table_number"
        ))
        .bind(session_id)
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(GameTable::from_row)
        .collect();

        let table_ids: Vec<TableId> = tables.iter().map(|t| t.id).collect();
        let pairs = load_pairs(&mut conn, &table_ids).await?;
        let hands = load_hands(&mut conn, &table_ids).await?;

        let anecdotes = sqlx::query(&format!(
            "SELECT {ANECDOTE_COLUMNS} FROM game_anecdotes WHERE session_id = $1 ORDER BY created_at, id"
        ))
        .bind(session_id)
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(Anecdote::from_row)
        .collect();

        let tables = tables
            .into_iter()
            .map(|table| TableDetail {
                pairs: pairs
                    .iter()
                    .filter(|p| p.table_id == table.id)
                    .cloned()
                    .collect(),
                hands: hands
                    .iter()
                    .filter(|h| h.table_id == table.id)
                    .cloned()
                    .collect(),
                table,
            })
            .collect();

        Ok(SessionDetail {
            session,
            tables,
            anecdotes,
        })
    }

    /// Table with its pairs and hands
    pub async fn get_table(&self, table_id: TableId) -> GameResult<TableDetail> {
        let mut conn = self.pool.acquire().await?;

        let row = sqlx::query(&format!(
            "SELECT {TABLE_COLUMNS} FROM game_tables WHERE id = $1"
        ))
        .bind(table_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(GameError::not_found(Entity::Table, table_id))?;

        load_table_detail(&mut conn, GameTable::from_row(&row)).await
    }

    pub async fn get_hand(&self, hand_id: HandId) -> GameResult<Hand> {
        let row = sqlx::query(&format!("SELECT {HAND_COLUMNS} FROM game_hands WHERE id = $1"))
            .bind(hand_id)
            .fetch_optional(self.pool.as_ref())
            .await?
            .ok_or(GameError::not_found(Entity::Hand, hand_id))?;

        Ok(Hand::from_row(&row))
    }

    /// Partidas of a table, oldest first
    pub async fn list_partidas(&self, table_id: TableId) -> GameResult<Vec<Partida>> {
        self.ensure_table(table_id).await?;
        PartidaManager::list_for_table(self.pool.as_ref(), table_id).await
    }

    /// Snapshots of a table's closed partidas
    pub async fn list_snapshots(&self, table_id: TableId) -> GameResult<Vec<PartidaSnapshot>> {
        self.ensure_table(table_id).await?;
        PartidaManager::list_snapshots(self.pool.as_ref(), table_id).await
    }

    async fn ensure_table(&self, table_id: TableId) -> GameResult<()> {
        sqlx::query("SELECT 1 FROM game_tables WHERE id = $1")
            .bind(table_id)
            .fetch_optional(self.pool.as_ref())
            .await?
            .ok_or(GameError::not_found(Entity::Table, table_id))?;
        Ok(())
    }
}

fn validate_anecdote(spec: &AnecdoteSpec) -> GameResult<()> {
    if spec.body.trim().is_empty() {
        return Err(GameError::bad_request("anecdote body cannot be empty"));
    }
    Ok(())
}

async fn lock_session(conn: &mut PgConnection, session_id: SessionId) -> GameResult<GameSession> {
    let row = sqlx::query(&format!(
        "SELECT {SESSION_COLUMNS} FROM game_sessions WHERE id = $1 FOR UPDATE"
    ))
    .bind(session_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(GameError::not_found(Entity::Session, session_id))?;

    GameSession::from_row(&row)
}

async fn lock_table(conn: &mut PgConnection, table_id: TableId) -> GameResult<GameTable> {
    let row = sqlx::query(&format!(
        "SELECT {TABLE_COLUMNS} FROM game_tables WHERE id = $1 FOR UPDATE"
    ))
    .bind(table_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(GameError::not_found(Entity::Table, table_id))?;

    Ok(GameTable::from_row(&row))
}

async fn ensure_hand_number_free(
    conn: &mut PgConnection,
    table_id: TableId,
    hand_number: i32,
    except: Option<HandId>,
) -> GameResult<()> {
    let taken = sqlx::query(
        r#"
        SELECT 1 FROM game_hands
        WHERE table_id = $1 AND hand_number = $2 AND ($3::BIGINT IS NULL OR id <> $3)
        "#,
    )
    .bind(table_id)
    .bind(hand_number)
    .bind(except)
    .fetch_optional(&mut *conn)
    .await?;

    if taken.is_some() {
        return Err(GameError::Conflict(ConflictKind::DuplicateHandNumber));
    }
    Ok(())
}

async fn load_pairs(conn: &mut PgConnection, table_ids: &[TableId]) -> GameResult<Vec<Pair>> {
    let rows = sqlx::query(
        r#"
        SELECT p.id, p.table_id, p.pair_index, p.score,
               s1.player_id AS player_1_id, s2.player_id AS player_2_id
        FROM game_pairs p
        LEFT JOIN game_pair_players s1 ON s1.pair_id = p.id AND s1.slot = 1
        LEFT JOIN game_pair_players s2 ON s2.pair_id = p.id AND s2.slot = 2
        WHERE p.table_id = ANY($1)
        ORDER BY p.table_id, p.pair_index
        "#,
    )
    .bind(table_ids)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.iter().map(Pair::from_row).collect())
}

async fn load_hands(conn: &mut PgConnection, table_ids: &[TableId]) -> GameResult<Vec<Hand>> {
    let rows = sqlx::query(&format!(
        "SELECT {HAND_COLUMNS} FROM game_hands WHERE table_id = ANY($1) ORDER BY table_id, hand_number"
    ))
    .bind(table_ids)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.iter().map(Hand::from_row).collect())
}

async fn load_table_detail(conn: &mut PgConnection, table: GameTable) -> GameResult<TableDetail> {
    let pairs = load_pairs(conn, &[table.id]).await?;
    let hands = load_hands(conn, &[table.id]).await?;

    Ok(TableDetail {
        table,
        pairs,
        hands,
    })
}
