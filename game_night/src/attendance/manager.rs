//! Attendance ledger: check-in, check-out, backfill and bench.
#![allow(clippy::needless_raw_string_hashes)]

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::sync::Arc;

use super::{
    minutes::compute_playing_and_bench_minutes,
    models::{
        AttendanceOverview, AttendanceRecord, BackfillReport, HandWindow, PlayerMinutes,
        SessionTimeline,
    },
};
use crate::{
    errors::{ConflictKind, Entity, GameError, GameResult},
    game::{PlayerId, SessionId, SessionStatus},
    realtime::{EventDistributor, EventKind},
};

const RECORD_COLUMNS: &str =
    "id, session_id, player_id, check_in_time, check_out_time, created_at, updated_at";

/// Attendance ledger
#[derive(Clone)]
pub struct AttendanceLedger {
    pool: Arc<PgPool>,
    events: Arc<EventDistributor>,
}

impl AttendanceLedger {
    /// Create a new attendance ledger
    ///
    /// # Arguments
    ///
    /// * `pool` - Database connection pool
    /// * `events` - Distributor notified after every committed change
    pub fn new(pool: Arc<PgPool>, events: Arc<EventDistributor>) -> Self {
        Self { pool, events }
    }

    /// Check a player into a session
    ///
    /// Re-opens the player's latest closed visit if there is one, keeping its
    /// original check-in time; otherwise starts a new visit at `at` (or now).
    ///
    /// # Errors
    ///
    /// * `GameError::NotFound` - Session does not exist
    /// * `GameError::Conflict(SessionClosed)` - Session is finished or cancelled
    /// * `GameError::Conflict(AttendanceAlreadyOpen)` - Player is already checked in
    pub async fn check_in(
        &self,
        session_id: SessionId,
        player_id: PlayerId,
        at: Option<DateTime<Utc>>,
    ) -> GameResult<AttendanceRecord> {
        let mut tx = self.pool.begin().await?;

        lock_open_session(&mut tx, session_id).await?;

        let open = sqlx::query(
            r#"
            SELECT id FROM game_attendance
            WHERE session_id = $1 AND player_id = $2 AND check_out_time IS NULL
            FOR UPDATE
            "#,
        )
        .bind(session_id)
        .bind(player_id)
        .fetch_optional(&mut *tx)
        .await?;

        if open.is_some() {
            return Err(GameError::Conflict(ConflictKind::AttendanceAlreadyOpen));
        }

        let latest_closed = sqlx::query(
            r#"
            SELECT id FROM game_attendance
            WHERE session_id = $1 AND player_id = $2
            ORDER BY check_in_time DESC, id DESC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(session_id)
        .bind(player_id)
        .fetch_optional(&mut *tx)
        .await?;

        let row = match latest_closed {
            Some(previous) => {
                let id: i64 = previous.get("id");
                sqlx::query(&format!(
                    "UPDATE game_attendance
                     SET check_out_time = NULL, updated_at = NOW()
                     WHERE id = $1
                     RETURNING {RECORD_COLUMNS}"
                ))
                .bind(id)
                .fetch_one(&mut *tx)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "INSERT INTO game_attendance (session_id, player_id, check_in_time)
                     VALUES ($1, $2, $3)
                     RETURNING {RECORD_COLUMNS}"
                ))
                .bind(session_id)
                .bind(player_id)
                .bind(at.unwrap_or_else(Utc::now))
                .fetch_one(&mut *tx)
                .await?
            }
        };

        tx.commit().await?;

        let record = AttendanceRecord::from_row(&row);
        log::info!("Player {} checked into session {}", player_id, session_id);
        self.events
            .publish(session_id, EventKind::AttendanceUpdated, &record)
            .await;

        Ok(record)
    }

    /// Check a player out of a session
    ///
    /// # Errors
    ///
    /// * `GameError::NotFound` - Session does not exist
    /// * `GameError::Conflict(SessionClosed)` - Session is finished or cancelled
    /// * `GameError::BadRequest` - Player is not checked in, or `at` precedes the check-in
    pub async fn check_out(
        &self,
        session_id: SessionId,
        player_id: PlayerId,
        at: Option<DateTime<Utc>>,
    ) -> GameResult<AttendanceRecord> {
        let mut tx = self.pool.begin().await?;

        lock_open_session(&mut tx, session_id).await?;

        let open = sqlx::query(
            r#"
            SELECT id, check_in_time FROM game_attendance
            WHERE session_id = $1 AND player_id = $2 AND check_out_time IS NULL
            FOR UPDATE
            "#,
        )
        .bind(session_id)
        .bind(player_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            GameError::bad_request(format!(
                "player {player_id} is not checked into session {session_id}"
            ))
        })?;

        let id: i64 = open.get("id");
        let check_in_time: DateTime<Utc> = open.get("check_in_time");
        let check_out_time = at.unwrap_or_else(Utc::now);

        if check_out_time < check_in_time {
            return Err(GameError::bad_request(
                "check-out time cannot precede check-in time",
            ));
        }

        let row = sqlx::query(&format!(
            "UPDATE game_attendance
             SET check_out_time = $2, updated_at = NOW()
             WHERE id = $1
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(id)
        .bind(check_out_time)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let record = AttendanceRecord::from_row(&row);
        log::info!("Player {} checked out of session {}", player_id, session_id);
        self.events
            .publish(session_id, EventKind::AttendanceUpdated, &record)
            .await;

        Ok(record)
    }

    /// Close every forgotten check-out of a session
    ///
    /// Idempotent: a second run finds no open records.
    ///
    /// # Errors
    ///
    /// * `GameError::NotFound` - Session does not exist
    pub async fn backfill_missing_checkouts(
        &self,
        session_id: SessionId,
    ) -> GameResult<BackfillReport> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT id FROM game_sessions WHERE id = $1 FOR UPDATE")
            .bind(session_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(GameError::not_found(Entity::Session, session_id))?;

        let report = Self::backfill_in_tx(&mut tx, session_id).await?;
        tx.commit().await?;

        if report.updated > 0 {
            self.events
                .publish(session_id, EventKind::AttendanceUpdated, &report)
                .await;
        }

        Ok(report)
    }

    /// Backfill inside a caller-owned transaction
    ///
    /// Each open record is closed at the latest hand timestamp among the
    /// session's tables where the player is seated, else the session's
    /// `closed_at`, `updated_at` or `date`, never before its own check-in.
    pub async fn backfill_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        session_id: SessionId,
    ) -> GameResult<BackfillReport> {
        let result = sqlx::query(
            r#"
            UPDATE game_attendance a
            SET check_out_time = GREATEST(
                    a.check_in_time,
                    COALESCE(
                        (SELECT MAX(COALESCE(h.end_time, h.updated_at, h.created_at))
                         FROM game_hands h
                         JOIN game_tables t ON t.id = h.table_id
                         JOIN game_pairs p ON p.table_id = t.id
                         JOIN game_pair_players pp ON pp.pair_id = p.id
                         WHERE t.session_id = a.session_id AND pp.player_id = a.player_id),
                        s.closed_at,
                        s.updated_at,
                        s.date
                    )
                ),
                updated_at = NOW()
            FROM game_sessions s
            WHERE s.id = a.session_id
              AND a.session_id = $1
              AND a.check_out_time IS NULL
            "#,
        )
        .bind(session_id)
        .execute(&mut **tx)
        .await?;

        let report = BackfillReport {
            updated: result.rows_affected(),
        };

        if report.updated > 0 {
            log::info!(
                "Backfilled {} missing check-outs for session {}",
                report.updated,
                session_id
            );
        }

        Ok(report)
    }

    /// Attendance records of a session plus the current bench
    ///
    /// # Errors
    ///
    /// * `GameError::NotFound` - Session does not exist
    pub async fn get_by_game(&self, session_id: SessionId) -> GameResult<AttendanceOverview> {
        ensure_session(self.pool.as_ref(), session_id).await?;

        let records = self.load_records(session_id).await?;

        let bench = sqlx::query(
            r#"
            SELECT DISTINCT a.player_id
            FROM game_attendance a
            WHERE a.session_id = $1
              AND a.check_out_time IS NULL
              AND NOT EXISTS (
                  SELECT 1
                  FROM game_pair_players pp
                  JOIN game_pairs p ON p.id = pp.pair_id
                  JOIN game_tables t ON t.id = p.table_id
                  WHERE t.session_id = a.session_id
                    AND t.finished = FALSE
                    AND pp.player_id = a.player_id
              )
            ORDER BY a.player_id
            "#,
        )
        .bind(session_id)
        .fetch_all(self.pool.as_ref())
        .await?
        .iter()
        .map(|row| row.get::<i64, _>("player_id"))
        .collect();

        Ok(AttendanceOverview { records, bench })
    }

    /// Playing and bench minutes of every attending player
    ///
    /// # Errors
    ///
    /// * `GameError::NotFound` - Session does not exist
    pub async fn playing_and_bench_minutes(
        &self,
        session_id: SessionId,
    ) -> GameResult<Vec<PlayerMinutes>> {
        let timeline = self.load_timeline(session_id).await?;
        let records = self.load_records(session_id).await?;

        Ok(compute_playing_and_bench_minutes(&records, &timeline))
    }

    async fn load_records(&self, session_id: SessionId) -> GameResult<Vec<AttendanceRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS}
             FROM game_attendance
             WHERE session_id = $1
             ORDER BY check_in_time, id"
        ))
        .bind(session_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows.iter().map(AttendanceRecord::from_row).collect())
    }

    async fn load_timeline(&self, session_id: SessionId) -> GameResult<SessionTimeline> {
        let session = sqlx::query("SELECT date, updated_at, closed_at FROM game_sessions WHERE id = $1")
            .bind(session_id)
            .fetch_optional(self.pool.as_ref())
            .await?
            .ok_or(GameError::not_found(Entity::Session, session_id))?;

        let mut timeline = SessionTimeline::new(session.get("date"));
        timeline.updated_at = Some(session.get("updated_at"));
        timeline.closed_at = session.get("closed_at");

        let seats = sqlx::query(
            r#"
            SELECT pp.player_id, p.table_id
            FROM game_pair_players pp
            JOIN game_pairs p ON p.id = pp.pair_id
            JOIN game_tables t ON t.id = p.table_id
            WHERE t.session_id = $1
            "#,
        )
        .bind(session_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        for seat in &seats {
            timeline.seat(seat.get("player_id"), seat.get("table_id"));
        }

        let hands = sqlx::query(
            r#"
            SELECT h.table_id, h.start_time, h.end_time
            FROM game_hands h
            JOIN game_tables t ON t.id = h.table_id
            WHERE t.session_id = $1 AND h.start_time IS NOT NULL
            "#,
        )
        .bind(session_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        for hand in &hands {
            timeline.add_hand(
                hand.get("table_id"),
                HandWindow {
                    start: hand.get("start_time"),
                    end: hand.get("end_time"),
                },
            );
        }

        Ok(timeline)
    }
}

/// Lock a session row and reject closed sessions
async fn lock_open_session(
    tx: &mut Transaction<'_, Postgres>,
    session_id: SessionId,
) -> GameResult<()> {
    let row = sqlx::query("SELECT status FROM game_sessions WHERE id = $1 FOR UPDATE")
        .bind(session_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(GameError::not_found(Entity::Session, session_id))?;

    let status = SessionStatus::decode(&row.get::<String, _>("status"))?;
    if status.is_closed() {
        return Err(GameError::Conflict(ConflictKind::SessionClosed));
    }

    Ok(())
}

async fn ensure_session(pool: &PgPool, session_id: SessionId) -> GameResult<()> {
    sqlx::query("SELECT 1 FROM game_sessions WHERE id = $1")
        .bind(session_id)
        .fetch_optional(pool)
        .await?
        .ok_or(GameError::not_found(Entity::Session, session_id))?;
    Ok(())
}
