//! Partida lifecycle manager.

use chrono::{DateTime, Utc};
use sqlx::{Connection, PgPool, Postgres, Row, Transaction};

use super::models::{Partida, PartidaSnapshot};
use crate::{
    errors::{ConflictKind, Entity, GameError, GameResult},
    game::TableId,
};

const PARTIDA_COLUMNS: &str =
    "id, session_id, table_id, partida_index, started_at, closed_at, winner_pair_index";

/// Owner of the single-open-round-per-table invariant
#[derive(Debug, Clone, Copy, Default)]
pub struct PartidaManager;

impl PartidaManager {
    /// Return the open partida of a table, opening the next one if none is open
    ///
    /// The open row is selected `FOR UPDATE`. When nothing is open the insert
    /// runs in a savepoint: if a concurrent transaction opened the round first,
    /// the unique index on open rounds rejects ours, the savepoint is rolled
    /// back and the winner's row is returned instead.
    ///
    /// # Errors
    ///
    /// * `GameError::NotFound` - Table does not exist
    pub async fn get_or_open(
        tx: &mut Transaction<'_, Postgres>,
        table_id: TableId,
    ) -> GameResult<Partida> {
        if let Some(open) = Self::select_open(tx, table_id).await? {
            return Ok(open);
        }

        let next = sqlx::query(
            r#"
            SELECT t.session_id,
                   COALESCE((SELECT MAX(partida_index) FROM game_partidas WHERE table_id = t.id), 0) + 1 AS next_index
            FROM game_tables t
            WHERE t.id = $1
            "#,
        )
        .bind(table_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(GameError::not_found(Entity::Table, table_id))?;

        let session_id: i64 = next.get("session_id");
        let next_index: i32 = next.get("next_index");

        let mut savepoint = tx.begin().await?;
        let inserted = sqlx::query(&format!(
            "INSERT INTO game_partidas (session_id, table_id, partida_index, started_at)
             VALUES ($1, $2, $3, NOW())
             RETURNING {PARTIDA_COLUMNS}"
        ))
        .bind(session_id)
        .bind(table_id)
        .bind(next_index)
        .fetch_one(&mut *savepoint)
        .await;

        match inserted {
            Ok(row) => {
                savepoint.commit().await?;
                log::debug!("Opened partida {} at table {}", next_index, table_id);
                Ok(Partida::from_row(&row))
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                savepoint.rollback().await?;
                log::debug!(
                    "Partida {} at table {} opened concurrently, adopting it",
                    next_index,
                    table_id
                );
                Self::select_open(tx, table_id)
                    .await?
                    .ok_or(GameError::Conflict(ConflictKind::PartidaIndexTaken))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Close the open partida of a table
    ///
    /// # Returns
    ///
    /// * `GameResult<Option<Partida>>` - The closed round, or `None` if no round was open
    pub async fn close(
        tx: &mut Transaction<'_, Postgres>,
        table_id: TableId,
        finished_at: DateTime<Utc>,
        winner_pair_index: Option<i16>,
    ) -> GameResult<Option<Partida>> {
        let Some(open) = Self::select_open(tx, table_id).await? else {
            return Ok(None);
        };

        let row = sqlx::query(&format!(
            "UPDATE game_partidas
             SET closed_at = $2, winner_pair_index = $3
             WHERE id = $1
             RETURNING {PARTIDA_COLUMNS}"
        ))
        .bind(open.id)
        .bind(finished_at)
        .bind(winner_pair_index)
        .fetch_one(&mut **tx)
        .await?;

        Ok(Some(Partida::from_row(&row)))
    }

    /// Capture pair composition and points of a closed partida
    ///
    /// Existing snapshot rows are never overwritten.
    pub async fn record_snapshots(
        tx: &mut Transaction<'_, Postgres>,
        partida: &Partida,
    ) -> GameResult<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO game_partida_snapshots
                (session_id, table_id, partida_index, pair_index, player_1_id, player_2_id, points, won)
            SELECT $1, $2, $3, p.pair_index,
                   (SELECT player_id FROM game_pair_players WHERE pair_id = p.id AND slot = 1),
                   (SELECT player_id FROM game_pair_players WHERE pair_id = p.id AND slot = 2),
                   COALESCE((
                       SELECT SUM(CASE WHEN p.pair_index = 1 THEN h.pair_1_score ELSE h.pair_2_score END)
                       FROM game_hands h
                       WHERE h.partida_id = $4
                   ), 0),
                   COALESCE(p.pair_index = $5, FALSE)
            FROM game_pairs p
            WHERE p.table_id = $2
            ON CONFLICT (session_id, table_id, partida_index, pair_index) DO NOTHING
            "#,
        )
        .bind(partida.session_id)
        .bind(partida.table_id)
        .bind(partida.partida_index)
        .bind(partida.id)
        .bind(partida.winner_pair_index)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected())
    }

    /// List every partida of a table, oldest first
    pub async fn list_for_table(pool: &PgPool, table_id: TableId) -> GameResult<Vec<Partida>> {
        let rows = sqlx::query(&format!(
            "SELECT {PARTIDA_COLUMNS} FROM game_partidas WHERE table_id = $1 ORDER BY partida_index"
        ))
        .bind(table_id)
        .fetch_all(pool)
        .await?;

        Ok(rows.iter().map(Partida::from_row).collect())
    }

    /// List snapshots of a table's closed partidas
    pub async fn list_snapshots(
        pool: &PgPool,
        table_id: TableId,
    ) -> GameResult<Vec<PartidaSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT session_id, table_id, partida_index, pair_index, player_1_id, player_2_id,
                   points, won, created_at
            FROM game_partida_snapshots
            WHERE table_id = $1
            ORDER BY partida_index, pair_index
            "#,
        )
        .bind(table_id)
        .fetch_all(pool)
        .await?;

        Ok(rows.iter().map(PartidaSnapshot::from_row).collect())
    }

    async fn select_open(
        tx: &mut Transaction<'_, Postgres>,
        table_id: TableId,
    ) -> GameResult<Option<Partida>> {
        let row = sqlx::query(&format!(
            "SELECT {PARTIDA_COLUMNS}
             FROM game_partidas
             WHERE table_id = $1 AND closed_at IS NULL
             ORDER BY partida_index DESC
             LIMIT 1
             FOR UPDATE"
        ))
        .bind(table_id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(row.as_ref().map(Partida::from_row))
    }
}

/// Winning pair index from the won-counter increments; `None` on a tie
pub fn winner_from_increments(inc_pair1: i32, inc_pair2: i32) -> Option<i16> {
    match inc_pair1.cmp(&inc_pair2) {
        std::cmp::Ordering::Greater => Some(1),
        std::cmp::Ordering::Less => Some(2),
        std::cmp::Ordering::Equal => None,
    }
}
