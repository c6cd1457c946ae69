//! Ordered deletes for tables and sessions.
//!
//! Foreign keys carry no `ON DELETE CASCADE`; children are removed first and
//! the constraints reject any out-of-order delete.

use sqlx::{Postgres, Row, Transaction};

use super::{SessionId, TableId};
use crate::errors::GameResult;

/// Delete a table with its hands, snapshots, partidas, seating and pairs
pub(crate) async fn delete_table(
    tx: &mut Transaction<'_, Postgres>,
    table_id: TableId,
) -> GameResult<()> {
    let hands = sqlx::query("DELETE FROM game_hands WHERE table_id = $1")
        .bind(table_id)
        .execute(&mut **tx)
        .await?
        .rows_affected();

    sqlx::query("DELETE FROM game_partida_snapshots WHERE table_id = $1")
        .bind(table_id)
        .execute(&mut **tx)
        .await?;

    sqlx::query("DELETE FROM game_partidas WHERE table_id = $1")
        .bind(table_id)
        .execute(&mut **tx)
        .await?;

    sqlx::query(
        "DELETE FROM game_pair_players
         WHERE pair_id IN (SELECT id FROM game_pairs WHERE table_id = $1)",
    )
    .bind(table_id)
    .execute(&mut **tx)
    .await?;

    sqlx::query("DELETE FROM game_pairs WHERE table_id = $1")
        .bind(table_id)
        .execute(&mut **tx)
        .await?;

    sqlx::query("DELETE FROM game_tables WHERE id = $1")
        .bind(table_id)
        .execute(&mut **tx)
        .await?;

    log::debug!("Deleted table {} with {} hands", table_id, hands);
    Ok(())
}

/// Delete a pair and its seating
pub(crate) async fn delete_pair(tx: &mut Transaction<'_, Postgres>, pair_id: i64) -> GameResult<()> {
    sqlx::query("DELETE FROM game_pair_players WHERE pair_id = $1")
        .bind(pair_id)
        .execute(&mut **tx)
        .await?;

    sqlx::query("DELETE FROM game_pairs WHERE id = $1")
        .bind(pair_id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

/// Delete a session and everything recorded under it
pub(crate) async fn delete_session(
    tx: &mut Transaction<'_, Postgres>,
    session_id: SessionId,
) -> GameResult<()> {
    let tables = sqlx::query("SELECT id FROM game_tables WHERE session_id = $1 FOR UPDATE")
        .bind(session_id)
        .fetch_all(&mut **tx)
        .await?;

    for row in &tables {
        delete_table(tx, row.get("id")).await?;
    }

    sqlx::query("DELETE FROM game_attendance WHERE session_id = $1")
        .bind(session_id)
        .execute(&mut **tx)
        .await?;

    sqlx::query("DELETE FROM game_anecdotes WHERE session_id = $1")
        .bind(session_id)
        .execute(&mut **tx)
        .await?;

    sqlx::query("DELETE FROM game_sessions WHERE id = $1")
        .bind(session_id)
        .execute(&mut **tx)
        .await?;

    log::debug!("Deleted session {} with {} tables", session_id, tables.len());
    Ok(())
}
