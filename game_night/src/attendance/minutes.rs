//! Playing and bench time analytics.
//!
//! Each attendance interval `[check_in, check_out or fallback]` is
//! intersected with every hand window of every table the player is seated
//! at. Cost is O(players x tables x hands), fine for a club night of tens of
//! players and a few hundred hands.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use super::models::{AttendanceRecord, PlayerMinutes, SessionTimeline};
use crate::game::PlayerId;

#[derive(Default)]
struct Totals {
    attendance_secs: i64,
    playing_secs: i64,
}

/// Seconds two half-open intervals have in common
fn overlap_secs(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> i64 {
    let start = a_start.max(b_start);
    let end = a_end.min(b_end);
    if end > start {
        (end - start).num_seconds()
    } else {
        0
    }
}

/// Split each player's attendance into playing and bench minutes
///
/// Open intervals (missing check-out or hand end) run until the session's
/// fallback end. Seconds are summed per player and floored to whole minutes
/// at the end; bench time never goes negative.
///
/// # Arguments
///
/// * `records` - Attendance records of one session
/// * `timeline` - Seating and hand windows of the same session
///
/// # Returns
///
/// * `Vec<PlayerMinutes>` - One entry per attending player, ordered by player id
pub fn compute_playing_and_bench_minutes(
    records: &[AttendanceRecord],
    timeline: &SessionTimeline,
) -> Vec<PlayerMinutes> {
    let fallback_end = timeline.fallback_end();
    let mut totals: BTreeMap<PlayerId, Totals> = BTreeMap::new();

    for record in records {
        let totals = totals.entry(record.player_id).or_default();
        let start = record.check_in_time;
        let end = record.check_out_time.unwrap_or(fallback_end);
        if end <= start {
            continue;
        }
        totals.attendance_secs += (end - start).num_seconds();

        let Some(tables) = timeline.seating.get(&record.player_id) else {
            continue;
        };
        for table_id in tables {
            for hand in timeline.hands.get(table_id).into_iter().flatten() {
                let hand_end = hand.end.unwrap_or(fallback_end);
                totals.playing_secs += overlap_secs(start, end, hand.start, hand_end);
            }
        }
    }

    totals
        .into_iter()
        .map(|(player_id, totals)| {
            let attendance_minutes = totals.attendance_secs / 60;
            let playing_minutes = totals.playing_secs / 60;
            PlayerMinutes {
                player_id,
                attendance_minutes,
                playing_minutes,
                bench_minutes: (attendance_minutes - playing_minutes).max(0),
            }
        })
        .collect()
}
