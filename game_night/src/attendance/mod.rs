//! Player attendance: visits, bench and time analytics.

pub mod manager;
pub mod minutes;
pub mod models;

pub use manager::AttendanceLedger;
pub use minutes::compute_playing_and_bench_minutes;
pub use models::{
    AttendanceId, AttendanceOverview, AttendanceRecord, BackfillReport, HandWindow,
    PlayerMinutes, SessionTimeline,
};
