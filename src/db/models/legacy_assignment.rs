use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Row from the deprecated room-assignment table. Still consulted by grid
/// resolution until every row has been backfilled into `slot_events`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LegacyRoomAssignment {
    pub id: String,
    pub room_id: String,
    pub assigned_user_id: String,
    pub assignment_type: String,
    pub start_at: NaiveDateTime,
    /// Historical rows sometimes lack an end; treated as one hour long.
    pub end_at: Option<NaiveDateTime>,
    /// Set once the row has been mirrored into `slot_events`; backfilled
    /// rows are skipped by grid resolution.
    pub backfilled_event_id: Option<String>,
    pub created_at: NaiveDateTime,
}
