use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignedFrequency {
    Weekly,
    Biweekly,
}

/// A recurring claim on a room/weekday/hour cell. The materializer expands
/// these into `slot_events` rows one week at a time.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct StandingAssignment {
    pub id: String,
    pub location_id: String,
    pub room_id: String,
    pub provider_id: String,
    /// 0 = Sunday .. 6 = Saturday, matching the grid's week layout.
    pub weekday: i64,
    pub hour: i64,
    pub assigned_frequency: AssignedFrequency,
    /// Groups the assignments created by one approval so they can be
    /// cancelled together.
    pub recurrence_group_id: Option<String>,
    /// Parity anchor for biweekly assignments; weeks at an even offset from
    /// this date are eligible.
    pub available_since_date: Option<NaiveDate>,
    pub is_active: bool,
    pub created_by: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
