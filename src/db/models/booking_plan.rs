use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookedFrequency {
    Weekly,
    Biweekly,
    Monthly,
}

/// Booking cadence layered on top of a standing assignment. At most one plan
/// per assignment is active; creating a new one deactivates the rest.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct BookingPlan {
    pub id: String,
    pub standing_assignment_id: String,
    pub booked_frequency: BookedFrequency,
    pub booking_start_date: NaiveDate,
    /// Inclusive end bound. Open-ended when NULL, capped by the 365-day
    /// materialization horizon either way.
    pub active_until_date: Option<NaiveDate>,
    /// Maximum number of booked occurrences; unbounded when NULL.
    pub occurrence_count: Option<i64>,
    pub is_active: bool,
    pub created_by: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
