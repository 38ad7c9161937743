use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionKind {
    VirtualIntake,
    VirtualRegular,
    InPersonIntake,
}

/// Marks a booked hour as accepting intake sessions. Derived from a booked
/// slot event (`source_event_id`) when staff toggle the intake flags.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ProviderIntakeSlot {
    pub id: String,
    pub agency_id: String,
    pub provider_id: String,
    pub location_id: String,
    pub room_id: Option<String>,
    pub start_at: NaiveDateTime,
    pub end_at: NaiveDateTime,
    pub session_kind: SessionKind,
    pub source_event_id: Option<String>,
    pub is_active: bool,
    pub created_by: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
