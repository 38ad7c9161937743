use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recurrence {
    Once,
    Weekly,
    Biweekly,
    Monthly,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Approved,
    Denied,
}

/// A provider's ask for a room slot, pending staff decision. Same-day
/// one-time requests skip the queue and book immediately.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct BookingRequest {
    pub id: String,
    pub location_id: String,
    /// NULL means "any room at the location", paired with
    /// `open_to_alternative_room`.
    pub room_id: Option<String>,
    pub requested_provider_id: String,
    pub start_at: NaiveDateTime,
    pub end_at: NaiveDateTime,
    pub recurrence: Recurrence,
    pub open_to_alternative_room: bool,
    pub requester_notes: Option<String>,
    pub status: RequestStatus,
    pub decided_by: Option<String>,
    pub decided_at: Option<NaiveDateTime>,
    pub approver_comment: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
