use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// State of a materialized slot event.
///
/// Variant order is load-bearing: it defines display precedence when several
/// events cover the same room/hour cell, so grid resolution can take the
/// `max()` of the states it finds. A booked slot always wins over a temporary
/// hold, which wins over a plain availability.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotState {
    Cancelled,
    AssignedAvailable,
    AssignedTemporary,
    AssignedBooked,
}

impl SlotState {
    /// States that occupy a cell on the grid. Cancelled rows are tombstones.
    pub fn occupies(&self) -> bool {
        !matches!(self, SlotState::Cancelled)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Pending,
    Synced,
    Failed,
}

/// A single materialized occurrence of a room slot. `start_at`/`end_at` are
/// local wall-clock values in the owning location's timezone.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SlotEvent {
    pub id: String,
    pub location_id: String,
    pub room_id: String,
    pub start_at: NaiveDateTime,
    pub end_at: NaiveDateTime,
    pub slot_state: SlotState,
    pub standing_assignment_id: Option<String>,
    pub booking_plan_id: Option<String>,
    pub recurrence_group_id: Option<String>,
    /// Provider holding the underlying standing assignment, if any.
    pub assigned_provider_id: Option<String>,
    /// Provider the slot is booked for, set only on booked events.
    pub booked_provider_id: Option<String>,
    pub source: String,
    pub notes: Option<String>,
    pub created_by: Option<String>,
    pub approved_by: Option<String>,
    pub external_event_id: Option<String>,
    pub external_calendar_id: Option<String>,
    pub sync_status: Option<SyncStatus>,
    pub sync_error: Option<String>,
    pub synced_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Where a slot event came from. Kept as plain strings in the database;
/// these constants are the only values the service writes.
pub mod event_source {
    pub const MATERIALIZER: &str = "materializer";
    pub const BOOKING_APPROVAL: &str = "booking_approval";
    pub const AUTO_BOOK: &str = "auto_book";
    pub const LEGACY_BACKFILL: &str = "legacy_backfill";
    pub const STAFF_MANUAL: &str = "staff_manual";
}
