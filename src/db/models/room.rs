use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A bookable room. `location_id` never changes for the lifetime of a row;
/// access checks rely on it as a security boundary.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub location_id: String,
    pub name: String,
    pub room_number: Option<i64>,
    pub label: Option<String>,
    pub sort_order: i64,
    /// External calendar resource address for the room (sync adapter).
    pub resource_email: Option<String>,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
}
