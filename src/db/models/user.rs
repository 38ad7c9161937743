use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    /// External calendar address used by the sync adapter when mirroring
    /// booked slots to the provider's calendar.
    pub calendar_email: Option<String>,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl User {
    pub fn is_super_admin(&self) -> bool {
        self.role == "super_admin"
    }

    /// Roles allowed to approve/deny requests and cancel schedule events.
    pub fn can_manage_schedule(&self) -> bool {
        matches!(self.role.as_str(), "staff" | "admin" | "super_admin")
    }

    pub fn initials(&self) -> String {
        let f = self.first_name.chars().next().unwrap_or_default();
        let l = self.last_name.chars().next().unwrap_or_default();
        format!("{}{}", f, l).to_uppercase()
    }

    pub fn display_name(&self) -> String {
        let li = self.last_name.chars().next();
        match li {
            Some(c) => format!("{} {}.", self.first_name, c),
            None => self.first_name.clone(),
        }
    }
}
