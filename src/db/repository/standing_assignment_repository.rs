use chrono::NaiveDate;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{AssignedFrequency, StandingAssignment};

pub struct StandingAssignmentRepository;

impl StandingAssignmentRepository {
    pub async fn find_by_id(
        pool: &SqlitePool,
        id: &str,
    ) -> Result<Option<StandingAssignment>, sqlx::Error> {
        sqlx::query_as::<_, StandingAssignment>(
            "SELECT * FROM standing_assignments WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn list_active_for_location(
        pool: &SqlitePool,
        location_id: &str,
    ) -> Result<Vec<StandingAssignment>, sqlx::Error> {
        sqlx::query_as::<_, StandingAssignment>(
            r#"
            SELECT * FROM standing_assignments
            WHERE location_id = ? AND is_active = 1
            ORDER BY room_id, weekday, hour
            "#,
        )
        .bind(location_id)
        .fetch_all(pool)
        .await
    }

    /// Active assignments claiming one room/weekday/hour cell. Normally at
    /// most one, but overlapping claims have existed in old data.
    pub async fn list_active_for_cell(
        pool: &SqlitePool,
        room_id: &str,
        weekday: i64,
        hour: i64,
    ) -> Result<Vec<StandingAssignment>, sqlx::Error> {
        sqlx::query_as::<_, StandingAssignment>(
            r#"
            SELECT * FROM standing_assignments
            WHERE room_id = ? AND weekday = ? AND hour = ? AND is_active = 1
            "#,
        )
        .bind(room_id)
        .bind(weekday)
        .bind(hour)
        .fetch_all(pool)
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        pool: &SqlitePool,
        location_id: &str,
        room_id: &str,
        provider_id: &str,
        weekday: i64,
        hour: i64,
        assigned_frequency: AssignedFrequency,
        recurrence_group_id: Option<&str>,
        available_since_date: Option<NaiveDate>,
        created_by: Option<&str>,
    ) -> Result<StandingAssignment, sqlx::Error> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().naive_utc();

        sqlx::query_as::<_, StandingAssignment>(
            r#"
            INSERT INTO standing_assignments
                (id, location_id, room_id, provider_id, weekday, hour,
                 assigned_frequency, recurrence_group_id, available_since_date,
                 is_active, created_by, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(location_id)
        .bind(room_id)
        .bind(provider_id)
        .bind(weekday)
        .bind(hour)
        .bind(assigned_frequency)
        .bind(recurrence_group_id)
        .bind(available_since_date)
        .bind(created_by)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
    }

    pub async fn list_active_by_group(
        pool: &SqlitePool,
        recurrence_group_id: &str,
    ) -> Result<Vec<StandingAssignment>, sqlx::Error> {
        sqlx::query_as::<_, StandingAssignment>(
            r#"
            SELECT * FROM standing_assignments
            WHERE recurrence_group_id = ? AND is_active = 1
            "#,
        )
        .bind(recurrence_group_id)
        .fetch_all(pool)
        .await
    }

    pub async fn deactivate(pool: &SqlitePool, id: &str) -> Result<u64, sqlx::Error> {
        let now = chrono::Utc::now().naive_utc();
        let result = sqlx::query(
            "UPDATE standing_assignments SET is_active = 0, updated_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Deactivates every assignment created by one approval.
    pub async fn deactivate_group(
        pool: &SqlitePool,
        recurrence_group_id: &str,
    ) -> Result<u64, sqlx::Error> {
        let now = chrono::Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            UPDATE standing_assignments SET is_active = 0, updated_at = ?
            WHERE recurrence_group_id = ? AND is_active = 1
            "#,
        )
        .bind(now)
        .bind(recurrence_group_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
