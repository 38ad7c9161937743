use chrono::NaiveDate;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{BookedFrequency, BookingPlan};

pub struct BookingPlanRepository;

impl BookingPlanRepository {
    pub async fn active_for_assignment(
        pool: &SqlitePool,
        standing_assignment_id: &str,
    ) -> Result<Option<BookingPlan>, sqlx::Error> {
        sqlx::query_as::<_, BookingPlan>(
            r#"
            SELECT * FROM booking_plans
            WHERE standing_assignment_id = ? AND is_active = 1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(standing_assignment_id)
        .fetch_optional(pool)
        .await
    }

    /// Inserts a new plan for an assignment, retiring any active plan first
    /// so at most one stays live.
    pub async fn create_active(
        pool: &SqlitePool,
        standing_assignment_id: &str,
        booked_frequency: BookedFrequency,
        booking_start_date: NaiveDate,
        active_until_date: Option<NaiveDate>,
        occurrence_count: Option<i64>,
        created_by: Option<&str>,
    ) -> Result<BookingPlan, sqlx::Error> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().naive_utc();

        let mut tx = pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE booking_plans SET is_active = 0, updated_at = ?
            WHERE standing_assignment_id = ? AND is_active = 1
            "#,
        )
        .bind(now)
        .bind(standing_assignment_id)
        .execute(&mut *tx)
        .await?;

        let plan = sqlx::query_as::<_, BookingPlan>(
            r#"
            INSERT INTO booking_plans
                (id, standing_assignment_id, booked_frequency, booking_start_date,
                 active_until_date, occurrence_count, is_active, created_by,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(standing_assignment_id)
        .bind(booked_frequency)
        .bind(booking_start_date)
        .bind(active_until_date)
        .bind(occurrence_count)
        .bind(created_by)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(plan)
    }

    pub async fn deactivate(pool: &SqlitePool, id: &str) -> Result<u64, sqlx::Error> {
        let now = chrono::Utc::now().naive_utc();
        let result =
            sqlx::query("UPDATE booking_plans SET is_active = 0, updated_at = ? WHERE id = ?")
                .bind(now)
                .bind(id)
                .execute(pool)
                .await?;
        Ok(result.rows_affected())
    }
}
