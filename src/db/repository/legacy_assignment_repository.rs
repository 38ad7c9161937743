use chrono::NaiveDateTime;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::LegacyRoomAssignment;

pub struct LegacyAssignmentRepository;

impl LegacyAssignmentRepository {
    /// Rows that have not been backfilled yet and overlap the window, for
    /// any room at the location. A NULL `end_at` is open-ended and overlaps
    /// everything after the row's start.
    pub async fn list_unbackfilled_for_location_window(
        pool: &SqlitePool,
        location_id: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<LegacyRoomAssignment>, sqlx::Error> {
        sqlx::query_as::<_, LegacyRoomAssignment>(
            r#"
            SELECT a.* FROM legacy_room_assignments a
            JOIN rooms r ON r.id = a.room_id
            WHERE r.location_id = ? AND a.backfilled_event_id IS NULL
              AND a.start_at < ?
              AND (a.end_at IS NULL OR a.end_at > ?)
            ORDER BY a.start_at
            "#,
        )
        .bind(location_id)
        .bind(to)
        .bind(from)
        .fetch_all(pool)
        .await
    }

    /// Un-backfilled legacy rows in one room starting before `before`.
    /// A NULL `end_at` is open-ended; the caller treats it as unbounded.
    pub async fn list_unbackfilled_for_room(
        pool: &SqlitePool,
        room_id: &str,
        before: NaiveDateTime,
    ) -> Result<Vec<LegacyRoomAssignment>, sqlx::Error> {
        sqlx::query_as::<_, LegacyRoomAssignment>(
            r#"
            SELECT * FROM legacy_room_assignments
            WHERE room_id = ? AND backfilled_event_id IS NULL AND start_at < ?
            ORDER BY start_at
            "#,
        )
        .bind(room_id)
        .bind(before)
        .fetch_all(pool)
        .await
    }

    pub async fn set_backfilled(
        pool: &SqlitePool,
        id: &str,
        event_id: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE legacy_room_assignments SET backfilled_event_id = ? WHERE id = ?",
        )
        .bind(event_id)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn create(
        pool: &SqlitePool,
        room_id: &str,
        assigned_user_id: &str,
        assignment_type: &str,
        start_at: NaiveDateTime,
        end_at: Option<NaiveDateTime>,
    ) -> Result<LegacyRoomAssignment, sqlx::Error> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().naive_utc();

        sqlx::query_as::<_, LegacyRoomAssignment>(
            r#"
            INSERT INTO legacy_room_assignments
                (id, room_id, assigned_user_id, assignment_type, start_at, end_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(room_id)
        .bind(assigned_user_id)
        .bind(assignment_type)
        .bind(start_at)
        .bind(end_at)
        .bind(now)
        .fetch_one(pool)
        .await
    }
}
