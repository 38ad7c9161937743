use chrono::NaiveDateTime;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{BookingRequest, Recurrence, RequestStatus};

pub struct BookingRequestRepository;

impl BookingRequestRepository {
    pub async fn find_by_id(
        pool: &SqlitePool,
        id: &str,
    ) -> Result<Option<BookingRequest>, sqlx::Error> {
        sqlx::query_as::<_, BookingRequest>("SELECT * FROM booking_requests WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        pool: &SqlitePool,
        location_id: &str,
        room_id: Option<&str>,
        requested_provider_id: &str,
        start_at: NaiveDateTime,
        end_at: NaiveDateTime,
        recurrence: Recurrence,
        open_to_alternative_room: bool,
        requester_notes: Option<&str>,
    ) -> Result<BookingRequest, sqlx::Error> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().naive_utc();

        sqlx::query_as::<_, BookingRequest>(
            r#"
            INSERT INTO booking_requests
                (id, location_id, room_id, requested_provider_id, start_at, end_at,
                 recurrence, open_to_alternative_room, requester_notes, status,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'PENDING', ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(location_id)
        .bind(room_id)
        .bind(requested_provider_id)
        .bind(start_at)
        .bind(end_at)
        .bind(recurrence)
        .bind(open_to_alternative_room)
        .bind(requester_notes)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
    }

    pub async fn list_pending_for_location(
        pool: &SqlitePool,
        location_id: &str,
    ) -> Result<Vec<BookingRequest>, sqlx::Error> {
        sqlx::query_as::<_, BookingRequest>(
            r#"
            SELECT * FROM booking_requests
            WHERE location_id = ? AND status = 'PENDING'
            ORDER BY start_at
            "#,
        )
        .bind(location_id)
        .fetch_all(pool)
        .await
    }

    pub async fn list_for_provider(
        pool: &SqlitePool,
        provider_id: &str,
    ) -> Result<Vec<BookingRequest>, sqlx::Error> {
        sqlx::query_as::<_, BookingRequest>(
            r#"
            SELECT * FROM booking_requests
            WHERE requested_provider_id = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(provider_id)
        .fetch_all(pool)
        .await
    }

    /// Records the staff decision. Only moves a request out of PENDING once;
    /// returns the updated row, or None when it was already decided.
    pub async fn mark_decided(
        pool: &SqlitePool,
        id: &str,
        status: RequestStatus,
        decided_by: &str,
        approver_comment: Option<&str>,
    ) -> Result<Option<BookingRequest>, sqlx::Error> {
        let now = chrono::Utc::now().naive_utc();

        sqlx::query_as::<_, BookingRequest>(
            r#"
            UPDATE booking_requests SET
                status = ?, decided_by = ?, decided_at = ?,
                approver_comment = ?, updated_at = ?
            WHERE id = ? AND status = 'PENDING'
            RETURNING *
            "#,
        )
        .bind(status)
        .bind(decided_by)
        .bind(now)
        .bind(approver_comment)
        .bind(now)
        .bind(id)
        .fetch_optional(pool)
        .await
    }
}
