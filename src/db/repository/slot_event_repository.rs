use chrono::NaiveDateTime;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{event_source, SlotEvent, SlotState, SyncStatus};

pub struct SlotEventRepository;

/// Everything needed to write a booked slot row.
#[derive(Debug, Clone)]
pub struct NewSlotBooking {
    pub location_id: String,
    pub room_id: String,
    pub start_at: NaiveDateTime,
    pub end_at: NaiveDateTime,
    pub booked_provider_id: String,
    pub standing_assignment_id: Option<String>,
    pub booking_plan_id: Option<String>,
    pub recurrence_group_id: Option<String>,
    pub source: String,
    pub notes: Option<String>,
    pub created_by: Option<String>,
    pub approved_by: Option<String>,
}

/// Result of the exclusive booking write. `Conflict` carries the event that
/// already occupies the slot.
#[derive(Debug)]
pub enum BookOutcome {
    Booked(SlotEvent),
    Conflict(SlotEvent),
}

impl SlotEventRepository {
    pub async fn find_by_id(
        pool: &SqlitePool,
        id: &str,
    ) -> Result<Option<SlotEvent>, sqlx::Error> {
        sqlx::query_as::<_, SlotEvent>("SELECT * FROM slot_events WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Non-cancelled events overlapping [from, to). Multi-hour events that
    /// start before the window still count.
    pub async fn list_for_location_window(
        pool: &SqlitePool,
        location_id: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<SlotEvent>, sqlx::Error> {
        sqlx::query_as::<_, SlotEvent>(
            r#"
            SELECT * FROM slot_events
            WHERE location_id = ? AND start_at < ? AND end_at > ?
              AND slot_state != 'CANCELLED'
            ORDER BY room_id, start_at
            "#,
        )
        .bind(location_id)
        .bind(to)
        .bind(from)
        .fetch_all(pool)
        .await
    }

    /// Non-cancelled events overlapping [start_at, end_at) in one room.
    pub async fn list_occupying_overlaps(
        pool: &SqlitePool,
        room_id: &str,
        start_at: NaiveDateTime,
        end_at: NaiveDateTime,
    ) -> Result<Vec<SlotEvent>, sqlx::Error> {
        sqlx::query_as::<_, SlotEvent>(
            r#"
            SELECT * FROM slot_events
            WHERE room_id = ? AND start_at < ? AND end_at > ?
              AND slot_state != 'CANCELLED'
            ORDER BY start_at
            "#,
        )
        .bind(room_id)
        .bind(end_at)
        .bind(start_at)
        .fetch_all(pool)
        .await
    }

    /// Idempotent write used by the materializer. A fresh slot is inserted;
    /// re-running over a slot the materializer already wrote updates it in
    /// place. Rows from any other source are left untouched, so a manual
    /// booking is never downgraded by re-materialization.
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_materialized(
        pool: &SqlitePool,
        location_id: &str,
        room_id: &str,
        start_at: NaiveDateTime,
        end_at: NaiveDateTime,
        slot_state: SlotState,
        standing_assignment_id: &str,
        booking_plan_id: Option<&str>,
        recurrence_group_id: Option<&str>,
        assigned_provider_id: &str,
        booked_provider_id: Option<&str>,
    ) -> Result<Option<SlotEvent>, sqlx::Error> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().naive_utc();

        sqlx::query_as::<_, SlotEvent>(
            r#"
            INSERT INTO slot_events
                (id, location_id, room_id, start_at, end_at, slot_state,
                 standing_assignment_id, booking_plan_id, recurrence_group_id,
                 assigned_provider_id, booked_provider_id, source,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (room_id, start_at, end_at) DO UPDATE SET
                slot_state = excluded.slot_state,
                standing_assignment_id = excluded.standing_assignment_id,
                booking_plan_id = excluded.booking_plan_id,
                recurrence_group_id = excluded.recurrence_group_id,
                assigned_provider_id = excluded.assigned_provider_id,
                booked_provider_id = excluded.booked_provider_id,
                updated_at = excluded.updated_at
            WHERE slot_events.source = 'materializer'
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(location_id)
        .bind(room_id)
        .bind(start_at)
        .bind(end_at)
        .bind(slot_state)
        .bind(standing_assignment_id)
        .bind(booking_plan_id)
        .bind(recurrence_group_id)
        .bind(assigned_provider_id)
        .bind(booked_provider_id)
        .bind(event_source::MATERIALIZER)
        .bind(now)
        .bind(now)
        .fetch_optional(pool)
        .await
    }

    /// Books a slot with the overlap check and the write inside one
    /// transaction, so two concurrent callers cannot both succeed.
    ///
    /// An existing materialized availability (or a cancelled tombstone) for
    /// the exact slot is converted in place; a booked or held slot reports
    /// `Conflict`.
    pub async fn book_exclusive(
        pool: &SqlitePool,
        booking: &NewSlotBooking,
    ) -> Result<BookOutcome, sqlx::Error> {
        let now = chrono::Utc::now().naive_utc();
        let mut tx = pool.begin().await?;

        let overlaps = sqlx::query_as::<_, SlotEvent>(
            r#"
            SELECT * FROM slot_events
            WHERE room_id = ? AND start_at < ? AND end_at > ?
              AND slot_state != 'CANCELLED'
            ORDER BY start_at
            "#,
        )
        .bind(&booking.room_id)
        .bind(booking.end_at)
        .bind(booking.start_at)
        .fetch_all(&mut *tx)
        .await?;

        let mut exact_available: Option<SlotEvent> = None;
        for event in overlaps {
            let exact =
                event.start_at == booking.start_at && event.end_at == booking.end_at;
            if exact && event.slot_state == SlotState::AssignedAvailable {
                exact_available = Some(event);
            } else {
                tx.rollback().await?;
                return Ok(BookOutcome::Conflict(event));
            }
        }

        let event = if let Some(existing) = exact_available {
            sqlx::query_as::<_, SlotEvent>(
                r#"
                UPDATE slot_events SET
                    slot_state = 'ASSIGNED_BOOKED',
                    booked_provider_id = ?,
                    booking_plan_id = COALESCE(?, booking_plan_id),
                    recurrence_group_id = COALESCE(?, recurrence_group_id),
                    source = ?,
                    notes = COALESCE(?, notes),
                    approved_by = ?,
                    updated_at = ?
                WHERE id = ?
                RETURNING *
                "#,
            )
            .bind(&booking.booked_provider_id)
            .bind(&booking.booking_plan_id)
            .bind(&booking.recurrence_group_id)
            .bind(&booking.source)
            .bind(&booking.notes)
            .bind(&booking.approved_by)
            .bind(now)
            .bind(&existing.id)
            .fetch_one(&mut *tx)
            .await?
        } else {
            let id = Uuid::new_v4().to_string();
            let inserted = sqlx::query_as::<_, SlotEvent>(
                r#"
                INSERT INTO slot_events
                    (id, location_id, room_id, start_at, end_at, slot_state,
                     standing_assignment_id, booking_plan_id, recurrence_group_id,
                     booked_provider_id, source, notes, created_by, approved_by,
                     created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, 'ASSIGNED_BOOKED', ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (room_id, start_at, end_at) DO UPDATE SET
                    slot_state = 'ASSIGNED_BOOKED',
                    booked_provider_id = excluded.booked_provider_id,
                    source = excluded.source,
                    notes = excluded.notes,
                    approved_by = excluded.approved_by,
                    updated_at = excluded.updated_at
                WHERE slot_events.slot_state = 'CANCELLED'
                RETURNING *
                "#,
            )
            .bind(&id)
            .bind(&booking.location_id)
            .bind(&booking.room_id)
            .bind(booking.start_at)
            .bind(booking.end_at)
            .bind(&booking.standing_assignment_id)
            .bind(&booking.booking_plan_id)
            .bind(&booking.recurrence_group_id)
            .bind(&booking.booked_provider_id)
            .bind(&booking.source)
            .bind(&booking.notes)
            .bind(&booking.created_by)
            .bind(&booking.approved_by)
            .bind(now)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await?;

            match inserted {
                Some(event) => event,
                // A non-cancelled row landed on the key after the overlap
                // scan. Report it as the conflicting occupant.
                None => {
                    tx.rollback().await?;
                    let existing = sqlx::query_as::<_, SlotEvent>(
                        "SELECT * FROM slot_events WHERE room_id = ? AND start_at = ? AND end_at = ?",
                    )
                    .bind(&booking.room_id)
                    .bind(booking.start_at)
                    .bind(booking.end_at)
                    .fetch_optional(pool)
                    .await?;
                    return match existing {
                        Some(event) => Ok(BookOutcome::Conflict(event)),
                        None => Err(sqlx::Error::RowNotFound),
                    };
                }
            }
        };

        tx.commit().await?;
        Ok(BookOutcome::Booked(event))
    }

    /// Non-cancelled events in a recurrence group starting at or after
    /// `from`, oldest first.
    pub async fn list_group_from(
        pool: &SqlitePool,
        recurrence_group_id: &str,
        from: NaiveDateTime,
    ) -> Result<Vec<SlotEvent>, sqlx::Error> {
        sqlx::query_as::<_, SlotEvent>(
            r#"
            SELECT * FROM slot_events
            WHERE recurrence_group_id = ? AND start_at >= ?
              AND slot_state != 'CANCELLED'
            ORDER BY start_at
            "#,
        )
        .bind(recurrence_group_id)
        .bind(from)
        .fetch_all(pool)
        .await
    }

    pub async fn cancel(pool: &SqlitePool, id: &str) -> Result<u64, sqlx::Error> {
        let now = chrono::Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            UPDATE slot_events SET slot_state = 'CANCELLED', updated_at = ?
            WHERE id = ? AND slot_state != 'CANCELLED'
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Cancels every future occurrence in a recurrence group, the given
    /// event included.
    pub async fn cancel_group_from(
        pool: &SqlitePool,
        recurrence_group_id: &str,
        from: NaiveDateTime,
    ) -> Result<u64, sqlx::Error> {
        let now = chrono::Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            UPDATE slot_events SET slot_state = 'CANCELLED', updated_at = ?
            WHERE recurrence_group_id = ? AND start_at >= ?
              AND slot_state != 'CANCELLED'
            "#,
        )
        .bind(now)
        .bind(recurrence_group_id)
        .bind(from)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Direct insert for backfill and manual writes that bypass the booking
    /// path. Fails on a slot collision instead of upserting.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert(
        pool: &SqlitePool,
        location_id: &str,
        room_id: &str,
        start_at: NaiveDateTime,
        end_at: NaiveDateTime,
        slot_state: SlotState,
        assigned_provider_id: Option<&str>,
        booked_provider_id: Option<&str>,
        source: &str,
        notes: Option<&str>,
    ) -> Result<SlotEvent, sqlx::Error> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().naive_utc();

        sqlx::query_as::<_, SlotEvent>(
            r#"
            INSERT INTO slot_events
                (id, location_id, room_id, start_at, end_at, slot_state,
                 assigned_provider_id, booked_provider_id, source, notes,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(location_id)
        .bind(room_id)
        .bind(start_at)
        .bind(end_at)
        .bind(slot_state)
        .bind(assigned_provider_id)
        .bind(booked_provider_id)
        .bind(source)
        .bind(notes)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
    }

    pub async fn mark_sync_pending(pool: &SqlitePool, id: &str) -> Result<(), sqlx::Error> {
        let now = chrono::Utc::now().naive_utc();
        sqlx::query(
            r#"
            UPDATE slot_events SET sync_status = 'PENDING', sync_error = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn mark_synced(
        pool: &SqlitePool,
        id: &str,
        external_event_id: &str,
        external_calendar_id: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        let now = chrono::Utc::now().naive_utc();
        sqlx::query(
            r#"
            UPDATE slot_events SET
                sync_status = 'SYNCED', sync_error = NULL,
                external_event_id = ?, external_calendar_id = ?,
                synced_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(external_event_id)
        .bind(external_calendar_id)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn mark_sync_failed(
        pool: &SqlitePool,
        id: &str,
        reason: &str,
    ) -> Result<(), sqlx::Error> {
        let now = chrono::Utc::now().naive_utc();
        sqlx::query(
            r#"
            UPDATE slot_events SET sync_status = 'FAILED', sync_error = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(reason)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Drops the external linkage after the mirrored calendar event is gone.
    pub async fn clear_sync(pool: &SqlitePool, id: &str) -> Result<(), sqlx::Error> {
        let now = chrono::Utc::now().naive_utc();
        sqlx::query(
            r#"
            UPDATE slot_events SET
                external_event_id = NULL, external_calendar_id = NULL,
                sync_status = NULL, sync_error = NULL, synced_at = NULL,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Failed syncs still worth retrying: the slot is booked and not in the
    /// past relative to `from`.
    pub async fn list_sync_failed(
        pool: &SqlitePool,
        from: NaiveDateTime,
    ) -> Result<Vec<SlotEvent>, sqlx::Error> {
        sqlx::query_as::<_, SlotEvent>(
            r#"
            SELECT * FROM slot_events
            WHERE sync_status = 'FAILED' AND slot_state = 'ASSIGNED_BOOKED'
              AND start_at >= ?
            ORDER BY start_at
            "#,
        )
        .bind(from)
        .fetch_all(pool)
        .await
    }

    pub async fn count_by_sync_status(
        pool: &SqlitePool,
        status: SyncStatus,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM slot_events WHERE sync_status = ?",
        )
        .bind(status)
        .fetch_one(pool)
        .await
    }
}
