use chrono::NaiveDateTime;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{ProviderIntakeSlot, SessionKind};

pub struct IntakeSlotRepository;

impl IntakeSlotRepository {
    /// Enables an intake marker for a provider/hour, reviving a previously
    /// disabled row if one exists for the same slot and kind.
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert(
        pool: &SqlitePool,
        agency_id: &str,
        provider_id: &str,
        location_id: &str,
        room_id: Option<&str>,
        start_at: NaiveDateTime,
        end_at: NaiveDateTime,
        session_kind: SessionKind,
        source_event_id: Option<&str>,
        created_by: Option<&str>,
    ) -> Result<ProviderIntakeSlot, sqlx::Error> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().naive_utc();

        sqlx::query_as::<_, ProviderIntakeSlot>(
            r#"
            INSERT INTO provider_intake_slots
                (id, agency_id, provider_id, location_id, room_id, start_at, end_at,
                 session_kind, source_event_id, is_active, created_by,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?)
            ON CONFLICT (provider_id, start_at, end_at, session_kind) DO UPDATE SET
                is_active = 1,
                room_id = excluded.room_id,
                source_event_id = excluded.source_event_id,
                updated_at = excluded.updated_at
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(agency_id)
        .bind(provider_id)
        .bind(location_id)
        .bind(room_id)
        .bind(start_at)
        .bind(end_at)
        .bind(session_kind)
        .bind(source_event_id)
        .bind(created_by)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
    }

    pub async fn deactivate_for_event(
        pool: &SqlitePool,
        source_event_id: &str,
        session_kind: SessionKind,
    ) -> Result<u64, sqlx::Error> {
        let now = chrono::Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            UPDATE provider_intake_slots SET is_active = 0, updated_at = ?
            WHERE source_event_id = ? AND session_kind = ? AND is_active = 1
            "#,
        )
        .bind(now)
        .bind(source_event_id)
        .bind(session_kind)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Active markers overlapping the window at one location, used to flag
    /// grid cells.
    pub async fn list_active_for_location_window(
        pool: &SqlitePool,
        location_id: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<ProviderIntakeSlot>, sqlx::Error> {
        sqlx::query_as::<_, ProviderIntakeSlot>(
            r#"
            SELECT * FROM provider_intake_slots
            WHERE location_id = ? AND is_active = 1
              AND start_at >= ? AND start_at < ?
            ORDER BY start_at
            "#,
        )
        .bind(location_id)
        .bind(from)
        .bind(to)
        .fetch_all(pool)
        .await
    }
}
