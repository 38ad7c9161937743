use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::Room;

pub struct RoomRepository;

impl RoomRepository {
    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> Result<Option<Room>, sqlx::Error> {
        sqlx::query_as::<_, Room>("SELECT * FROM rooms WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_active_for_location(
        pool: &SqlitePool,
        location_id: &str,
    ) -> Result<Vec<Room>, sqlx::Error> {
        sqlx::query_as::<_, Room>(
            r#"
            SELECT * FROM rooms
            WHERE location_id = ? AND is_active = 1
            ORDER BY sort_order, room_number, name
            "#,
        )
        .bind(location_id)
        .fetch_all(pool)
        .await
    }

    pub async fn create(
        pool: &SqlitePool,
        location_id: &str,
        name: &str,
        room_number: Option<i64>,
        resource_email: Option<&str>,
    ) -> Result<Room, sqlx::Error> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().naive_utc();

        sqlx::query_as::<_, Room>(
            r#"
            INSERT INTO rooms (id, location_id, name, room_number, label, sort_order,
                               resource_email, is_active, created_at)
            VALUES (?, ?, ?, ?, NULL, ?, ?, 1, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(location_id)
        .bind(name)
        .bind(room_number)
        .bind(room_number.unwrap_or(0))
        .bind(resource_email)
        .bind(now)
        .fetch_one(pool)
        .await
    }
}
