use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::Location;

pub struct LocationRepository;

impl LocationRepository {
    pub async fn find_by_id(
        pool: &SqlitePool,
        id: &str,
    ) -> Result<Option<Location>, sqlx::Error> {
        sqlx::query_as::<_, Location>("SELECT * FROM locations WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_active(pool: &SqlitePool) -> Result<Vec<Location>, sqlx::Error> {
        sqlx::query_as::<_, Location>(
            "SELECT * FROM locations WHERE is_active = 1 ORDER BY name",
        )
        .fetch_all(pool)
        .await
    }

    /// Locations visible to a user through the agencies they belong to.
    pub async fn list_for_user(
        pool: &SqlitePool,
        user_id: &str,
    ) -> Result<Vec<Location>, sqlx::Error> {
        sqlx::query_as::<_, Location>(
            r#"
            SELECT DISTINCT l.* FROM locations l
            JOIN location_agencies la ON la.location_id = l.id
            JOIN user_agencies ua ON ua.agency_id = la.agency_id
            WHERE ua.user_id = ? AND l.is_active = 1
            ORDER BY l.name
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    pub async fn user_has_access(
        pool: &SqlitePool,
        user_id: &str,
        location_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM location_agencies la
            JOIN user_agencies ua ON ua.agency_id = la.agency_id
            WHERE la.location_id = ? AND ua.user_id = ?
            "#,
        )
        .bind(location_id)
        .bind(user_id)
        .fetch_one(pool)
        .await?;

        Ok(count > 0)
    }

    pub async fn create(
        pool: &SqlitePool,
        name: &str,
        timezone: &str,
    ) -> Result<Location, sqlx::Error> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().naive_utc();

        sqlx::query_as::<_, Location>(
            r#"
            INSERT INTO locations (id, name, timezone, is_active, created_at, updated_at)
            VALUES (?, ?, ?, 1, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(name)
        .bind(timezone)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
    }

    pub async fn link_agency(
        pool: &SqlitePool,
        location_id: &str,
        agency_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT OR IGNORE INTO location_agencies (location_id, agency_id) VALUES (?, ?)",
        )
        .bind(location_id)
        .bind(agency_id)
        .execute(pool)
        .await?;
        Ok(())
    }
}
