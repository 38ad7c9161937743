use chrono::NaiveDate;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::User;

pub struct UserRepository;

impl UserRepository {
    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_email(
        pool: &SqlitePool,
        email: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ? AND is_active = 1")
            .bind(email)
            .fetch_optional(pool)
            .await
    }

    pub async fn create(
        pool: &SqlitePool,
        email: &str,
        password_hash: &str,
        first_name: &str,
        last_name: &str,
        role: &str,
        calendar_email: Option<&str>,
    ) -> Result<User, sqlx::Error> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().naive_utc();

        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, email, password_hash, first_name, last_name, role,
                               calendar_email, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(email)
        .bind(password_hash)
        .bind(first_name)
        .bind(last_name)
        .bind(role)
        .bind(calendar_email)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
    }

    pub async fn agency_ids_for_user(
        pool: &SqlitePool,
        user_id: &str,
    ) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            "SELECT agency_id FROM user_agencies WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    pub async fn add_to_agency(
        pool: &SqlitePool,
        user_id: &str,
        agency_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT OR IGNORE INTO user_agencies (user_id, agency_id) VALUES (?, ?)")
            .bind(user_id)
            .bind(agency_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// True when the user holds a blocking credential that expired strictly
    /// before `today`. Used as a hard gate on every scheduling surface.
    pub async fn has_blocking_expired_credential(
        pool: &SqlitePool,
        user_id: &str,
        today: NaiveDate,
    ) -> Result<bool, sqlx::Error> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM user_compliance_documents
            WHERE user_id = ? AND is_blocking = 1
              AND expiration_date IS NOT NULL AND expiration_date < ?
            "#,
        )
        .bind(user_id)
        .bind(today)
        .fetch_one(pool)
        .await?;

        Ok(count > 0)
    }

    pub async fn add_compliance_document(
        pool: &SqlitePool,
        user_id: &str,
        name: &str,
        is_blocking: bool,
        expiration_date: Option<NaiveDate>,
    ) -> Result<String, sqlx::Error> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().naive_utc();

        sqlx::query(
            r#"
            INSERT INTO user_compliance_documents (id, user_id, name, is_blocking,
                                                   expiration_date, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(user_id)
        .bind(name)
        .bind(is_blocking)
        .bind(expiration_date)
        .bind(now)
        .execute(pool)
        .await?;

        Ok(id)
    }
}
