use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::ApiError;
use crate::users::repo_types::{NewUser, User};

const USER_COLUMNS: &str = "id, email, first_name, last_name, password_hash, \
     is_active, is_staff, is_superuser, created_at, updated_at";

impl User {
    /// Insert a new user. Email uniqueness is enforced by the database
    /// constraint; a duplicate surfaces as `email_taken`.
    pub async fn create(db: &PgPool, new: NewUser) -> Result<User, ApiError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (email, first_name, last_name, password_hash, is_active, is_staff)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {USER_COLUMNS}
            "#,
        ))
        .bind(&new.email)
        .bind(&new.first_name)
        .bind(&new.last_name)
        .bind(&new.password_hash)
        .bind(new.is_active)
        .bind(new.is_staff)
        .fetch_one(db)
        .await?;
        Ok(user)
    }

    /// Find a user by (already lowercased) email.
    pub async fn find_by_email(db: &PgPool, email: &str) -> Result<Option<User>, ApiError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"SELECT {USER_COLUMNS} FROM users WHERE email = $1"#,
        ))
        .bind(email)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> Result<Option<User>, ApiError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"SELECT {USER_COLUMNS} FROM users WHERE id = $1"#,
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn get(db: &PgPool, id: Uuid) -> Result<User, ApiError> {
        Self::find_by_id(db, id).await?.ok_or(ApiError::NotFound("user"))
    }

    pub async fn list(db: &PgPool) -> Result<Vec<User>, ApiError> {
        let users = sqlx::query_as::<_, User>(&format!(
            r#"SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC"#,
        ))
        .fetch_all(db)
        .await?;
        Ok(users)
    }

    /// Persist profile fields (and optionally a new password hash) for one
    /// user. Every write refreshes `updated_at`.
    pub async fn update(
        db: &PgPool,
        id: Uuid,
        email: &str,
        first_name: Option<&str>,
        last_name: Option<&str>,
        password_hash: Option<&str>,
    ) -> Result<User, ApiError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET email = $2, first_name = $3, last_name = $4, password_hash = $5,
                updated_at = now()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#,
        ))
        .bind(id)
        .bind(email)
        .bind(first_name)
        .bind(last_name)
        .bind(password_hash)
        .fetch_one(db)
        .await?;
        Ok(user)
    }

    pub async fn set_password(
        db: &PgPool,
        id: Uuid,
        password_hash: &str,
    ) -> Result<User, ApiError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users SET password_hash = $2, updated_at = now()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#,
        ))
        .bind(id)
        .bind(password_hash)
        .fetch_one(db)
        .await?;
        Ok(user)
    }

    pub async fn activate(db: &PgPool, id: Uuid) -> Result<User, ApiError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users SET is_active = TRUE, updated_at = now()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#,
        ))
        .bind(id)
        .fetch_one(db)
        .await?;
        Ok(user)
    }

    pub async fn delete(db: &PgPool, id: Uuid) -> Result<(), ApiError> {
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }
}

/// Mark a refresh token id as used, returning whether this was its first
/// use. The insert is the atomicity point: of two concurrent presentations
/// of the same jti, exactly one sees `true`. Expired entries are purged
/// opportunistically on each call.
pub async fn consume_refresh_jti(
    db: &PgPool,
    jti: Uuid,
    expires_at: OffsetDateTime,
) -> Result<bool, ApiError> {
    sqlx::query("DELETE FROM revoked_refresh_tokens WHERE expires_at < now()")
        .execute(db)
        .await?;
    let result = sqlx::query(
        r#"
        INSERT INTO revoked_refresh_tokens (jti, expires_at)
        VALUES ($1, $2)
        ON CONFLICT (jti) DO NOTHING
        "#,
    )
    .bind(jti)
    .bind(expires_at)
    .execute(db)
    .await?;
    Ok(result.rows_affected() > 0)
}
