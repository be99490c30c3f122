//! PostgreSQL adapters for the user and session stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::AuthError;
use super::sessions::{SessionStore, check_new_session};
use super::users::UserStore;
use crate::models::auth::{NewUser, Session, User};

type UserRow = (
    Uuid,
    String,
    String,
    String,
    bool,
    bool,
    Option<DateTime<Utc>>,
    DateTime<Utc>,
    Vec<String>,
);

type SessionRow = (
    Uuid,
    Uuid,
    String,
    String,
    String,
    String,
    DateTime<Utc>,
    DateTime<Utc>,
    DateTime<Utc>,
);

const USER_COLUMNS: &str = "u.id, u.username, u.email, u.password_hash, u.is_active, \
     u.is_verified, u.last_login_at, u.created_at, \
     COALESCE(ARRAY(SELECT r.role FROM user_roles r WHERE r.user_id = u.id ORDER BY r.role), \
              '{}'::text[])";

const SESSION_COLUMNS: &str = "id, user_id, refresh_token_hash, device, remote_addr, \
     user_agent, expires_at, created_at, last_used_at";

fn user_from_row(row: UserRow) -> User {
    let (id, username, email, password_hash, is_active, is_verified, last_login_at, created_at, roles) =
        row;
    User {
        id,
        username,
        email,
        password_hash,
        is_active,
        is_verified,
        last_login_at,
        created_at,
        roles,
    }
}

fn session_from_row(row: SessionRow) -> Session {
    let (id, user_id, refresh_token_hash, device, remote_addr, user_agent, expires_at, created_at, last_used_at) =
        row;
    Session {
        id,
        user_id,
        refresh_token_hash,
        device,
        remote_addr,
        user_agent,
        expires_at,
        created_at,
        last_used_at,
    }
}

/// Map unique violations to `Conflict`; everything else stays a db error.
fn conflict_or_db(e: sqlx::Error, what: &str) -> AuthError {
    match e.as_database_error() {
        Some(db) if db.is_unique_violation() => AuthError::Conflict(format!("{what} already exists")),
        _ => AuthError::DbError(e),
    }
}

fn ensure_affected(rows: u64, what: impl FnOnce() -> String) -> Result<(), AuthError> {
    if rows == 0 {
        return Err(AuthError::NotFound(what()));
    }
    Ok(())
}

/// User store over PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_one(&self, predicate: &str, value: &str) -> Result<Option<User>, AuthError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users u WHERE {predicate} = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(user_from_row))
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, new: NewUser) -> Result<User, AuthError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO users (id, username, email, password_hash) VALUES ($1, $2, $3, $4)",
        )
        .bind(new.id)
        .bind(&new.username)
        .bind(&new.email)
        .bind(&new.password_hash)
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_or_db(e, "username or email"))?;

        for role in &new.roles {
            sqlx::query(
                "INSERT INTO user_roles (user_id, role) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(new.id)
            .bind(role)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        self.get(new.id).await
    }

    async fn get(&self, id: Uuid) -> Result<User, AuthError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(user_from_row)
            .ok_or_else(|| AuthError::NotFound(format!("user {id}")))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AuthError> {
        self.find_one("u.username", username).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        self.find_one("u.email", email).await
    }

    async fn count(&self) -> Result<i64, AuthError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), AuthError> {
        let result = sqlx::query(
            "UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.pool)
        .await?;
        ensure_affected(result.rows_affected(), || format!("user {id}"))
    }

    async fn update_profile(
        &self,
        id: Uuid,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<User, AuthError> {
        let result = sqlx::query(
            "UPDATE users SET username = COALESCE($2, username), \
             email = COALESCE($3, email), updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(username)
        .bind(email)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or_db(e, "username or email"))?;
        ensure_affected(result.rows_affected(), || format!("user {id}"))?;
        self.get(id).await
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), AuthError> {
        let result =
            sqlx::query("UPDATE users SET is_active = $2, updated_at = now() WHERE id = $1")
                .bind(id)
                .bind(active)
                .execute(&self.pool)
                .await?;
        ensure_affected(result.rows_affected(), || format!("user {id}"))
    }

    async fn touch_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AuthError> {
        let result = sqlx::query("UPDATE users SET last_login_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        ensure_affected(result.rows_affected(), || format!("user {id}"))
    }

    async fn grant_role(&self, id: Uuid, role: &str) -> Result<(), AuthError> {
        sqlx::query("INSERT INTO user_roles (user_id, role) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(id)
            .bind(role)
            .execute(&self.pool)
            .await
            .map_err(|e| match e.as_database_error() {
                Some(db) if db.is_foreign_key_violation() => {
                    AuthError::NotFound(format!("user {id}"))
                }
                _ => AuthError::DbError(e),
            })?;
        Ok(())
    }

    async fn revoke_role(&self, id: Uuid, role: &str) -> Result<(), AuthError> {
        sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND role = $2")
            .bind(id)
            .bind(role)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn revoke_role_everywhere(&self, role: &str) -> Result<u64, AuthError> {
        let result = sqlx::query("DELETE FROM user_roles WHERE role = $1")
            .bind(role)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list_grants(&self) -> Result<Vec<(Uuid, String)>, AuthError> {
        let rows = sqlx::query_as::<_, (Uuid, String)>("SELECT user_id, role FROM user_roles")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn delete(&self, id: Uuid) -> Result<(), AuthError> {
        // Sessions and grants cascade.
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        ensure_affected(result.rows_affected(), || format!("user {id}"))
    }
}

/// Session store over PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one(&self, predicate: &str, bind: SessionKey<'_>) -> Result<Option<Session>, AuthError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE {predicate} = $1");
        let query = sqlx::query_as::<_, SessionRow>(&sql);
        let row = match bind {
            SessionKey::Id(id) => query.bind(id).fetch_optional(&self.pool).await?,
            SessionKey::Hash(hash) => query.bind(hash).fetch_optional(&self.pool).await?,
        };
        Ok(row.map(session_from_row))
    }
}

enum SessionKey<'a> {
    Id(Uuid),
    Hash(&'a str),
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, session: Session) -> Result<Session, AuthError> {
        check_new_session(&session)?;
        sqlx::query(
            "INSERT INTO sessions (id, user_id, refresh_token_hash, device, remote_addr, \
             user_agent, expires_at, created_at, last_used_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(&session.refresh_token_hash)
        .bind(&session.device)
        .bind(&session.remote_addr)
        .bind(&session.user_agent)
        .bind(session.expires_at)
        .bind(session.created_at)
        .bind(session.last_used_at)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or_db(e, "refresh token"))?;
        Ok(session)
    }

    async fn by_refresh(&self, token_hash: &str) -> Result<Session, AuthError> {
        self.fetch_one("refresh_token_hash", SessionKey::Hash(token_hash))
            .await?
            .ok_or_else(|| AuthError::NotFound("session".into()))
    }

    async fn by_id(&self, id: Uuid) -> Result<Session, AuthError> {
        self.fetch_one("id", SessionKey::Id(id))
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("session {id}")))
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Session>, AuthError> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE user_id = $1 ORDER BY created_at DESC"
        );
        let rows = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(session_from_row).collect())
    }

    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AuthError> {
        let result = sqlx::query("UPDATE sessions SET last_used_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        ensure_affected(result.rows_affected(), || format!("session {id}"))
    }

    async fn rotate(&self, id: Uuid, old_hash: &str, new_hash: &str) -> Result<(), AuthError> {
        let result = sqlx::query(
            "UPDATE sessions SET refresh_token_hash = $3 \
             WHERE id = $1 AND refresh_token_hash = $2",
        )
        .bind(id)
        .bind(old_hash)
        .bind(new_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or_db(e, "refresh token"))?;
        ensure_affected(result.rows_affected(), || format!("session {id}"))
    }

    async fn delete(&self, id: Uuid) -> Result<(), AuthError> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_for_user(&self, user_id: Uuid) -> Result<u64, AuthError> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
