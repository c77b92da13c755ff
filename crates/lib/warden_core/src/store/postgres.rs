//! PostgreSQL-backed stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{AttemptFilter, AttemptWindow, LoginAttemptStore, StoreError, UserStore};
use crate::models::auth::{LoginAttempt, NewUser, UserChanges, UserRecord};
use crate::uuid::uuidv7;

type UserRow = (
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    DateTime<Utc>,
    DateTime<Utc>,
);

const USER_COLUMNS: &str =
    "id::text, email, username, name, password_hash, created_at, updated_at";

fn record_from_row(row: UserRow) -> UserRecord {
    let (id, email, username, name, password_hash, created_at, updated_at) = row;
    UserRecord {
        id,
        email,
        username,
        name,
        password_hash,
        created_at,
        updated_at,
    }
}

/// `UserStore` over the `users` table.
#[derive(Debug, Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<UserRecord>, StoreError> {
        // Ids that are not UUIDs cannot exist; skip the round-trip and the cast error.
        if uuid::Uuid::parse_str(id).is_err() {
            return Ok(None);
        }
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1::uuid");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(record_from_row))
    }

    async fn find_by_email_or_username(
        &self,
        value: &str,
    ) -> Result<Option<UserRecord>, StoreError> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 OR username = $1 \
             ORDER BY (email = $1) DESC LIMIT 1"
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(record_from_row))
    }

    async fn create(&self, user: NewUser) -> Result<UserRecord, StoreError> {
        let sql = format!(
            "INSERT INTO users (id, email, username, name, password_hash) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(uuidv7())
            .bind(&user.email)
            .bind(&user.username)
            .bind(&user.name)
            .bind(&user.password_hash)
            .fetch_one(&self.pool)
            .await?;
        Ok(record_from_row(row))
    }

    async fn update(&self, id: &str, changes: UserChanges) -> Result<UserRecord, StoreError> {
        if uuid::Uuid::parse_str(id).is_err() {
            return Err(StoreError::NotFound);
        }
        let (set_name, name) = match changes.name {
            Some(name) => (true, name),
            None => (false, None),
        };
        let sql = format!(
            "UPDATE users SET \
               email = COALESCE($2, email), \
               username = COALESCE($3, username), \
               name = CASE WHEN $4 THEN $5 ELSE name END, \
               password_hash = COALESCE($6, password_hash), \
               updated_at = now() \
             WHERE id = $1::uuid RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .bind(&changes.email)
            .bind(&changes.username)
            .bind(set_name)
            .bind(&name)
            .bind(&changes.password_hash)
            .fetch_optional(&self.pool)
            .await?;
        row.map(record_from_row).ok_or(StoreError::NotFound)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        if uuid::Uuid::parse_str(id).is_err() {
            return Err(StoreError::NotFound);
        }
        let result = sqlx::query("DELETE FROM users WHERE id = $1::uuid")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

/// `LoginAttemptStore` over the `login_attempts` table.
#[derive(Debug, Clone)]
pub struct PgLoginAttemptStore {
    pool: PgPool,
}

impl PgLoginAttemptStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LoginAttemptStore for PgLoginAttemptStore {
    async fn count_since(
        &self,
        filter: AttemptFilter<'_>,
        since: DateTime<Utc>,
    ) -> Result<AttemptWindow, StoreError> {
        let (sql, key) = match filter {
            AttemptFilter::FailedForIdentifier(identifier) => (
                "SELECT COUNT(*), MIN(created_at) FROM login_attempts \
                 WHERE identifier = $1 AND success = false AND created_at > $2",
                identifier,
            ),
            AttemptFilter::FromIp(ip) => (
                "SELECT COUNT(*), MIN(created_at) FROM login_attempts \
                 WHERE ip_address = $1 AND created_at > $2",
                ip,
            ),
        };
        let (count, earliest) = sqlx::query_as::<_, (i64, Option<DateTime<Utc>>)>(sql)
            .bind(key)
            .bind(since)
            .fetch_one(&self.pool)
            .await?;
        Ok(AttemptWindow {
            count: count.max(0) as u64,
            earliest,
        })
    }

    async fn append(&self, attempt: LoginAttempt) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO login_attempts (id, identifier, ip_address, success, user_agent, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(uuidv7())
        .bind(&attempt.identifier)
        .bind(&attempt.ip_address)
        .bind(attempt.success)
        .bind(&attempt.user_agent)
        .bind(attempt.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM login_attempts WHERE created_at <= $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
