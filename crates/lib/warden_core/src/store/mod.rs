//! Persistence contracts for credential records and login attempts.
//!
//! The services only see the two traits below. `memory` backs tests and
//! single-process deployments; `postgres` is the durable implementation.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::auth::{LoginAttempt, NewUser, UserChanges, UserRecord};

/// Column guarded by a uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Email,
    Username,
}

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated on {0:?}")]
    Conflict(UniqueField),

    #[error("record not found")]
    NotFound,

    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e
            && db.is_unique_violation()
        {
            match db.constraint() {
                Some("users_email_key") => return StoreError::Conflict(UniqueField::Email),
                Some("users_username_key") => return StoreError::Conflict(UniqueField::Username),
                _ => {}
            }
        }
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// Credential record storage, addressable by id, email and username.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<UserRecord>, StoreError>;

    /// Match `value` against the email column or the username column.
    async fn find_by_email_or_username(&self, value: &str)
    -> Result<Option<UserRecord>, StoreError>;

    async fn create(&self, user: NewUser) -> Result<UserRecord, StoreError>;

    /// Apply a partial update. Fails with [`StoreError::NotFound`] if `id` is unknown.
    async fn update(&self, id: &str, changes: UserChanges) -> Result<UserRecord, StoreError>;

    /// Remove a record. Fails with [`StoreError::NotFound`] if `id` is unknown.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

/// Which attempts a count covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptFilter<'a> {
    /// Failed attempts against one identifier.
    FailedForIdentifier(&'a str),
    /// Every attempt from one IP address.
    FromIp(&'a str),
}

impl AttemptFilter<'_> {
    pub fn matches(&self, attempt: &LoginAttempt) -> bool {
        match self {
            AttemptFilter::FailedForIdentifier(id) => !attempt.success && attempt.identifier == *id,
            AttemptFilter::FromIp(ip) => attempt.ip_address == *ip,
        }
    }
}

/// Aggregate over the attempts inside a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AttemptWindow {
    pub count: u64,
    /// Oldest counted attempt, `None` when `count` is zero.
    pub earliest: Option<DateTime<Utc>>,
}

/// Append-only login audit log.
#[async_trait]
pub trait LoginAttemptStore: Send + Sync {
    /// Count attempts matching `filter` strictly after `since`.
    async fn count_since(
        &self,
        filter: AttemptFilter<'_>,
        since: DateTime<Utc>,
    ) -> Result<AttemptWindow, StoreError>;

    async fn append(&self, attempt: LoginAttempt) -> Result<(), StoreError>;

    /// Delete attempts at or before `cutoff`, returning how many went.
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}
