//! In-process stores.
//!
//! Used by tests and by the server when no database is configured. State is
//! lost on restart.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{AttemptFilter, AttemptWindow, LoginAttemptStore, StoreError, UniqueField, UserStore};
use crate::models::auth::{LoginAttempt, NewUser, UserChanges, UserRecord};
use crate::uuid::uuidv7;

/// `UserStore` over a locked `HashMap`, enforcing the same uniqueness rules as
/// the database schema.
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

fn conflict(
    users: &HashMap<String, UserRecord>,
    except: Option<&str>,
    email: Option<&str>,
    username: Option<&str>,
) -> Option<UniqueField> {
    let others = users.values().filter(|u| Some(u.id.as_str()) != except);
    for user in others {
        if email.is_some_and(|e| user.email == e) {
            return Some(UniqueField::Email);
        }
        if username.is_some() && user.username.as_deref() == username {
            return Some(UniqueField::Username);
        }
    }
    None
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn find_by_email_or_username(
        &self,
        value: &str,
    ) -> Result<Option<UserRecord>, StoreError> {
        let users = self.users.read().await;
        let found = users
            .values()
            .find(|u| u.email == value || u.username.as_deref() == Some(value))
            .cloned();
        Ok(found)
    }

    async fn create(&self, user: NewUser) -> Result<UserRecord, StoreError> {
        let mut users = self.users.write().await;
        if let Some(field) = conflict(&users, None, Some(&user.email), user.username.as_deref()) {
            return Err(StoreError::Conflict(field));
        }
        let now = Utc::now();
        let record = UserRecord {
            id: uuidv7().to_string(),
            email: user.email,
            username: user.username,
            name: user.name,
            password_hash: Some(user.password_hash),
            created_at: now,
            updated_at: now,
        };
        users.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn update(&self, id: &str, changes: UserChanges) -> Result<UserRecord, StoreError> {
        let mut users = self.users.write().await;
        if !users.contains_key(id) {
            return Err(StoreError::NotFound);
        }
        if let Some(field) = conflict(
            &users,
            Some(id),
            changes.email.as_deref(),
            changes.username.as_deref(),
        ) {
            return Err(StoreError::Conflict(field));
        }

        let record = users.get_mut(id).ok_or(StoreError::NotFound)?;
        if let Some(email) = changes.email {
            record.email = email;
        }
        if let Some(username) = changes.username {
            record.username = Some(username);
        }
        if let Some(name) = changes.name {
            record.name = name;
        }
        if let Some(hash) = changes.password_hash {
            record.password_hash = Some(hash);
        }
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.users
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }
}

/// `LoginAttemptStore` over a locked `Vec`.
#[derive(Debug, Default)]
pub struct MemoryLoginAttemptStore {
    attempts: RwLock<Vec<LoginAttempt>>,
}

impl MemoryLoginAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored attempt, oldest first.
    pub async fn all(&self) -> Vec<LoginAttempt> {
        self.attempts.read().await.clone()
    }
}

#[async_trait]
impl LoginAttemptStore for MemoryLoginAttemptStore {
    async fn count_since(
        &self,
        filter: AttemptFilter<'_>,
        since: DateTime<Utc>,
    ) -> Result<AttemptWindow, StoreError> {
        let attempts = self.attempts.read().await;
        let window = attempts
            .iter()
            .filter(|a| a.timestamp > since && filter.matches(a))
            .fold(AttemptWindow::default(), |acc, a| AttemptWindow {
                count: acc.count + 1,
                earliest: Some(acc.earliest.map_or(a.timestamp, |e| e.min(a.timestamp))),
            });
        Ok(window)
    }

    async fn append(&self, attempt: LoginAttempt) -> Result<(), StoreError> {
        self.attempts.write().await.push(attempt);
        Ok(())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut attempts = self.attempts.write().await;
        let before = attempts.len();
        attempts.retain(|a| a.timestamp > cutoff);
        Ok((before - attempts.len()) as u64)
    }
}
