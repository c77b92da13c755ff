//! Authentication domain models.
//!
//! `UserRecord` is what the store holds; `User` is what every caller outside the
//! store sees. The password hash only ever lives on the former.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which half of a token pair a JWT represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

/// Identity a token is issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSubject {
    pub id: String,
    pub email: String,
    pub username: Option<String>,
}

impl From<&User> for TokenSubject {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            username: user.username.clone(),
        }
    }
}

/// JWT claims embedded in access and refresh tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Subject: user ID (standard JWT `sub` claim).
    pub sub: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    pub iss: String,
    pub aud: String,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Expiry (unix timestamp).
    pub exp: i64,
}

/// Access + refresh token issued together at login or registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Seconds until the access token's `exp`, measured from issuance.
    pub expires_in: i64,
}

/// Public view of a user. Carries no credential material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub username: Option<String>,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Credential record as held by a [`crate::store::UserStore`].
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub username: Option<String>,
    pub name: Option<String>,
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRecord {
    /// Strip the credential and return the public view.
    pub fn into_public(self) -> User {
        User {
            id: self.id,
            email: self.email,
            username: self.username,
            name: self.name,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Fields required to create a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub username: Option<String>,
    pub name: Option<String>,
    pub password_hash: String,
}

/// Partial update applied by [`crate::store::UserStore::update`].
///
/// `None` leaves a column untouched. `name: Some(None)` clears the display name.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub email: Option<String>,
    pub username: Option<String>,
    pub name: Option<Option<String>>,
    pub password_hash: Option<String>,
}

impl UserChanges {
    pub fn is_empty(&self) -> bool {
        self.email.is_none()
            && self.username.is_none()
            && self.name.is_none()
            && self.password_hash.is_none()
    }
}

/// Append-only login audit record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAttempt {
    pub identifier: String,
    pub ip_address: String,
    pub success: bool,
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Where a request came from, as far as the auth services care.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip_address: String,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    pub fn new(ip_address: impl Into<String>, user_agent: Option<String>) -> Self {
        Self {
            ip_address: ip_address.into(),
            user_agent,
        }
    }

    pub fn attempt(&self, identifier: &str, success: bool, timestamp: DateTime<Utc>) -> LoginAttempt {
        LoginAttempt {
            identifier: identifier.to_string(),
            ip_address: self.ip_address.clone(),
            success,
            user_agent: self.user_agent.clone(),
            timestamp,
        }
    }
}

/// Result of a successful registration or login.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub user: User,
    pub tokens: TokenPair,
}
