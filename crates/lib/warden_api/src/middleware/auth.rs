//! Authentication stage: Bearer or cookie token extraction and JWT verification.

use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{FromRequestParts, Request};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum_extra::extract::cookie::CookieJar;
use tracing::{debug, info, warn};
use warden_core::auth::TokenError;
use warden_core::auth::service::AuthService;
use warden_core::models::auth::{IdentityClaims, User};

use super::{Flow, Stage};
use crate::error::AppError;
use crate::services::cookies::AUTH_COOKIE;

/// A verified caller whose account still exists.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user: User,
    pub claims: IdentityClaims,
}

/// Request extension set by [`AuthStage`]: the caller, or `None` when the route
/// allows anonymous access and no usable token was presented.
#[derive(Debug, Clone, Default)]
pub struct Identity(pub Option<AuthenticatedUser>);

impl Identity {
    pub fn user(&self) -> Option<&AuthenticatedUser> {
        self.0.as_ref()
    }

    pub fn require(self) -> Result<AuthenticatedUser, AppError> {
        self.0
            .ok_or_else(|| AppError::unauthorized("Authentication required", "AUTH_REQUIRED"))
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<Identity>().cloned().unwrap_or_default())
    }
}

impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Ok(identity) = Identity::from_request_parts(parts, state).await;
        identity.require()
    }
}

/// Token from `Authorization: Bearer <token>`, else from the auth cookie.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }
    CookieJar::from_headers(headers)
        .get(AUTH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty())
}

/// Resolves the caller and inserts an [`Identity`] extension.
pub struct AuthStage {
    auth: Arc<AuthService>,
    required: bool,
}

impl AuthStage {
    pub fn new(auth: Arc<AuthService>, required: bool) -> Self {
        Self { auth, required }
    }

    /// Anonymous when allowed, otherwise the given error.
    fn reject(&self, error: AppError) -> Result<Identity, AppError> {
        if self.required {
            Err(error)
        } else {
            Ok(Identity(None))
        }
    }

    async fn resolve(&self, headers: &HeaderMap) -> Result<Identity, AppError> {
        let Some(token) = extract_token(headers) else {
            return self.reject(AppError::unauthorized(
                "Authentication required",
                "AUTH_REQUIRED",
            ));
        };

        let claims = match self.auth.tokens().verify_access(&token) {
            Ok(claims) => claims,
            Err(e) => {
                match &e {
                    TokenError::Expired => info!("rejected expired token"),
                    other => warn!(reason = %other, "rejected malformed or forged token"),
                }
                return self.reject(e.into());
            }
        };

        match self.auth.find_user(&claims.sub).await? {
            Some(user) => {
                debug!(user_id = %user.id, "request authenticated");
                Ok(Identity(Some(AuthenticatedUser { user, claims })))
            }
            None => {
                warn!(user_id = %claims.sub, "token subject no longer exists");
                self.reject(AppError::unauthorized("User not found", "USER_NOT_FOUND"))
            }
        }
    }
}

#[async_trait]
impl Stage for AuthStage {
    async fn run(&self, request: &mut Request) -> Result<Flow, AppError> {
        let identity = self.resolve(request.headers()).await?;
        request.extensions_mut().insert(identity);
        Ok(Flow::Continue)
    }

    fn name(&self) -> &str {
        "auth"
    }
}
