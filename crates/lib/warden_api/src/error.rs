//! Application error types.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use warden_core::auth::validation::FieldError;
use warden_core::auth::{AuthError, TokenError};
use warden_core::rate_limit::{RateLimitDecision, RateLimitError};

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Message returned for every token failure; logs carry the real reason.
pub const INVALID_TOKEN_MESSAGE: &str = "Invalid or expired token";

/// JSON error envelope.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<FieldError>,
}

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    /// Client-correctable input problem.
    #[error("{message}")]
    Validation {
        message: String,
        code: &'static str,
        details: Vec<FieldError>,
    },

    #[error("{message}")]
    Unauthorized { message: String, code: &'static str },

    #[error("{message}")]
    RateLimited {
        message: String,
        decision: RateLimitDecision,
    },

    #[error("Internal server error")]
    Internal(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>, code: &'static str) -> Self {
        AppError::Validation {
            message: message.into(),
            code,
            details: Vec::new(),
        }
    }

    /// A 400 pointing at one field.
    pub fn field(field: &str, message: impl Into<String>, code: &'static str) -> Self {
        let message = message.into();
        AppError::Validation {
            details: vec![FieldError {
                field: field.to_string(),
                message: message.clone(),
            }],
            message,
            code,
        }
    }

    pub fn unauthorized(message: impl Into<String>, code: &'static str) -> Self {
        AppError::Unauthorized {
            message: message.into(),
            code,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// `Retry-After` and `X-RateLimit-*` headers for a decision.
pub fn rate_limit_headers(decision: &RateLimitDecision) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(
        X_RATELIMIT_RESET,
        HeaderValue::from(decision.reset_at.timestamp()),
    );
    if let Some(retry_after) = decision.retry_after_secs {
        headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
    }
    headers
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            AppError::Validation {
                message,
                code,
                details,
            } => {
                let body = ErrorBody {
                    error: message,
                    code: Some(code),
                    details,
                };
                (status, Json(body)).into_response()
            }
            AppError::Unauthorized { message, code } => {
                let body = ErrorBody {
                    error: message,
                    code: Some(code),
                    details: Vec::new(),
                };
                (status, Json(body)).into_response()
            }
            AppError::RateLimited { message, decision } => {
                let body = ErrorBody {
                    error: message,
                    code: Some("RATE_LIMITED"),
                    details: Vec::new(),
                };
                (status, rate_limit_headers(&decision), Json(body)).into_response()
            }
            AppError::Internal(detail) => {
                error!(error = %detail, "internal error");
                let body = ErrorBody {
                    error: "Internal server error".into(),
                    code: Some("INTERNAL_ERROR"),
                    details: Vec::new(),
                };
                (status, Json(body)).into_response()
            }
        }
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Validation(errors) => AppError::Validation {
                message: "Validation failed".into(),
                code: "VALIDATION_ERROR",
                details: errors.into_errors(),
            },
            AuthError::PolicyViolation(msg) => AppError::field("password", msg, "PASSWORD_POLICY"),
            AuthError::InvalidIdentifier => AppError::field(
                "emailOrUsername",
                "Invalid email or username format",
                "VALIDATION_ERROR",
            ),
            AuthError::RateLimited(decision) => AppError::RateLimited {
                message: "Too many login attempts. Please try again later.".into(),
                decision,
            },
            AuthError::InvalidCredentials => {
                AppError::unauthorized("Invalid credentials", "INVALID_CREDENTIALS")
            }
            AuthError::DuplicateEmail => {
                AppError::field("email", "Email already registered", "DUPLICATE_EMAIL")
            }
            AuthError::DuplicateUsername => {
                AppError::field("username", "Username already taken", "DUPLICATE_USERNAME")
            }
            AuthError::IncorrectCurrentPassword => AppError::field(
                "currentPassword",
                "Current password is incorrect",
                "INCORRECT_PASSWORD",
            ),
            AuthError::UserNotFound => AppError::unauthorized("User not found", "USER_NOT_FOUND"),
            AuthError::Token(e) => AppError::from(e),
            AuthError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

impl From<TokenError> for AppError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Expired => AppError::unauthorized(INVALID_TOKEN_MESSAGE, "TOKEN_EXPIRED"),
            TokenError::Invalid(_) => AppError::unauthorized(INVALID_TOKEN_MESSAGE, "INVALID_TOKEN"),
            TokenError::Signing(msg) => AppError::Internal(msg),
        }
    }
}

impl From<RateLimitError> for AppError {
    fn from(e: RateLimitError) -> Self {
        AppError::Internal(format!("rate limiter: {e}"))
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::validation(rejection.body_text(), "INVALID_BODY")
    }
}
