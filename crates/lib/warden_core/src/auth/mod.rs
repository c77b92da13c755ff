//! Authentication and authorization logic.
//!
//! Provides JWT management, password hashing and policy, credential validation,
//! and the account use cases (`service`) shared by every entry point.

pub mod jwt;
pub mod password;
pub mod service;
pub mod validation;

use thiserror::Error;

use crate::rate_limit::RateLimitDecision;
use validation::ValidationErrors;

/// Token verification and signing errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TokenError {
    /// Signature checks out but `exp` has passed.
    #[error("Token has expired")]
    Expired,

    #[error("Invalid token: {0}")]
    Invalid(String),

    #[error("Token signing failed: {0}")]
    Signing(String),
}

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Validation failed")]
    Validation(ValidationErrors),

    #[error("{0}")]
    PolicyViolation(String),

    #[error("Invalid email or username format")]
    InvalidIdentifier,

    #[error("Too many failed attempts")]
    RateLimited(RateLimitDecision),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Email already registered")]
    DuplicateEmail,

    #[error("Username already taken")]
    DuplicateUsername,

    #[error("Current password is incorrect")]
    IncorrectCurrentPassword,

    #[error("User not found")]
    UserNotFound,

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ValidationErrors> for AuthError {
    fn from(errors: ValidationErrors) -> Self {
        AuthError::Validation(errors)
    }
}
