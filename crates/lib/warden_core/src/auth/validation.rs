//! Credential acceptance rules.
//!
//! Declarative checks for emails, usernames, passwords and the composite request
//! bodies built from them. Every check returns per-field errors; nothing here
//! panics on unexpected input.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::password::{PasswordPolicy, PasswordService};

/// Maximum email length.
pub const EMAIL_MAX_LENGTH: usize = 255;

pub const USERNAME_MIN_LENGTH: usize = 3;
pub const USERNAME_MAX_LENGTH: usize = 30;

/// Maximum display name length.
pub const NAME_MAX_LENGTH: usize = 100;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_'+\-]+(\.[A-Za-z0-9_'+\-]+)*@[A-Za-z0-9]([A-Za-z0-9\-]*[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9\-]*[A-Za-z0-9])?)*\.[A-Za-z]{2,}$")
        .expect("email regex compiles")
});

static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("username regex compiles"));

/// A single rejected field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// All field errors produced by one validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single error on one field.
    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.push(field, message);
        errors
    }

    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        self.0.push(FieldError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.0
    }

    pub fn into_errors(self) -> Vec<FieldError> {
        self.0
    }

    pub fn for_field(&self, field: &str) -> impl Iterator<Item = &FieldError> {
        self.0.iter().filter(move |e| e.field == field)
    }

    fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        f.write_str(&parts.join("; "))
    }
}

/// How a login identifier should be looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    Email,
    Username,
    Invalid,
}

/// `POST /register` body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default)]
    pub email: String,
    pub username: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub password: String,
    /// Checked against `password` only when sent.
    pub confirm_password: Option<String>,
}

/// `POST /login` body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[serde(default)]
    pub email_or_username: String,
    #[serde(default)]
    pub password: String,
}

/// `POST /change-password` body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[serde(default)]
    pub current_password: String,
    #[serde(default)]
    pub new_password: String,
    #[serde(default)]
    pub confirm_new_password: String,
}

/// `PUT /profile` body. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub email: Option<String>,
    pub username: Option<String>,
    pub name: Option<String>,
}

/// Validates request bodies against the configured password policy.
#[derive(Debug, Clone)]
pub struct CredentialValidator {
    passwords: PasswordService,
}

impl CredentialValidator {
    pub fn new(policy: PasswordPolicy) -> Self {
        Self {
            passwords: PasswordService::new(policy),
        }
    }

    pub fn policy(&self) -> &PasswordPolicy {
        self.passwords.policy()
    }

    pub fn validate_register(&self, req: &RegisterRequest) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        check_email(&mut errors, "email", &req.email);
        if let Some(username) = &req.username {
            check_username(&mut errors, "username", username);
        }
        if let Some(name) = &req.name {
            if name.trim().is_empty() {
                errors.push("name", "Name is required");
            }
            check_name_length(&mut errors, name);
        }
        self.check_password(&mut errors, "password", &req.password);
        if req
            .confirm_password
            .as_ref()
            .is_some_and(|confirm| *confirm != req.password)
        {
            errors.push("confirmPassword", "Passwords don't match");
        }
        errors.into_result()
    }

    pub fn validate_login(&self, req: &LoginRequest) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if req.email_or_username.trim().is_empty() {
            errors.push("emailOrUsername", "Email or username is required");
        }
        if req.password.is_empty() {
            errors.push("password", "Password is required");
        }
        errors.into_result()
    }

    pub fn validate_change_password(
        &self,
        req: &ChangePasswordRequest,
    ) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if req.current_password.is_empty() {
            errors.push("currentPassword", "Current password is required");
        }
        self.check_password(&mut errors, "newPassword", &req.new_password);
        if req.new_password != req.confirm_new_password {
            errors.push("confirmNewPassword", "New passwords don't match");
        }
        errors.into_result()
    }

    pub fn validate_update_profile(
        &self,
        req: &UpdateProfileRequest,
    ) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Some(email) = &req.email {
            check_email(&mut errors, "email", email);
        }
        if let Some(username) = &req.username {
            check_username(&mut errors, "username", username);
        }
        if let Some(name) = &req.name {
            check_name_length(&mut errors, name);
        }
        errors.into_result()
    }

    fn check_password(&self, errors: &mut ValidationErrors, field: &str, password: &str) {
        for message in self.passwords.check_strength(password).errors {
            errors.push(field, message);
        }
        if password.chars().count() > self.policy().max_length {
            errors.push(field, "Password is too long");
        }
    }
}

impl Default for CredentialValidator {
    fn default() -> Self {
        Self::new(PasswordPolicy::default())
    }
}

fn check_email(errors: &mut ValidationErrors, field: &str, email: &str) {
    if email.is_empty() {
        errors.push(field, "Email is required");
        return;
    }
    if !EMAIL_RE.is_match(email) {
        errors.push(field, "Invalid email format");
    }
    if email.chars().count() > EMAIL_MAX_LENGTH {
        errors.push(field, "Email is too long");
    }
}

fn check_username(errors: &mut ValidationErrors, field: &str, username: &str) {
    let length = username.chars().count();
    if length < USERNAME_MIN_LENGTH {
        errors.push(field, "Username must be at least 3 characters long");
    }
    if length > USERNAME_MAX_LENGTH {
        errors.push(field, "Username must be at most 30 characters long");
    }
    if !USERNAME_RE.is_match(username) {
        errors.push(
            field,
            "Username can only contain letters, numbers, underscores, and hyphens",
        );
    }
}

fn check_name_length(errors: &mut ValidationErrors, name: &str) {
    if name.chars().count() > NAME_MAX_LENGTH {
        errors.push("name", "Name is too long");
    }
}

/// Whether `email` would be accepted as an email address.
pub fn is_valid_email(email: &str) -> bool {
    let mut errors = ValidationErrors::new();
    check_email(&mut errors, "email", email);
    errors.is_empty()
}

/// Whether `username` would be accepted as a username.
pub fn is_valid_username(username: &str) -> bool {
    let mut errors = ValidationErrors::new();
    check_username(&mut errors, "username", username);
    errors.is_empty()
}

/// Decide whether a login identifier is an email, a username, or neither.
pub fn classify_identifier(input: &str) -> IdentifierKind {
    if is_valid_email(input) {
        IdentifierKind::Email
    } else if is_valid_username(input) {
        IdentifierKind::Username
    } else {
        IdentifierKind::Invalid
    }
}

/// Trim and strip angle brackets.
pub fn sanitize_input(input: &str) -> String {
    input.trim().replace(['<', '>'], "")
}
