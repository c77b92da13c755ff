//! JWT token generation and verification.
//!
//! Access and refresh tokens are HS256 JWTs carrying [`IdentityClaims`].
//! [`TokenService::verify_access`] is the only path that may feed an
//! authorization decision; [`inspect_unverified`] exists for display purposes
//! (expiry countdowns and the like) and returns a type that cannot be mistaken
//! for verified claims.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use tracing::info;

use super::TokenError;
use crate::models::auth::{IdentityClaims, TokenKind, TokenPair, TokenSubject};

/// Default `iss` claim.
pub const DEFAULT_ISSUER: &str = "auth-system";

/// Default `aud` claim.
pub const DEFAULT_AUDIENCE: &str = "web-app";

/// Signing key, claim constants and lifetimes.
#[derive(Clone)]
pub struct TokenConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    /// Access token lifetime (default 7 days).
    pub access_ttl: Duration,
    /// Refresh token lifetime (default 30 days).
    pub refresh_ttl: Duration,
}

impl TokenConfig {
    pub fn new(secret: String) -> Self {
        Self {
            secret,
            issuer: DEFAULT_ISSUER.to_string(),
            audience: DEFAULT_AUDIENCE.to_string(),
            access_ttl: Duration::days(7),
            refresh_ttl: Duration::days(30),
        }
    }
}

impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish()
    }
}

/// Issues and verifies identity tokens.
#[derive(Clone)]
pub struct TokenService {
    config: TokenConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenService {
    pub fn new(config: TokenConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_audience(&[config.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);

        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            config,
        }
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Generate a signed access token.
    pub fn issue_access(&self, subject: &TokenSubject) -> Result<String, TokenError> {
        self.issue(subject, TokenKind::Access, Utc::now())
    }

    /// Generate a signed refresh token.
    pub fn issue_refresh(&self, subject: &TokenSubject) -> Result<String, TokenError> {
        self.issue(subject, TokenKind::Refresh, Utc::now())
    }

    /// Generate both tokens. `expires_in` is read back from the access token's
    /// own `exp` claim rather than from the configured TTL.
    pub fn issue_pair(&self, subject: &TokenSubject) -> Result<TokenPair, TokenError> {
        let issued_at = Utc::now();
        let access_token = self.issue(subject, TokenKind::Access, issued_at)?;
        let refresh_token = self.issue(subject, TokenKind::Refresh, issued_at)?;

        let exp = expiry_instant(&access_token)
            .ok_or_else(|| TokenError::Signing("issued token has no readable exp".into()))?;
        let expires_in = exp.timestamp() - issued_at.timestamp();

        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in,
        })
    }

    fn issue(
        &self,
        subject: &TokenSubject,
        kind: TokenKind,
        issued_at: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let ttl = match kind {
            TokenKind::Access => self.config.access_ttl,
            TokenKind::Refresh => self.config.refresh_ttl,
        };
        let claims = IdentityClaims {
            sub: subject.id.clone(),
            email: subject.email.clone(),
            username: subject.username.clone(),
            kind,
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            iat: issued_at.timestamp(),
            exp: (issued_at + ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(format!("jwt encode: {e}")))
    }

    /// Verify signature, issuer, audience and expiry, returning the claims.
    ///
    /// `TokenError::Expired` is only produced for a token whose signature is
    /// valid; every other failure is `TokenError::Invalid`.
    pub fn verify(&self, token: &str) -> Result<IdentityClaims, TokenError> {
        decode::<IdentityClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                other => TokenError::Invalid(format!("{other:?}")),
            })
    }

    /// [`verify`](Self::verify) and require an access token.
    pub fn verify_access(&self, token: &str) -> Result<IdentityClaims, TokenError> {
        self.verify_kind(token, TokenKind::Access)
    }

    /// [`verify`](Self::verify) and require a refresh token.
    pub fn verify_refresh(&self, token: &str) -> Result<IdentityClaims, TokenError> {
        self.verify_kind(token, TokenKind::Refresh)
    }

    fn verify_kind(&self, token: &str, expected: TokenKind) -> Result<IdentityClaims, TokenError> {
        let claims = self.verify(token)?;
        if claims.kind != expected {
            return Err(TokenError::Invalid(format!(
                "expected {} token, got {}",
                expected.as_str(),
                claims.kind.as_str()
            )));
        }
        Ok(claims)
    }
}

/// Claims read from a token without checking its signature or expiry.
///
/// Has no conversion into [`IdentityClaims`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnverifiedClaims(IdentityClaims);

impl UnverifiedClaims {
    pub fn subject_id(&self) -> &str {
        &self.0.sub
    }

    pub fn email(&self) -> &str {
        &self.0.email
    }

    pub fn username(&self) -> Option<&str> {
        self.0.username.as_deref()
    }

    pub fn kind(&self) -> TokenKind {
        self.0.kind
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.0.exp, 0)
    }
}

/// Parse a token's claims without verifying anything. `None` if the token is
/// structurally unreadable.
pub fn inspect_unverified(token: &str) -> Option<UnverifiedClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    decode::<IdentityClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .ok()
        .map(|data| UnverifiedClaims(data.claims))
}

/// Whether a token's `exp` has passed. Unreadable tokens count as expired.
pub fn is_expired(token: &str) -> bool {
    match expiry_instant(token) {
        Some(exp) => exp < Utc::now(),
        None => true,
    }
}

/// The instant a token expires, if it can be read at all.
pub fn expiry_instant(token: &str) -> Option<DateTime<Utc>> {
    inspect_unverified(token).and_then(|claims| claims.expires_at())
}

/// Resolve the JWT secret: env var `JWT_SECRET` → `AUTH_SECRET` → persisted file.
pub fn resolve_jwt_secret() -> String {
    if let Ok(secret) = std::env::var("JWT_SECRET")
        && !secret.is_empty()
    {
        return secret;
    }
    if let Ok(secret) = std::env::var("AUTH_SECRET")
        && !secret.is_empty()
    {
        return secret;
    }
    let secret_path = jwt_secret_path();
    if let Ok(existing) = std::fs::read_to_string(&secret_path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let secret: String = rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect();
    if let Some(parent) = secret_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::write(&secret_path, &secret);
    info!(path = %secret_path.display(), "generated new JWT secret");
    secret
}

/// Path to the persisted JWT secret file.
fn jwt_secret_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("warden")
        .join("jwt-secret")
}
