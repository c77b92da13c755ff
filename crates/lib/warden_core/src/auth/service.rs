//! Account use cases.
//!
//! `AuthService` ties the validator, password and token services to the user
//! and login-attempt stores. Every HTTP handler goes through it.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::AuthError;
use super::jwt::TokenService;
use super::password::PasswordService;
use super::validation::{
    ChangePasswordRequest, CredentialValidator, IdentifierKind, LoginRequest, RegisterRequest,
    UpdateProfileRequest, classify_identifier, sanitize_input,
};
use crate::config::AuthConfig;
use crate::models::auth::{
    AuthSession, ClientInfo, LoginAttempt, NewUser, TokenSubject, User, UserChanges, UserRecord,
};
use crate::rate_limit::RateLimitError;
use crate::rate_limit::store::{AttemptScope, StoreRateLimiter};
use crate::store::{LoginAttemptStore, StoreError, UniqueField, UserStore};

/// Registration, login and account management.
pub struct AuthService {
    tokens: TokenService,
    passwords: PasswordService,
    validator: CredentialValidator,
    users: Arc<dyn UserStore>,
    login_limiter: StoreRateLimiter,
    ip_limiter: StoreRateLimiter,
}

impl AuthService {
    pub fn new(
        config: &AuthConfig,
        users: Arc<dyn UserStore>,
        attempts: Arc<dyn LoginAttemptStore>,
    ) -> Self {
        let login_limiter = StoreRateLimiter::new(
            attempts.clone(),
            config.rate_limit.window,
            config.rate_limit.login_max_attempts,
            AttemptScope::FailedByIdentifier,
        );
        let ip_limiter = StoreRateLimiter::new(
            attempts,
            config.rate_limit.window,
            config.rate_limit.max_requests,
            AttemptScope::AllByIp,
        );
        Self {
            tokens: TokenService::new(config.token.clone()),
            passwords: PasswordService::new(config.password.clone()),
            validator: CredentialValidator::new(config.password.clone()),
            users,
            login_limiter,
            ip_limiter,
        }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn passwords(&self) -> &PasswordService {
        &self.passwords
    }

    pub fn validator(&self) -> &CredentialValidator {
        &self.validator
    }

    pub fn users(&self) -> &Arc<dyn UserStore> {
        &self.users
    }

    pub fn login_limiter(&self) -> &StoreRateLimiter {
        &self.login_limiter
    }

    /// Caps every recorded attempt from one address, successful or not.
    pub fn ip_limiter(&self) -> &StoreRateLimiter {
        &self.ip_limiter
    }

    /// Create an account and sign it in.
    pub async fn register(
        &self,
        req: RegisterRequest,
        client: &ClientInfo,
    ) -> Result<AuthSession, AuthError> {
        self.validator.validate_register(&req)?;

        let email = sanitize_input(&req.email).to_lowercase();
        let username = req
            .username
            .as_deref()
            .map(sanitize_input)
            .filter(|u| !u.is_empty());
        let name = req
            .name
            .as_deref()
            .map(sanitize_input)
            .filter(|n| !n.is_empty());

        if self.email_taken(&email, None).await? {
            debug!(email = %email, "registration rejected: email taken");
            return Err(AuthError::DuplicateEmail);
        }
        if let Some(username) = &username
            && self.username_taken(username, None).await?
        {
            debug!(username = %username, "registration rejected: username taken");
            return Err(AuthError::DuplicateUsername);
        }

        let password_hash = self.passwords.hash_off_thread(req.password).await?;
        let record = self
            .users
            .create(NewUser {
                email: email.clone(),
                username,
                name,
                password_hash,
            })
            .await
            .map_err(store_error)?;

        let user = record.into_public();
        let tokens = self.tokens.issue_pair(&TokenSubject::from(&user))?;
        self.record_attempt(client.attempt(&email, true, Utc::now()))
            .await?;

        info!(user_id = %user.id, "user registered");
        Ok(AuthSession { user, tokens })
    }

    /// Authenticate by email or username.
    ///
    /// An unknown identifier and a wrong password fail identically, with the
    /// same bcrypt effort spent on both paths.
    pub async fn login(
        &self,
        req: LoginRequest,
        client: &ClientInfo,
    ) -> Result<AuthSession, AuthError> {
        self.validator.validate_login(&req)?;

        let raw = sanitize_input(&req.email_or_username);
        let identifier = match classify_identifier(&raw) {
            IdentifierKind::Email => raw.to_lowercase(),
            IdentifierKind::Username => raw,
            IdentifierKind::Invalid => return Err(AuthError::InvalidIdentifier),
        };

        let now = Utc::now();
        let by_ip = self
            .ip_limiter
            .check_at(&client.ip_address, now)
            .await
            .map_err(limiter_error)?;
        if !by_ip.allowed {
            warn!(
                ip = %client.ip_address,
                retry_after = ?by_ip.retry_after_secs,
                "login throttled for address"
            );
            return Err(AuthError::RateLimited(by_ip));
        }

        let decision = self
            .login_limiter
            .check_at(&identifier, now)
            .await
            .map_err(limiter_error)?;
        if !decision.allowed {
            warn!(
                identifier = %identifier,
                ip = %client.ip_address,
                retry_after = ?decision.retry_after_secs,
                "login throttled"
            );
            return Err(AuthError::RateLimited(decision));
        }

        let record = self
            .users
            .find_by_email_or_username(&identifier)
            .await
            .map_err(store_error)?;

        let verified = match record.as_ref().and_then(|r| r.password_hash.clone()) {
            Some(hash) => {
                self.passwords
                    .verify_off_thread(req.password, hash)
                    .await?
            }
            None => {
                self.passwords.verify_decoy_off_thread(req.password).await?;
                false
            }
        };

        let user = match record {
            Some(record) if verified => record.into_public(),
            _ => {
                self.record_attempt(client.attempt(&identifier, false, Utc::now()))
                    .await?;
                info!(identifier = %identifier, ip = %client.ip_address, "login failed");
                return Err(AuthError::InvalidCredentials);
            }
        };

        self.record_attempt(client.attempt(&identifier, true, Utc::now()))
            .await?;
        let tokens = self.tokens.issue_pair(&TokenSubject::from(&user))?;
        info!(user_id = %user.id, "user logged in");
        Ok(AuthSession { user, tokens })
    }

    /// Replace the password after checking the current one.
    ///
    /// Tokens already issued stay valid until they expire.
    pub async fn change_password(
        &self,
        user_id: &str,
        req: ChangePasswordRequest,
    ) -> Result<(), AuthError> {
        self.validator.validate_change_password(&req)?;

        let record = self.require_record(user_id).await?;
        let current_ok = match record.password_hash {
            Some(hash) => {
                self.passwords
                    .verify_off_thread(req.current_password, hash)
                    .await?
            }
            None => false,
        };
        if !current_ok {
            debug!(user_id, "password change rejected: current password mismatch");
            return Err(AuthError::IncorrectCurrentPassword);
        }

        let password_hash = self.passwords.hash_off_thread(req.new_password).await?;
        self.users
            .update(
                user_id,
                UserChanges {
                    password_hash: Some(password_hash),
                    ..Default::default()
                },
            )
            .await
            .map_err(store_error)?;

        info!(user_id, "password changed");
        Ok(())
    }

    /// Apply profile changes and return the updated public view.
    pub async fn update_profile(
        &self,
        user_id: &str,
        req: UpdateProfileRequest,
    ) -> Result<User, AuthError> {
        self.validator.validate_update_profile(&req)?;

        let changes = UserChanges {
            email: req.email.as_deref().map(|e| sanitize_input(e).to_lowercase()),
            username: req
                .username
                .as_deref()
                .map(sanitize_input)
                .filter(|u| !u.is_empty()),
            name: req.name.as_deref().map(|n| {
                let name = sanitize_input(n);
                (!name.is_empty()).then_some(name)
            }),
            password_hash: None,
        };

        if changes.is_empty() {
            return Ok(self.require_record(user_id).await?.into_public());
        }
        if let Some(email) = &changes.email
            && self.email_taken(email, Some(user_id)).await?
        {
            return Err(AuthError::DuplicateEmail);
        }
        if let Some(username) = &changes.username
            && self.username_taken(username, Some(user_id)).await?
        {
            return Err(AuthError::DuplicateUsername);
        }

        let record = self
            .users
            .update(user_id, changes)
            .await
            .map_err(store_error)?;
        info!(user_id, "profile updated");
        Ok(record.into_public())
    }

    /// Remove the account. The caller confirms intent before getting here.
    pub async fn delete_account(&self, user_id: &str) -> Result<(), AuthError> {
        self.users.delete(user_id).await.map_err(store_error)?;
        info!(user_id, "account deleted");
        Ok(())
    }

    /// Public view of a user, if the record still exists.
    pub async fn find_user(&self, user_id: &str) -> Result<Option<User>, AuthError> {
        let record = self.users.find_by_id(user_id).await.map_err(store_error)?;
        Ok(record.map(UserRecord::into_public))
    }

    async fn require_record(&self, user_id: &str) -> Result<UserRecord, AuthError> {
        self.users
            .find_by_id(user_id)
            .await
            .map_err(store_error)?
            .ok_or(AuthError::UserNotFound)
    }

    async fn email_taken(&self, email: &str, except: Option<&str>) -> Result<bool, AuthError> {
        let found = self
            .users
            .find_by_email_or_username(email)
            .await
            .map_err(store_error)?;
        Ok(found.is_some_and(|u| u.email == email && Some(u.id.as_str()) != except))
    }

    async fn username_taken(
        &self,
        username: &str,
        except: Option<&str>,
    ) -> Result<bool, AuthError> {
        let found = self
            .users
            .find_by_email_or_username(username)
            .await
            .map_err(store_error)?;
        Ok(found.is_some_and(|u| {
            u.username.as_deref() == Some(username) && Some(u.id.as_str()) != except
        }))
    }

    async fn record_attempt(&self, attempt: LoginAttempt) -> Result<(), AuthError> {
        self.login_limiter
            .record(attempt)
            .await
            .map_err(limiter_error)
    }
}

fn store_error(e: StoreError) -> AuthError {
    match e {
        StoreError::Conflict(UniqueField::Email) => AuthError::DuplicateEmail,
        StoreError::Conflict(UniqueField::Username) => AuthError::DuplicateUsername,
        StoreError::NotFound => AuthError::UserNotFound,
        StoreError::Backend(cause) => {
            error!(error = %cause, "user store failure");
            AuthError::Internal(cause)
        }
    }
}

fn limiter_error(e: RateLimitError) -> AuthError {
    error!(error = %e, "login attempt store failure");
    AuthError::Internal(e.to_string())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::auth::TokenError;
    use crate::models::auth::TokenKind;
    use crate::store::memory::{MemoryLoginAttemptStore, MemoryUserStore};

    struct Fixture {
        service: AuthService,
        attempts: Arc<MemoryLoginAttemptStore>,
        client: ClientInfo,
    }

    fn fixture() -> Fixture {
        fixture_with(AuthConfig::with_secret("service-test-secret"))
    }

    fn fixture_with(mut config: AuthConfig) -> Fixture {
        config.password.bcrypt_cost = 4;
        let attempts = Arc::new(MemoryLoginAttemptStore::new());
        let service = AuthService::new(&config, Arc::new(MemoryUserStore::new()), attempts.clone());
        Fixture {
            service,
            attempts,
            client: ClientInfo::new("203.0.113.7", Some("tests".into())),
        }
    }

    fn registration(email: &str, username: Option<&str>) -> RegisterRequest {
        RegisterRequest {
            email: email.into(),
            username: username.map(Into::into),
            name: Some("Alice".into()),
            password: "Str0ng!Pw".into(),
            confirm_password: Some("Str0ng!Pw".into()),
        }
    }

    fn login(identifier: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email_or_username: identifier.into(),
            password: password.into(),
        }
    }

    #[tokio::test]
    async fn register_issues_tokens_and_rejects_duplicate_email() {
        let fx = fixture();
        let session = fx
            .service
            .register(registration("a@x.com", None), &fx.client)
            .await
            .unwrap();
        assert!(session.tokens.expires_in > 0);
        assert_eq!(session.user.email, "a@x.com");

        let claims = fx
            .service
            .tokens()
            .verify_access(&session.tokens.access_token)
            .unwrap();
        assert_eq!(claims.sub, session.user.id);
        assert_eq!(claims.kind, TokenKind::Access);

        let again = fx
            .service
            .register(registration("A@X.com", None), &fx.client)
            .await;
        assert!(matches!(again, Err(AuthError::DuplicateEmail)));

        let attempts = fx.attempts.all().await;
        assert_eq!(attempts.len(), 1);
        assert!(attempts[0].success);
    }

    #[tokio::test]
    async fn register_without_confirmation() {
        let fx = fixture();
        let req = RegisterRequest {
            email: "a@x.com".into(),
            password: "Str0ng!Pw".into(),
            ..Default::default()
        };
        let session = fx.service.register(req, &fx.client).await.unwrap();
        assert_eq!(session.user.email, "a@x.com");
        assert!(session.tokens.expires_in > 0);
    }

    #[tokio::test]
    async fn register_rejects_duplicate_username() {
        let fx = fixture();
        fx.service
            .register(registration("a@x.com", Some("alice")), &fx.client)
            .await
            .unwrap();
        let result = fx
            .service
            .register(registration("b@x.com", Some("alice")), &fx.client)
            .await;
        assert!(matches!(result, Err(AuthError::DuplicateUsername)));
    }

    #[tokio::test]
    async fn register_validates_before_touching_the_store() {
        let fx = fixture();
        let mut req = registration("not-an-email", None);
        req.confirm_password = Some("different".into());
        match fx.service.register(req, &fx.client).await {
            Err(AuthError::Validation(errors)) => {
                assert_eq!(errors.for_field("email").count(), 1);
                assert_eq!(errors.for_field("confirmPassword").count(), 1);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(fx.attempts.all().await.is_empty());
    }

    #[tokio::test]
    async fn login_by_email_or_username() {
        let fx = fixture();
        fx.service
            .register(registration("a@x.com", Some("alice")), &fx.client)
            .await
            .unwrap();

        let by_email = fx
            .service
            .login(login("  A@x.COM ", "Str0ng!Pw"), &fx.client)
            .await
            .unwrap();
        assert_eq!(by_email.user.username.as_deref(), Some("alice"));

        let by_name = fx
            .service
            .login(login("alice", "Str0ng!Pw"), &fx.client)
            .await
            .unwrap();
        assert_eq!(by_name.user.id, by_email.user.id);
        assert!(
            fx.service
                .tokens()
                .verify_refresh(&by_name.tokens.refresh_token)
                .is_ok()
        );
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_fail_identically() {
        let fx = fixture();
        fx.service
            .register(registration("a@x.com", None), &fx.client)
            .await
            .unwrap();

        let wrong = fx
            .service
            .login(login("a@x.com", "Wr0ng!Pw"), &fx.client)
            .await
            .unwrap_err();
        let unknown = fx
            .service
            .login(login("nobody@x.com", "Str0ng!Pw"), &fx.client)
            .await
            .unwrap_err();
        assert!(matches!(wrong, AuthError::InvalidCredentials));
        assert!(matches!(unknown, AuthError::InvalidCredentials));
        assert_eq!(wrong.to_string(), unknown.to_string());

        let failures = fx
            .attempts
            .all()
            .await
            .into_iter()
            .filter(|a| !a.success)
            .count();
        assert_eq!(failures, 2);
    }

    #[tokio::test]
    async fn invalid_identifier_rejected() {
        let fx = fixture();
        let err = fx
            .service
            .login(login("no spaces allowed", "x"), &fx.client)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidIdentifier));
    }

    #[tokio::test]
    async fn sixth_attempt_is_throttled_even_with_correct_password() {
        let fx = fixture();
        fx.service
            .register(registration("a@x.com", None), &fx.client)
            .await
            .unwrap();

        for _ in 0..5 {
            let err = fx
                .service
                .login(login("a@x.com", "Wr0ng!Pw"), &fx.client)
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::InvalidCredentials));
        }

        match fx
            .service
            .login(login("a@x.com", "Str0ng!Pw"), &fx.client)
            .await
        {
            Err(AuthError::RateLimited(decision)) => {
                assert!(!decision.allowed);
                assert!(decision.retry_after_secs.unwrap() > 0);
            }
            other => panic!("expected throttling, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn address_budget_spans_identifiers() {
        let mut config = AuthConfig::with_secret("service-test-secret");
        config.rate_limit.max_requests = 3;
        let fx = fixture_with(config);

        for identifier in ["a@x.com", "b@x.com", "c@x.com"] {
            let err = fx
                .service
                .login(login(identifier, "Wr0ng!Pw"), &fx.client)
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::InvalidCredentials));
        }

        let err = fx
            .service
            .login(login("d@x.com", "Wr0ng!Pw"), &fx.client)
            .await
            .unwrap_err();
        match err {
            AuthError::RateLimited(decision) => assert_eq!(decision.limit, 3),
            other => panic!("expected throttling, got {other:?}"),
        }

        let elsewhere = ClientInfo::new("198.51.100.9", None);
        let err = fx
            .service
            .login(login("d@x.com", "Wr0ng!Pw"), &elsewhere)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn change_password_checks_current() {
        let fx = fixture();
        let session = fx
            .service
            .register(registration("a@x.com", None), &fx.client)
            .await
            .unwrap();
        let id = session.user.id.as_str();

        let wrong = ChangePasswordRequest {
            current_password: "Wr0ng!Pw".into(),
            new_password: "N3w!Passw".into(),
            confirm_new_password: "N3w!Passw".into(),
        };
        assert!(matches!(
            fx.service.change_password(id, wrong).await,
            Err(AuthError::IncorrectCurrentPassword)
        ));

        let right = ChangePasswordRequest {
            current_password: "Str0ng!Pw".into(),
            new_password: "N3w!Passw".into(),
            confirm_new_password: "N3w!Passw".into(),
        };
        fx.service.change_password(id, right).await.unwrap();

        assert!(
            fx.service
                .login(login("a@x.com", "N3w!Passw"), &fx.client)
                .await
                .is_ok()
        );
        // Tokens issued before the change remain valid.
        assert!(
            fx.service
                .tokens()
                .verify_access(&session.tokens.access_token)
                .is_ok()
        );
    }

    #[tokio::test]
    async fn change_password_for_missing_user() {
        let fx = fixture();
        let req = ChangePasswordRequest {
            current_password: "Str0ng!Pw".into(),
            new_password: "N3w!Passw".into(),
            confirm_new_password: "N3w!Passw".into(),
        };
        assert!(matches!(
            fx.service.change_password("missing", req).await,
            Err(AuthError::UserNotFound)
        ));
    }

    #[tokio::test]
    async fn update_profile_applies_and_detects_conflicts() {
        let fx = fixture();
        let alice = fx
            .service
            .register(registration("a@x.com", Some("alice")), &fx.client)
            .await
            .unwrap()
            .user;
        fx.service
            .register(registration("b@x.com", Some("bob")), &fx.client)
            .await
            .unwrap();

        let updated = fx
            .service
            .update_profile(
                &alice.id,
                UpdateProfileRequest {
                    name: Some(" Alice <A> ".into()),
                    email: Some("A@x.com".into()),
                    username: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name.as_deref(), Some("Alice A"));
        assert_eq!(updated.email, "a@x.com");

        let taken = fx
            .service
            .update_profile(
                &alice.id,
                UpdateProfileRequest {
                    email: Some("b@x.com".into()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(taken, Err(AuthError::DuplicateEmail)));

        let taken = fx
            .service
            .update_profile(
                &alice.id,
                UpdateProfileRequest {
                    username: Some("bob".into()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(taken, Err(AuthError::DuplicateUsername)));

        let unchanged = fx
            .service
            .update_profile(&alice.id, UpdateProfileRequest::default())
            .await
            .unwrap();
        assert_eq!(unchanged.username.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn delete_account_then_lookup() {
        let fx = fixture();
        let user = fx
            .service
            .register(registration("a@x.com", None), &fx.client)
            .await
            .unwrap()
            .user;
        fx.service.delete_account(&user.id).await.unwrap();
        assert!(fx.service.find_user(&user.id).await.unwrap().is_none());
        assert!(matches!(
            fx.service.delete_account(&user.id).await,
            Err(AuthError::UserNotFound)
        ));
    }

    #[tokio::test]
    async fn expired_tokens_surface_as_token_errors() {
        let mut config = AuthConfig::with_secret("service-test-secret");
        config.token.access_ttl = Duration::seconds(-10);
        let service = AuthService::new(
            &config,
            Arc::new(MemoryUserStore::new()),
            Arc::new(MemoryLoginAttemptStore::new()),
        );
        let subject = TokenSubject {
            id: "u1".into(),
            email: "a@x.com".into(),
            username: None,
        };
        let token = service.tokens().issue_access(&subject).unwrap();
        let err: AuthError = service.tokens().verify_access(&token).unwrap_err().into();
        assert!(matches!(err, AuthError::Token(TokenError::Expired)));
    }
}
