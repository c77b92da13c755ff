//! Password hashing via bcrypt, strength policy, and secure generation.

use std::sync::{Arc, OnceLock};

use rand::seq::SliceRandom;
use rand::{Rng, rng};
use tracing::warn;

use super::AuthError;

const UPPERCASE: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWERCASE: &str = "abcdefghijklmnopqrstuvwxyz";
const DIGITS: &str = "0123456789";

/// Characters that satisfy the special-character rule.
pub const SPECIAL_CHARS: &str = "!@#$%^&*(),.?\":{}|<>";

/// Default length for [`PasswordService::generate`].
pub const DEFAULT_GENERATED_LENGTH: usize = 16;

/// bcrypt only reads this many bytes of a secret.
pub const BCRYPT_MAX_BYTES: usize = 72;

/// Password strength requirements and hashing cost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub max_length: usize,
    /// bcrypt cost factor.
    pub bcrypt_cost: u32,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
    pub require_special: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            max_length: 128,
            bcrypt_cost: 12,
            require_uppercase: true,
            require_lowercase: true,
            require_digit: true,
            require_special: true,
        }
    }
}

impl PasswordPolicy {
    pub fn min_length_message(&self) -> String {
        format!(
            "Password must be at least {} characters long",
            self.min_length
        )
    }

    pub fn max_bytes_message(&self) -> String {
        format!("Password must be at most {BCRYPT_MAX_BYTES} bytes long")
    }
}

/// Outcome of [`PasswordService::check_strength`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrengthReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

/// Hashes, verifies, and strength-checks secrets.
#[derive(Debug, Clone)]
pub struct PasswordService {
    policy: PasswordPolicy,
    decoy_hash: Arc<OnceLock<String>>,
}

impl PasswordService {
    pub fn new(policy: PasswordPolicy) -> Self {
        Self {
            policy,
            decoy_hash: Arc::new(OnceLock::new()),
        }
    }

    pub fn policy(&self) -> &PasswordPolicy {
        &self.policy
    }

    /// Hash a password with bcrypt at the configured cost.
    ///
    /// Secrets shorter than the policy minimum, or longer than bcrypt can read,
    /// are rejected before any hashing.
    pub fn hash(&self, secret: &str) -> Result<String, AuthError> {
        if secret.chars().count() < self.policy.min_length {
            return Err(AuthError::PolicyViolation(self.policy.min_length_message()));
        }
        if secret.len() > BCRYPT_MAX_BYTES {
            return Err(AuthError::PolicyViolation(self.policy.max_bytes_message()));
        }
        bcrypt::non_truncating_hash(secret, self.policy.bcrypt_cost)
            .map_err(|e| AuthError::Internal(format!("bcrypt hash: {e}")))
    }

    /// Verify a password against a bcrypt hash.
    ///
    /// An empty secret, an empty hash and an unparseable hash all yield `false`,
    /// as does a secret longer than [`BCRYPT_MAX_BYTES`], which could otherwise
    /// match on its truncated prefix.
    pub fn verify(&self, secret: &str, hash: &str) -> bool {
        if secret.is_empty() || hash.is_empty() || secret.len() > BCRYPT_MAX_BYTES {
            return false;
        }
        match bcrypt::non_truncating_verify(secret, hash) {
            Ok(matches) => matches,
            Err(e) => {
                warn!(error = %e, "stored password hash could not be parsed");
                false
            }
        }
    }

    /// [`hash`](Self::hash) on the blocking thread pool.
    pub async fn hash_off_thread(&self, secret: String) -> Result<String, AuthError> {
        let service = self.clone();
        tokio::task::spawn_blocking(move || service.hash(&secret))
            .await
            .map_err(|e| AuthError::Internal(format!("hash task: {e}")))?
    }

    /// [`verify`](Self::verify) on the blocking thread pool.
    pub async fn verify_off_thread(&self, secret: String, hash: String) -> Result<bool, AuthError> {
        let service = self.clone();
        tokio::task::spawn_blocking(move || service.verify(&secret, &hash))
            .await
            .map_err(|e| AuthError::Internal(format!("verify task: {e}")))
    }

    /// Spend the same bcrypt effort as a real verification when there is no
    /// hash to check against. The outcome is always a mismatch.
    pub async fn verify_decoy_off_thread(&self, secret: String) -> Result<(), AuthError> {
        let service = self.clone();
        tokio::task::spawn_blocking(move || {
            let decoy = service.decoy_hash.get_or_init(|| {
                let filler = service.generate(DEFAULT_GENERATED_LENGTH);
                bcrypt::hash(filler, service.policy.bcrypt_cost).unwrap_or_default()
            });
            service.verify(&secret, decoy);
        })
        .await
        .map_err(|e| AuthError::Internal(format!("decoy task: {e}")))
    }

    /// Evaluate every strength rule and report all failures together.
    pub fn check_strength(&self, secret: &str) -> StrengthReport {
        let mut errors = Vec::new();

        if secret.is_empty() {
            errors.push("Password is required".to_string());
            return StrengthReport {
                is_valid: false,
                errors,
            };
        }

        if secret.chars().count() < self.policy.min_length {
            errors.push(self.policy.min_length_message());
        }
        if secret.len() > BCRYPT_MAX_BYTES {
            errors.push(self.policy.max_bytes_message());
        }
        if self.policy.require_uppercase && !secret.chars().any(|c| c.is_ascii_uppercase()) {
            errors.push("Password must contain at least one uppercase letter".to_string());
        }
        if self.policy.require_lowercase && !secret.chars().any(|c| c.is_ascii_lowercase()) {
            errors.push("Password must contain at least one lowercase letter".to_string());
        }
        if self.policy.require_digit && !secret.chars().any(|c| c.is_ascii_digit()) {
            errors.push("Password must contain at least one number".to_string());
        }
        if self.policy.require_special && !secret.chars().any(|c| SPECIAL_CHARS.contains(c)) {
            errors.push("Password must contain at least one special character".to_string());
        }

        StrengthReport {
            is_valid: errors.is_empty(),
            errors,
        }
    }

    /// Generate a random password that passes [`check_strength`](Self::check_strength).
    ///
    /// The result has exactly `length` characters when `length` is at least the
    /// policy minimum. Shorter requests, including those between four and the
    /// minimum, return a password of the minimum length instead, since a shorter
    /// one would fail the length rule. Requests above [`BCRYPT_MAX_BYTES`] are
    /// capped there so the result can still be hashed.
    pub fn generate(&self, length: usize) -> String {
        let length = length
            .max(self.policy.min_length)
            .max(4)
            .min(BCRYPT_MAX_BYTES.max(self.policy.min_length));
        let mut rng = rng();
        let alphabet: Vec<char> = [UPPERCASE, LOWERCASE, DIGITS, SPECIAL_CHARS]
            .concat()
            .chars()
            .collect();

        let mut password: Vec<char> = [UPPERCASE, LOWERCASE, DIGITS, SPECIAL_CHARS]
            .iter()
            .map(|set| pick(&mut rng, set))
            .collect();
        while password.len() < length {
            password.push(alphabet[rng.random_range(0..alphabet.len())]);
        }
        password.shuffle(&mut rng);
        password.into_iter().collect()
    }
}

impl Default for PasswordService {
    fn default() -> Self {
        Self::new(PasswordPolicy::default())
    }
}

fn pick<R: Rng>(rng: &mut R, set: &str) -> char {
    let chars: Vec<char> = set.chars().collect();
    chars[rng.random_range(0..chars.len())]
}
