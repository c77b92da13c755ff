//! Process-wide auth configuration.
//!
//! Everything is read once at startup into explicit structs that are handed to
//! the services at construction time.

use chrono::Duration;
use thiserror::Error;

use crate::auth::jwt::{TokenConfig, resolve_jwt_secret};
use crate::auth::password::PasswordPolicy;

/// Default sliding window: 15 minutes.
pub const DEFAULT_RATE_LIMIT_WINDOW_MS: i64 = 900_000;

/// Default request budget per window for IP-scoped limits.
pub const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u32 = 100;

/// Default failed-login budget per identifier per window.
pub const DEFAULT_LOGIN_RATE_LIMIT_MAX: u32 = 5;

/// Longest accepted rate-limit window.
pub const MAX_RATE_LIMIT_WINDOW: Duration = Duration::days(365);

/// Longest accepted token lifetime.
pub const MAX_TTL: Duration = Duration::days(3650);

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid duration '{0}' (expected e.g. 900, 15m, 7d)")]
    InvalidDuration(String),

    #[error("invalid value for {var}: '{value}'")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{var} out of range: '{value}'")]
    OutOfRange { var: &'static str, value: String },
}

/// Sliding-window limits applied by the store-backed limiters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub max_requests: u32,
    pub login_max_attempts: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::milliseconds(DEFAULT_RATE_LIMIT_WINDOW_MS),
            max_requests: DEFAULT_RATE_LIMIT_MAX_REQUESTS,
            login_max_attempts: DEFAULT_LOGIN_RATE_LIMIT_MAX,
        }
    }
}

/// Everything the auth services need.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub token: TokenConfig,
    pub password: PasswordPolicy,
    pub rate_limit: RateLimitConfig,
}

impl AuthConfig {
    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable                 | Default                          |
    /// |--------------------------|----------------------------------|
    /// | `JWT_SECRET` / `AUTH_SECRET` | generated & persisted to file |
    /// | `JWT_EXPIRES_IN`         | `7d`                             |
    /// | `JWT_REFRESH_EXPIRES_IN` | `30d`                            |
    /// | `BCRYPT_ROUNDS`          | `12`                             |
    /// | `PASSWORD_MIN_LENGTH`    | `8`                              |
    /// | `RATE_LIMIT_WINDOW_MS`   | `900000`                         |
    /// | `RATE_LIMIT_MAX_REQUESTS`| `100`                            |
    /// | `LOGIN_RATE_LIMIT_MAX`   | `5`                              |
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = TokenConfig::new(String::new());
        let token = TokenConfig {
            secret: resolve_jwt_secret(),
            access_ttl: env_duration("JWT_EXPIRES_IN")?.unwrap_or(defaults.access_ttl),
            refresh_ttl: env_duration("JWT_REFRESH_EXPIRES_IN")?.unwrap_or(defaults.refresh_ttl),
            ..defaults
        };

        let policy_defaults = PasswordPolicy::default();
        let password = PasswordPolicy {
            bcrypt_cost: env_number("BCRYPT_ROUNDS")?.unwrap_or(policy_defaults.bcrypt_cost),
            min_length: env_number("PASSWORD_MIN_LENGTH")?.unwrap_or(policy_defaults.min_length),
            ..policy_defaults
        };

        let limit_defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            window: env_number::<i64>("RATE_LIMIT_WINDOW_MS")?
                .map(|ms| window_from_millis("RATE_LIMIT_WINDOW_MS", ms))
                .transpose()?
                .unwrap_or(limit_defaults.window),
            max_requests: env_number("RATE_LIMIT_MAX_REQUESTS")?
                .unwrap_or(limit_defaults.max_requests),
            login_max_attempts: env_number("LOGIN_RATE_LIMIT_MAX")?
                .unwrap_or(limit_defaults.login_max_attempts),
        };

        Ok(Self {
            token,
            password,
            rate_limit,
        })
    }

    /// Defaults with an explicit signing secret. Used by tests and embedders.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            token: TokenConfig::new(secret.into()),
            password: PasswordPolicy::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

fn env_value(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_number<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    env_value(var)
        .map(|value| {
            value
                .parse::<T>()
                .map_err(|_| ConfigError::InvalidNumber { var, value })
        })
        .transpose()
}

fn env_duration(var: &str) -> Result<Option<Duration>, ConfigError> {
    env_value(var).map(|v| parse_ttl(&v)).transpose()
}

/// A rate-limit window must be positive and at most [`MAX_RATE_LIMIT_WINDOW`].
pub fn window_from_millis(var: &'static str, ms: i64) -> Result<Duration, ConfigError> {
    Duration::try_milliseconds(ms)
        .filter(|w| *w > Duration::zero() && *w <= MAX_RATE_LIMIT_WINDOW)
        .ok_or_else(|| ConfigError::OutOfRange {
            var,
            value: ms.to_string(),
        })
}

/// Parse a TTL like `900`, `45s`, `15m`, `12h`, `7d` or `2w`.
///
/// A bare number is seconds. The result must be positive and at most
/// [`MAX_TTL`].
pub fn parse_ttl(input: &str) -> Result<Duration, ConfigError> {
    let trimmed = input.trim();
    let invalid = || ConfigError::InvalidDuration(input.to_string());

    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);
    let amount: i64 = digits.parse().map_err(|_| invalid())?;

    let duration = match unit.trim() {
        "" | "s" => Duration::try_seconds(amount),
        "m" => Duration::try_minutes(amount),
        "h" => Duration::try_hours(amount),
        "d" => Duration::try_days(amount),
        "w" => Duration::try_weeks(amount),
        _ => None,
    };
    duration
        .filter(|d| *d > Duration::zero() && *d <= MAX_TTL)
        .ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ttl_units() {
        assert_eq!(parse_ttl("900").unwrap(), Duration::seconds(900));
        assert_eq!(parse_ttl("45s").unwrap(), Duration::seconds(45));
        assert_eq!(parse_ttl("15m").unwrap(), Duration::minutes(15));
        assert_eq!(parse_ttl("12h").unwrap(), Duration::hours(12));
        assert_eq!(parse_ttl("7d").unwrap(), Duration::days(7));
        assert_eq!(parse_ttl("2w").unwrap(), Duration::weeks(2));
        assert_eq!(parse_ttl(" 30d ").unwrap(), Duration::days(30));
    }

    #[test]
    fn parse_ttl_rejects_garbage() {
        assert!(parse_ttl("").is_err());
        assert!(parse_ttl("d").is_err());
        assert!(parse_ttl("7y").is_err());
        assert!(parse_ttl("-5m").is_err());
        assert_eq!(
            parse_ttl("abc"),
            Err(ConfigError::InvalidDuration("abc".into()))
        );
    }

    #[test]
    fn parse_ttl_rejects_zero_and_overflowing_lifetimes() {
        assert!(parse_ttl("0").is_err());
        assert!(parse_ttl("0d").is_err());
        assert!(parse_ttl("9999999999999w").is_err());
        assert!(parse_ttl("3651d").is_err());
        assert_eq!(parse_ttl("3650d").unwrap(), MAX_TTL);
    }

    #[test]
    fn window_must_be_positive_and_bounded() {
        assert_eq!(
            window_from_millis("RATE_LIMIT_WINDOW_MS", 900_000).unwrap(),
            Duration::minutes(15)
        );
        for ms in [0, -1, i64::MIN, i64::MAX] {
            assert_eq!(
                window_from_millis("RATE_LIMIT_WINDOW_MS", ms),
                Err(ConfigError::OutOfRange {
                    var: "RATE_LIMIT_WINDOW_MS",
                    value: ms.to_string(),
                })
            );
        }
    }

    #[test]
    fn with_secret_uses_documented_defaults() {
        let config = AuthConfig::with_secret("s3cret");
        assert_eq!(config.token.secret, "s3cret");
        assert_eq!(config.token.access_ttl, Duration::days(7));
        assert_eq!(config.token.refresh_ttl, Duration::days(30));
        assert_eq!(config.password.min_length, 8);
        assert_eq!(config.password.bcrypt_cost, 12);
        assert_eq!(config.rate_limit.window, Duration::minutes(15));
        assert_eq!(config.rate_limit.max_requests, 100);
        assert_eq!(config.rate_limit.login_max_attempts, 5);
    }
}
