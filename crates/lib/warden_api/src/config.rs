//! API server configuration.

use crate::middleware::pipeline::AllowedOrigins;

/// Default allowed browser origin.
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:3000";

/// Configuration for the HTTP layer.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:3100").
    pub bind_addr: String,
    /// Origins allowed to call the API from a browser.
    pub cors_origins: AllowedOrigins,
    /// Mark the auth cookie `Secure`.
    pub cookie_secure: bool,
    /// Take the client address from `x-forwarded-for` / `x-real-ip`. Turn off
    /// when clients reach the server directly.
    pub trust_proxy: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3100".into(),
            cors_origins: AllowedOrigins::List(vec![DEFAULT_CORS_ORIGIN.into()]),
            cookie_secure: false,
            trust_proxy: true,
        }
    }
}

impl ApiConfig {
    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable        | Default                  |
    /// |-----------------|--------------------------|
    /// | `BIND_ADDR`     | `127.0.0.1:3100`         |
    /// | `CORS_ORIGINS`  | `http://localhost:3000`  |
    /// | `COOKIE_SECURE` | `false`                  |
    /// | `TRUST_PROXY`   | `true`                   |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|v| parse_origins(&v))
                .unwrap_or(defaults.cors_origins),
            cookie_secure: std::env::var("COOKIE_SECURE")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.cookie_secure),
            trust_proxy: std::env::var("TRUST_PROXY")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.trust_proxy),
        }
    }
}

/// `*` allows any origin; otherwise a comma-separated list.
pub fn parse_origins(value: &str) -> AllowedOrigins {
    let origins: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(|o| o.trim_end_matches('/').to_string())
        .collect();
    if origins.iter().any(|o| o == "*") {
        AllowedOrigins::Any
    } else {
        AllowedOrigins::List(origins)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
