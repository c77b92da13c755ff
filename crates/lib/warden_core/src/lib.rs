//! # warden_core
//!
//! Core authentication logic for Warden.
//!
//! Token issuance and verification, password hashing and policy, credential
//! validation, sliding-window rate limiting, and the account use cases that tie
//! them to a user store. Nothing in this crate knows about HTTP.

pub mod auth;
pub mod config;
pub mod migrate;
pub mod models;
pub mod rate_limit;
pub mod store;
pub mod uuid;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
