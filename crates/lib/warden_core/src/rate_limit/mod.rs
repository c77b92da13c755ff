//! Sliding-window rate limiting.
//!
//! Two strategies share the [`RateLimiter`] contract: [`memory::MemoryRateLimiter`]
//! keeps request instants per key in process, [`store::StoreRateLimiter`] derives
//! counts from persisted login attempts so throttling survives restarts and is
//! shared between instances.

pub mod memory;
pub mod store;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::store::StoreError;

/// Outcome of a single limiter check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// When the window frees up again.
    pub reset_at: DateTime<Utc>,
    /// Set only on rejection.
    pub retry_after_secs: Option<u64>,
}

/// Rate limiter errors.
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Per-key sliding-window limiter.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn check(&self, key: &str) -> Result<RateLimitDecision, RateLimitError>;
}

/// Whole seconds until `later`, rounded up, never below one.
pub(crate) fn seconds_until(now: DateTime<Utc>, later: DateTime<Utc>) -> u64 {
    ceil_seconds(later - now)
}

/// A duration in whole seconds, rounded up, never below one.
pub(crate) fn ceil_seconds(duration: Duration) -> u64 {
    let millis = duration.num_milliseconds().max(0) as u64;
    millis.div_ceil(1000).max(1)
}
