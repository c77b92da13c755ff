//! Limiter backed by the login-attempt store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{RateLimitDecision, RateLimitError, RateLimiter, seconds_until};
use crate::models::auth::LoginAttempt;
use crate::store::{AttemptFilter, LoginAttemptStore};

/// What a key names when counting stored attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptScope {
    /// Key is a login identifier; only failed attempts count.
    FailedByIdentifier,
    /// Key is an IP address; every attempt counts.
    AllByIp,
}

/// Counts persisted login attempts inside the window.
///
/// Checking never records. Callers check before the operation and
/// [`record`](Self::record) once it has concluded.
#[derive(Clone)]
pub struct StoreRateLimiter {
    store: Arc<dyn LoginAttemptStore>,
    window: Duration,
    max_attempts: u32,
    scope: AttemptScope,
}

impl StoreRateLimiter {
    pub fn new(
        store: Arc<dyn LoginAttemptStore>,
        window: Duration,
        max_attempts: u32,
        scope: AttemptScope,
    ) -> Self {
        Self {
            store,
            window,
            max_attempts,
            scope,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub async fn check_at(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let filter = match self.scope {
            AttemptScope::FailedByIdentifier => AttemptFilter::FailedForIdentifier(key),
            AttemptScope::AllByIp => AttemptFilter::FromIp(key),
        };
        let counted = self.store.count_since(filter, now - self.window).await?;
        let count = u32::try_from(counted.count).unwrap_or(u32::MAX);
        let reset_at = counted.earliest.unwrap_or(now) + self.window;

        if count >= self.max_attempts {
            return Ok(RateLimitDecision {
                allowed: false,
                limit: self.max_attempts,
                remaining: 0,
                reset_at,
                retry_after_secs: Some(seconds_until(now, reset_at)),
            });
        }
        Ok(RateLimitDecision {
            allowed: true,
            limit: self.max_attempts,
            remaining: self.max_attempts - count - 1,
            reset_at,
            retry_after_secs: None,
        })
    }

    /// Persist a concluded attempt so later checks see it.
    pub async fn record(&self, attempt: LoginAttempt) -> Result<(), RateLimitError> {
        self.store.append(attempt).await?;
        Ok(())
    }
}

impl std::fmt::Debug for StoreRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRateLimiter")
            .field("window", &self.window)
            .field("max_attempts", &self.max_attempts)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RateLimiter for StoreRateLimiter {
    async fn check(&self, key: &str) -> Result<RateLimitDecision, RateLimitError> {
        self.check_at(key, Utc::now()).await
    }
}

/// Periodically delete attempts older than twice the window until `cancel` fires.
pub fn spawn_attempt_purge(
    store: Arc<dyn LoginAttemptStore>,
    window: Duration,
    every: std::time::Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let cutoff = Utc::now() - window * 2;
                    match store.purge_before(cutoff).await {
                        Ok(0) => {}
                        Ok(purged) => info!(purged, "purged stale login attempts"),
                        Err(e) => warn!(error = %e, "login attempt purge failed"),
                    }
                }
            }
        }
    })
}
