//! In-process sliding-window limiter.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{RateLimitDecision, RateLimitError, RateLimiter, ceil_seconds};

/// Keeps the instants of recent requests per key.
///
/// Prune and append for one key happen under that key's map entry lock, so
/// concurrent checks on a key are counted exactly. A key swept and recreated
/// between two racing checks may admit one extra request.
#[derive(Debug)]
pub struct MemoryRateLimiter {
    window: Duration,
    max_requests: u32,
    hits: DashMap<String, VecDeque<DateTime<Utc>>>,
}

impl MemoryRateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            hits: DashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Check `key` as of `now`, recording the request if it is admitted.
    pub fn check_at(&self, key: &str, now: DateTime<Utc>) -> RateLimitDecision {
        let cutoff = now - self.window;
        let mut entry = self.hits.entry(key.to_string()).or_default();
        let instants = entry.value_mut();
        prune(instants, cutoff);

        let count = instants.len() as u32;
        let reset_at = now + self.window;
        if count >= self.max_requests {
            return RateLimitDecision {
                allowed: false,
                limit: self.max_requests,
                remaining: 0,
                reset_at,
                retry_after_secs: Some(ceil_seconds(self.window)),
            };
        }

        instants.push_back(now);
        RateLimitDecision {
            allowed: true,
            limit: self.max_requests,
            remaining: self.max_requests - count - 1,
            reset_at,
            retry_after_secs: None,
        }
    }

    /// Prune every key as of `now` and drop the ones left empty.
    /// Returns how many keys were removed.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.window;
        let before = self.hits.len();
        self.hits.retain(|_, instants| {
            prune(instants, cutoff);
            !instants.is_empty()
        });
        before.saturating_sub(self.hits.len())
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    /// Run [`sweep`](Self::sweep) every `every` until the limiter is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: std::time::Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(limiter) = weak.upgrade() else {
                    break;
                };
                let removed = limiter.sweep();
                if removed > 0 {
                    debug!(removed, remaining = limiter.len(), "swept idle rate-limit keys");
                }
            }
        })
    }
}

fn prune(instants: &mut VecDeque<DateTime<Utc>>, cutoff: DateTime<Utc>) {
    while instants.front().is_some_and(|t| *t <= cutoff) {
        instants.pop_front();
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn check(&self, key: &str) -> Result<RateLimitDecision, RateLimitError> {
        Ok(self.check_at(key, Utc::now()))
    }
}
