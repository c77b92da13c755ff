//! Rate-limit stage.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::Request;
use tracing::warn;
use warden_core::rate_limit::RateLimiter;

use super::client::client_ip;
use super::pipeline::RateLimitKey;
use super::{Flow, Stage};
use crate::error::AppError;

/// Rejects the request with `429` once its key has used up the window.
pub struct RateLimitStage {
    limiter: Arc<dyn RateLimiter>,
    key: RateLimitKey,
    trust_proxy: bool,
}

impl RateLimitStage {
    pub fn new(limiter: Arc<dyn RateLimiter>, key: RateLimitKey, trust_proxy: bool) -> Self {
        Self {
            limiter,
            key,
            trust_proxy,
        }
    }

    fn key_for(&self, request: &Request) -> String {
        let ip = client_ip(request.headers(), request.extensions(), self.trust_proxy);
        match self.key {
            RateLimitKey::Ip => format!("ip:{ip}"),
            RateLimitKey::IpAndEndpoint => format!("ip:{ip}:{}", request.uri().path()),
        }
    }
}

#[async_trait]
impl Stage for RateLimitStage {
    async fn run(&self, request: &mut Request) -> Result<Flow, AppError> {
        let key = self.key_for(request);
        let decision = self.limiter.check(&key).await?;
        if !decision.allowed {
            warn!(key = %key, limit = decision.limit, "rate limit exceeded");
            return Err(AppError::RateLimited {
                message: "Too many requests, please try again later.".into(),
                decision,
            });
        }
        Ok(Flow::Continue)
    }

    fn name(&self) -> &str {
        "rate_limit"
    }
}
