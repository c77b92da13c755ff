//! Route configuration and the fixed stage executor.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::ORIGIN;
use axum::http::{HeaderName, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures_util::FutureExt;
use tracing::debug;
use warden_core::auth::service::AuthService;
use warden_core::rate_limit::memory::MemoryRateLimiter;

use super::auth::AuthStage;
use super::cors::{CorsStage, apply_origin};
use super::rate_limit::RateLimitStage;
use super::{Flow, Stage, security_headers};
use crate::error::AppError;

/// How often idle in-memory limiter keys are swept.
pub const LIMITER_SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

/// Browser origins a route answers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigins {
    Any,
    List(Vec<String>),
}

impl AllowedOrigins {
    pub fn allows(&self, origin: &str) -> bool {
        match self {
            AllowedOrigins::Any => true,
            AllowedOrigins::List(list) => list.iter().any(|o| o == origin),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CorsOptions {
    pub origin: AllowedOrigins,
    pub methods: Vec<Method>,
    pub allowed_headers: Vec<HeaderName>,
    pub credentials: bool,
}

/// What a rate-limit bucket is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitKey {
    Ip,
    /// Separate budget per IP and request path.
    IpAndEndpoint,
}

#[derive(Debug, Clone)]
pub struct RateLimitOptions {
    pub window: chrono::Duration,
    pub max_requests: u32,
    pub key: RateLimitKey,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AuthOptions {
    pub required: bool,
}

/// Per-route pipeline configuration.
#[derive(Debug, Clone, Default)]
pub struct RouteConfig {
    pub auth: AuthOptions,
    pub rate_limit: Option<RateLimitOptions>,
    pub cors: Option<CorsOptions>,
    /// Key rate limits on `x-forwarded-for` / `x-real-ip` when present.
    pub trust_proxy: bool,
}

/// Ordered stages plus the response decoration every request receives.
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
    cors: Option<CorsOptions>,
}

impl Pipeline {
    /// Create a pipeline from an ordered list of stages.
    pub fn new(stages: Vec<Arc<dyn Stage>>, cors: Option<CorsOptions>) -> Self {
        Self { stages, cors }
    }

    /// Build the standard CORS → rate limit → auth pipeline for a route.
    ///
    /// Each configured rate limit gets its own in-memory limiter; when a tokio
    /// runtime is available its sweeper is started too.
    pub fn from_config(config: RouteConfig, auth: Arc<AuthService>) -> Self {
        let mut stages: Vec<Arc<dyn Stage>> = Vec::new();

        if let Some(cors) = &config.cors {
            stages.push(Arc::new(CorsStage::new(cors.clone())));
        }
        if let Some(limit) = &config.rate_limit {
            let limiter = Arc::new(MemoryRateLimiter::new(limit.window, limit.max_requests));
            if tokio::runtime::Handle::try_current().is_ok() {
                let _ = limiter.spawn_sweeper(LIMITER_SWEEP_INTERVAL);
            }
            stages.push(Arc::new(RateLimitStage::new(
                limiter,
                limit.key,
                config.trust_proxy,
            )));
        }
        stages.push(Arc::new(AuthStage::new(auth, config.auth.required)));

        Self::new(stages, config.cors)
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage, then `handler`, converting failures and panics into
    /// responses and decorating the result.
    pub async fn execute<F, Fut>(&self, request: Request, handler: F) -> Response
    where
        F: FnOnce(Request) -> Fut,
        Fut: Future<Output = Response>,
    {
        let origin = request.headers().get(ORIGIN).cloned();

        let mut response = match AssertUnwindSafe(self.run(request, handler))
            .catch_unwind()
            .await
        {
            Ok(response) => response,
            Err(panic) => {
                AppError::Internal(format!("panic in request pipeline: {}", panic_message(&*panic)))
                    .into_response()
            }
        };

        if let Some(cors) = &self.cors {
            apply_origin(cors, origin.as_ref(), response.headers_mut());
        }
        security_headers::apply(response.headers_mut());
        response
    }

    async fn run<F, Fut>(&self, mut request: Request, handler: F) -> Response
    where
        F: FnOnce(Request) -> Fut,
        Fut: Future<Output = Response>,
    {
        for stage in &self.stages {
            match stage.run(&mut request).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Respond(response)) => {
                    debug!(stage = stage.name(), "stage answered request");
                    return response;
                }
                Err(e) => {
                    debug!(stage = stage.name(), error = %e, "stage rejected request");
                    return e.into_response();
                }
            }
        }
        handler(request).await
    }
}

/// Axum middleware adapter: `from_fn_with_state(Arc<Pipeline>, run_pipeline)`.
pub async fn run_pipeline(
    State(pipeline): State<Arc<Pipeline>>,
    request: Request,
    next: Next,
) -> Response {
    pipeline.execute(request, |request| next.run(request)).await
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".into()
    }
}
