//! # warden_api
//!
//! HTTP API library for Warden.
//!
//! Every route runs its own [`middleware::pipeline::Pipeline`] (CORS, rate
//! limit, authentication) in front of the handler.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod services;

use std::sync::Arc;

use axum::Router;
use axum::http::Method;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::middleware::from_fn_with_state;
use axum::routing::{MethodRouter, delete, get, post, put};
use sqlx::PgPool;
use tower_http::trace::TraceLayer;
use warden_core::auth::service::AuthService;

use crate::config::ApiConfig;
use crate::handlers::auth;
use crate::middleware::pipeline::{
    AuthOptions, CorsOptions, Pipeline, RateLimitKey, RateLimitOptions, RouteConfig, run_pipeline,
};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Account use cases and the token service.
    pub auth: Arc<AuthService>,
    /// API configuration.
    pub config: ApiConfig,
}

impl AppState {
    pub fn new(auth: Arc<AuthService>, config: ApiConfig) -> Self {
        Self { auth, config }
    }
}

/// Run embedded database migrations.
///
/// Delegates to `warden_core::migrate::migrate()` which owns the migration files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    warden_core::migrate::migrate(pool).await
}

/// Pipeline settings for one route.
fn route_config(
    config: &ApiConfig,
    method: Method,
    required: bool,
    rate_limit: Option<RateLimitOptions>,
) -> RouteConfig {
    let mut allowed_headers = vec![CONTENT_TYPE];
    if required {
        allowed_headers.push(AUTHORIZATION);
    }
    RouteConfig {
        auth: AuthOptions { required },
        rate_limit,
        cors: Some(CorsOptions {
            origin: config.cors_origins.clone(),
            methods: vec![method, Method::OPTIONS],
            allowed_headers,
            credentials: true,
        }),
        trust_proxy: config.trust_proxy,
    }
}

fn limit(minutes: i64, max_requests: u32, key: RateLimitKey) -> Option<RateLimitOptions> {
    Some(RateLimitOptions {
        window: chrono::Duration::minutes(minutes),
        max_requests,
        key,
    })
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let auth_service = state.auth.clone();
    let guard = move |handler: MethodRouter<AppState>, config: RouteConfig| {
        let pipeline = Arc::new(Pipeline::from_config(config, auth_service.clone()));
        handler
            .options(auth::preflight_handler)
            .layer(from_fn_with_state(pipeline, run_pipeline))
    };
    let config = &state.config;

    Router::new()
        .route(
            routes::POST_AUTH_REGISTER,
            guard(
                post(auth::register_handler),
                route_config(config, Method::POST, false, limit(15, 5, RateLimitKey::Ip)),
            ),
        )
        .route(
            routes::POST_AUTH_LOGIN,
            guard(
                post(auth::login_handler),
                route_config(
                    config,
                    Method::POST,
                    false,
                    limit(15, 10, RateLimitKey::IpAndEndpoint),
                ),
            ),
        )
        .route(
            routes::POST_AUTH_LOGOUT,
            guard(
                post(auth::logout_handler),
                route_config(config, Method::POST, false, None),
            ),
        )
        .route(
            routes::GET_AUTH_ME,
            guard(
                get(auth::me_handler),
                route_config(config, Method::GET, true, None),
            ),
        )
        .route(
            routes::PUT_AUTH_PROFILE,
            guard(
                put(auth::update_profile_handler),
                route_config(config, Method::PUT, true, limit(15, 10, RateLimitKey::Ip)),
            ),
        )
        .route(
            routes::POST_AUTH_CHANGE_PASSWORD,
            guard(
                post(auth::change_password_handler),
                route_config(config, Method::POST, true, limit(15, 5, RateLimitKey::Ip)),
            ),
        )
        .route(
            routes::DELETE_AUTH_DELETE_ACCOUNT,
            guard(
                delete(auth::delete_account_handler),
                route_config(config, Method::DELETE, true, limit(60, 3, RateLimitKey::Ip)),
            ),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
