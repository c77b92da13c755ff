//! CORS preflight handling and response decoration.

use async_trait::async_trait;
use axum::extract::Request;
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, VARY,
};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::IntoResponse;

use super::pipeline::{AllowedOrigins, CorsOptions};
use super::{Flow, Stage};
use crate::error::AppError;

/// Seconds a browser may cache a preflight answer.
pub const PREFLIGHT_MAX_AGE_SECS: u32 = 86_400;

/// Answers `OPTIONS` requests and lets everything else through.
pub struct CorsStage {
    options: CorsOptions,
}

impl CorsStage {
    pub fn new(options: CorsOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Stage for CorsStage {
    async fn run(&self, request: &mut Request) -> Result<Flow, AppError> {
        if request.method() != Method::OPTIONS {
            return Ok(Flow::Continue);
        }

        let mut response = StatusCode::OK.into_response();
        let headers = response.headers_mut();
        apply_origin(&self.options, request.headers().get("origin"), headers);

        let methods = join(self.options.methods.iter().map(Method::as_str));
        let allowed = join(self.options.allowed_headers.iter().map(|h| h.as_str()));
        if let Ok(value) = HeaderValue::from_str(&methods) {
            headers.insert(ACCESS_CONTROL_ALLOW_METHODS, value);
        }
        if let Ok(value) = HeaderValue::from_str(&allowed) {
            headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, value);
        }
        headers.insert(
            ACCESS_CONTROL_MAX_AGE,
            HeaderValue::from(PREFLIGHT_MAX_AGE_SECS),
        );
        Ok(Flow::Respond(response))
    }

    fn name(&self) -> &str {
        "cors"
    }
}

/// Set `Access-Control-Allow-Origin` (when the origin is allowed) and
/// `Access-Control-Allow-Credentials`. Safe to call more than once.
pub fn apply_origin(options: &CorsOptions, origin: Option<&HeaderValue>, headers: &mut HeaderMap) {
    let origin = origin.and_then(|o| o.to_str().ok());
    match &options.origin {
        AllowedOrigins::Any => {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        }
        AllowedOrigins::List(_) => {
            let varies = headers
                .get_all(VARY)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .flat_map(|v| v.split(','))
                .any(|v| v.trim().eq_ignore_ascii_case("origin"));
            if !varies {
                headers.append(VARY, HeaderValue::from_static("origin"));
            }
            if let Some(origin) = origin.filter(|o| options.origin.allows(o))
                && let Ok(value) = HeaderValue::from_str(origin)
            {
                headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
            }
        }
    }
    if options.credentials {
        headers.insert(
            ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
    }
}

fn join<'a>(items: impl Iterator<Item = &'a str>) -> String {
    items.collect::<Vec<_>>().join(", ")
}
