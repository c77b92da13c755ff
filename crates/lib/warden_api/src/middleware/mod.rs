//! Per-route request pipeline.
//!
//! Each protected route runs an ordered list of [`Stage`]s before its handler:
//! CORS preflight, rate limiting, then authentication. The executor in
//! [`pipeline`] stops at the first stage that answers or fails, then stamps
//! CORS and security headers on whatever response comes out.

pub mod auth;
pub mod client;
pub mod cors;
pub mod pipeline;
pub mod rate_limit;
pub mod security_headers;

use async_trait::async_trait;
use axum::extract::Request;
use axum::response::Response;

use crate::error::AppError;

/// What a stage decided about the request.
pub enum Flow {
    /// Hand the request to the next stage (or the handler).
    Continue,
    /// Answer now; later stages and the handler are skipped.
    Respond(Response),
}

/// One step of the pipeline.
///
/// Stages may attach extensions to the request. Returning `Err` short-circuits
/// with the error's response.
#[async_trait]
pub trait Stage: Send + Sync {
    async fn run(&self, request: &mut Request) -> Result<Flow, AppError>;

    /// Stage identifier for logging.
    fn name(&self) -> &str;
}
