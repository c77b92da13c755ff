//! Client address and user-agent extraction.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::header::USER_AGENT;
use axum::http::{Extensions, HeaderMap, request::Parts};
use warden_core::models::auth::ClientInfo;

use crate::AppState;

/// Reported when no address can be determined.
pub const UNKNOWN_IP: &str = "unknown";

/// Client IP: first `x-forwarded-for` hop, then `x-real-ip`, then the socket
/// peer address. The forwarding headers are ignored unless `trust_proxy` is set.
pub fn client_ip(headers: &HeaderMap, extensions: &Extensions, trust_proxy: bool) -> String {
    if trust_proxy && let Some(ip) = forwarded_ip(headers) {
        return ip;
    }
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_IP.to_string())
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return Some(ip.to_string());
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn client_info(
    headers: &HeaderMap,
    extensions: &Extensions,
    trust_proxy: bool,
) -> ClientInfo {
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    ClientInfo::new(client_ip(headers, extensions, trust_proxy), user_agent)
}

/// Extractor for the caller's [`ClientInfo`].
#[derive(Debug, Clone)]
pub struct Client(pub ClientInfo);

impl FromRequestParts<AppState> for Client {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(Client(client_info(
            &parts.headers,
            &parts.extensions,
            state.config.trust_proxy,
        )))
    }
}
