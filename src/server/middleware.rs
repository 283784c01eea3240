//! Request middleware
//!
//! The chain in front of both endpoints: client-IP resolution (with
//! optional trusted-proxy rewrite), connection-close/version headers,
//! access logging, the exact user-agent gate, and the per-IP rate-limit
//! gates.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{info, warn};

use crate::error::Error;
use crate::server::ratelimit::RateLimiter;
use crate::transport::RemoteAddr;

use super::AppState;

/// The exact user agent reseed clients must present. Load-bearing legacy
/// contract: no substring match, no version tolerance.
pub const CLIENT_USER_AGENT: &str = "Wget/1.11.4";

/// Advertised in the `Version` response header.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Resolved client IP, attached to every request by [`client_ip`].
#[derive(Debug, Clone)]
pub struct ClientIp(pub String);

/// Resolve the peer IP for the request. Behind a trusted proxy the first
/// `X-Forwarded-For` value replaces the socket address.
pub async fn client_ip(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let ip = resolve_client_ip(&req, state.trust_proxy);
    req.extensions_mut().insert(ClientIp(ip));
    next.run(req).await
}

fn resolve_client_ip(req: &Request, trust_proxy: bool) -> String {
    if trust_proxy {
        if let Some(forwarded) = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
        {
            if let Some(first) = forwarded.split(',').next() {
                let first = first.trim();
                if !first.is_empty() {
                    return strip_port(first);
                }
            }
        }
    }

    req.extensions()
        .get::<ConnectInfo<RemoteAddr>>()
        .map(|ci| ci.0 .0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Drop the port from `host:port` / `[v6]:port` forms.
pub(crate) fn strip_port(addr: &str) -> String {
    if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
        return sock.ip().to_string();
    }
    addr.to_string()
}

/// Every response closes its connection and reports the service version.
pub async fn close_version(req: Request, next: Next) -> Response {
    let mut res = next.run(req).await;
    let headers = res.headers_mut();
    headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
    headers.insert("Version", HeaderValue::from_static(VERSION));
    res
}

/// One log line per request.
pub async fn access_log(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let client = req
        .extensions()
        .get::<ClientIp>()
        .map(|c| c.0.clone())
        .unwrap_or_default();

    let res = next.run(req).await;

    info!(
        target: "access",
        %method,
        path = %path,
        status = res.status().as_u16(),
        client = %client,
    );
    res
}

/// Reject everything that is not exactly the reseed client.
pub async fn ua_gate(req: Request, next: Next) -> Response {
    let ua = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if ua != CLIENT_USER_AGENT {
        return Error::Forbidden.into_response();
    }

    next.run(req).await
}

/// Hourly budget on the bundle endpoint.
pub async fn bundle_rate_limit(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    limited(&state.bundle_limiter, req, next).await
}

/// Hourly budget on the browse surface.
pub async fn web_rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    limited(&state.web_limiter, req, next).await
}

async fn limited(limiter: &RateLimiter, req: Request, next: Next) -> Response {
    let client = req
        .extensions()
        .get::<ClientIp>()
        .map(|c| c.0.clone())
        .unwrap_or_default();

    if !limiter.allow(&client) {
        warn!(client = %client, "rate limit exceeded");
        return Error::RateLimited.into_response();
    }

    next.run(req).await
}
