//! Reseed HTTP surface
//!
//! Two endpoints composed from middleware:
//!
//! - `GET <prefix>/i2pseeds.su3` — the bundle endpoint, gated on the
//!   exact client user agent and a tight per-IP budget.
//! - everything else — the browse surface: one-time-token bundle access
//!   for browsers, the homepage, static assets, and a 404 fallback.
//!
//! The same router is served over every transport.

pub mod blacklist;
pub mod homepage;
pub mod middleware;
pub mod ratelimit;
pub mod tokens;

pub use blacklist::Blacklist;
pub use homepage::{BrowserUi, DefaultUi};
pub use ratelimit::RateLimiter;
pub use tokens::TokenStore;

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Form, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Router};
use serde::Deserialize;
use tracing::warn;

use crate::error::Error;
use crate::reseed::{Peer, Reseeder};

use middleware::{ClientIp, CLIENT_USER_AGENT};

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match self {
            Error::NotAvailable => StatusCode::NOT_FOUND,
            Error::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Error::Forbidden => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = format!(
            "{} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Error")
        );
        (status, body).into_response()
    }
}

/// Shared state behind the request pipeline.
#[derive(Clone)]
pub struct AppState {
    pub reseeder: Arc<Reseeder>,
    pub tokens: Arc<TokenStore>,
    pub bundle_limiter: Arc<RateLimiter>,
    pub web_limiter: Arc<RateLimiter>,
    pub ui: Arc<dyn BrowserUi>,
    pub trust_proxy: bool,
}

/// Assemble the reseed router. `prefix` prepends the bundle path.
pub fn build_router(state: AppState, prefix: &str) -> Router {
    let bundle_path = format!("{}/i2pseeds.su3", prefix);

    let bundle_route = get(bundle_handler)
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::bundle_rate_limit,
        ))
        .route_layer(from_fn(middleware::ua_gate));

    let browse = Router::new()
        .fallback(browse_handler)
        .layer(from_fn_with_state(state.clone(), middleware::web_rate_limit));

    Router::new()
        .route(&bundle_path, bundle_route)
        .merge(browse)
        .layer(from_fn(middleware::access_log))
        .layer(from_fn(middleware::close_version))
        .layer(from_fn_with_state(state.clone(), middleware::client_ip))
        .with_state(state)
}

async fn bundle_handler(
    State(state): State<AppState>,
    Extension(client): Extension<ClientIp>,
) -> Response {
    serve_bundle(&state, &client)
}

fn serve_bundle(state: &AppState, client: &ClientIp) -> Response {
    let peer = Peer::new(client.0.clone());

    match state.reseeder.peer_bundle(&peer) {
        Ok(bundle) => Response::builder()
            .header(
                header::CONTENT_DISPOSITION,
                "attachment; filename=i2pseeds.su3",
            )
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(header::CONTENT_LENGTH, bundle.len())
            .body(Body::from(bundle))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        Err(e @ Error::NotAvailable) => e.into_response(),
        Err(e) => {
            warn!(error = %e, "error serving su3");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "500 Unable to serve su3",
            )
                .into_response()
        }
    }
}

#[derive(Deserialize, Default)]
struct BrowseForm {
    onetime: Option<String>,
}

/// Browser dispatch: a valid one-time token gets the bundle; anything
/// that is not the reseed client gets the browser pages; the client
/// itself falls through to 404.
async fn browse_handler(
    State(state): State<AppState>,
    Extension(client): Extension<ClientIp>,
    uri: Uri,
    headers: HeaderMap,
    form: Result<Form<BrowseForm>, axum::extract::rejection::FormRejection>,
) -> Response {
    if let Some(token) = form.ok().and_then(|f| f.0.onetime) {
        if state.tokens.consume(&token) {
            return serve_bundle(&state, &client);
        }
    }

    let ua = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if ua != CLIENT_USER_AGENT {
        return browser_page(&state, uri.path());
    }

    Error::NotAvailable.into_response()
}

fn browser_page(state: &AppState, path: &str) -> Response {
    if path == "/" {
        let token = state.tokens.issue();
        return Html(state.ui.home_page(&token)).into_response();
    }

    match state.ui.asset(path) {
        Some((content_type, body)) => {
            ([(header::CONTENT_TYPE, content_type)], body).into_response()
        }
        None => Error::NotAvailable.into_response(),
    }
}
