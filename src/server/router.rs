//! Axum wiring: shared app state, the access-log middleware, and the top-level router,
//! generalized from per-provider clients to this crate's single upstream engine.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue, Version, header::USER_AGENT};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use base64::Engine as _;
use rand::RngCore;
use tracing::{error, info, warn};

use crate::config::PoolConfig;
use crate::dispatcher::RequestDispatcher;
use crate::manager::ManagerHandle;

use super::auth::RequireKeyAuth;
use super::routes;

const MAX_REQUEST_ID_LEN: usize = 128;
const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

fn generate_request_id() -> String {
    let mut bytes = [0u8; 12];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn format_http_version(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2",
        Version::HTTP_3 => "HTTP/3",
        _ => "HTTP/?",
    }
}

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<RequestDispatcher>,
    pub manager: Arc<ManagerHandle>,
    pub config: Arc<PoolConfig>,
    pub proxy_key: Arc<str>,
}

async fn not_found_handler() -> axum::http::StatusCode {
    axum::http::StatusCode::NOT_FOUND
}

async fn access_log(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let version = req.version();

    let request_id = req
        .headers()
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= MAX_REQUEST_ID_LEN)
        .map(str::to_string)
        .unwrap_or_else(generate_request_id);

    let user_agent = req
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let start = Instant::now();
    let mut resp = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        resp.headers_mut().insert(X_REQUEST_ID, value);
    }

    let status = resp.status();
    let latency_ms = start.elapsed().as_millis() as u64;
    let path = uri.path();
    let protocol = format_http_version(version);

    if status.is_server_error() {
        error!(%status, request_id, method = %method, protocol, path, latency_ms, user_agent, "request failed");
    } else if status.is_client_error() {
        warn!(%status, request_id, method = %method, protocol, path, latency_ms, user_agent, "request rejected");
    } else {
        info!(%status, request_id, method = %method, protocol, path, latency_ms, user_agent, "request completed");
    }

    resp
}

pub fn build_router(state: AppState) -> Router {
    let guarded = Router::new()
        .route("/v1/chat/completions", post(routes::chat::chat_completions))
        .route("/v1/completions", post(routes::completions::completions))
        .route("/v1/responses", post(routes::responses::responses))
        .route("/v1/images/generations", post(routes::images::generations))
        .route("/v1/models", get(routes::models::list_models))
        .route("/v1/models/{id}", get(routes::models::get_model))
        .layer(middleware::from_extractor_with_state::<RequireKeyAuth, _>(state.clone()));

    Router::new()
        .merge(guarded)
        .fallback(not_found_handler)
        .with_state(state)
        .layer(middleware::from_fn(access_log))
}
