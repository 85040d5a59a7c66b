//! Inbound API-key guard for the server binary; not part of the core pool. Adapted from
//! `axum_extra`'s typed `Authorization<Bearer>` (not part of this crate's dependency stack) to
//! the standalone `headers` crate, which already covers that need.

use axum::extract::FromRequestParts;
use axum::http::{StatusCode, request::Parts};
use axum::response::{IntoResponse, Response};
use axum::Json;
use headers::authorization::Bearer;
use headers::{Authorization, HeaderMapExt};
use serde_json::json;
use subtle::ConstantTimeEq;

use super::router::AppState;

fn extract_header_token(headers: &axum::http::HeaderMap) -> Option<String> {
    if let Some(key) = headers.get("x-goog-api-key").and_then(|v| v.to_str().ok()) {
        return Some(key.to_string());
    }
    headers
        .typed_get::<Authorization<Bearer>>()
        .map(|auth| auth.token().to_string())
}

fn extract_query_token(query: Option<&str>) -> Option<String> {
    query.and_then(|q| {
        url::form_urlencoded::parse(q.as_bytes())
            .find(|(k, _)| k == "key")
            .map(|(_, v)| v.into_owned())
    })
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.ct_eq(b).into()
}

#[derive(Debug, Clone, Copy)]
pub struct RequireKeyAuth;

impl FromRequestParts<AppState> for RequireKeyAuth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = extract_header_token(&parts.headers).or_else(|| extract_query_token(parts.uri.query()));

        match token {
            Some(key) if constant_time_eq(key.as_bytes(), state.proxy_key.as_bytes()) => Ok(RequireKeyAuth),
            Some(_) => Err(AuthError::InvalidKey),
            None => Err(AuthError::MissingKey),
        }
    }
}

pub enum AuthError {
    MissingKey,
    InvalidKey,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, reason) = match self {
            AuthError::MissingKey => (StatusCode::UNAUTHORIZED, "missing API key"),
            AuthError::InvalidKey => (StatusCode::UNAUTHORIZED, "invalid API key"),
        };
        (status, Json(json!({ "error": { "code": status.as_u16(), "message": reason } }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_rejects_length_mismatch() {
        assert!(!constant_time_eq(b"short", b"longer-value"));
    }

    #[test]
    fn constant_time_eq_accepts_equal_slices() {
        assert!(constant_time_eq(b"same-key", b"same-key"));
    }
}
