use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::{error, warn};

use super::IsRetryable;

/// Top-level error surface for the credential pool and everything built on top of it.
///
/// Variant names follow the semantic taxonomy in the design doc (NotFound, InvalidInput,
/// Unauthorized, RateLimited, ServerTransient, NetworkError, Cancelled, Unsupported) rather
/// than mirroring upstream status codes one-to-one.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("credential {0} not found")]
    NotFound(String),

    #[error("invalid credential payload: {0}")]
    InvalidInput(String),

    #[error("source capability not supported: {0}")]
    Unsupported(&'static str),

    #[error("upstream returned {status}")]
    Upstream { status: u16, body: String },

    #[error("no available credential")]
    NoAvailableCredential,

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("request cancelled")]
    Cancelled,

    #[error("manager actor unreachable: {0}")]
    RactorError(String),
}

#[derive(Debug, Serialize)]
struct ErrorObject {
    code: u16,
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorObject,
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            CoreError::NotFound(id) => {
                warn!(credential_id = %id, "credential not found");
                (StatusCode::NOT_FOUND, self.to_string())
            }
            CoreError::InvalidInput(msg) => {
                warn!(reason = %msg, "rejected malformed request");
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            CoreError::Unsupported(capability) => {
                warn!(capability, "source capability unsupported");
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            CoreError::Upstream { status, body } => {
                error!(status, body = %body, "upstream call failed after all fallbacks/rotations");
                (StatusCode::BAD_GATEWAY, format!("upstream error ({status}): {body}"))
            }
            CoreError::NoAvailableCredential => {
                error!("credential pool exhausted");
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            CoreError::Reqwest(err) => {
                error!(error = %err, "transport error calling upstream");
                (StatusCode::BAD_GATEWAY, "upstream transport error".to_string())
            }
            CoreError::Io(err) => {
                error!(error = %err, "io error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
            CoreError::Json(err) => {
                warn!(error = %err, "json decode/encode error");
                (StatusCode::BAD_REQUEST, "malformed json".to_string())
            }
            CoreError::Cancelled => (StatusCode::REQUEST_TIMEOUT, self.to_string()),
            CoreError::RactorError(msg) => {
                error!(error = %msg, "manager actor unreachable");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };

        let body = ErrorBody {
            error: ErrorObject { code: status.as_u16(), message },
        };

        (status, Json(body)).into_response()
    }
}

impl IsRetryable for CoreError {
    fn is_retryable(&self) -> bool {
        match self {
            CoreError::Upstream { status, .. } => {
                matches!(*status, 429 | 500 | 502 | 503 | 408 | 425)
            }
            CoreError::Reqwest(err) => !err.is_builder() && !err.is_redirect(),
            _ => false,
        }
    }
}
