use axum::http::StatusCode;
use oauth2::RequestTokenError;
use oauth2::basic::BasicErrorResponse;

use super::IsRetryable;

/// Errors raised while exchanging or coalescing an OAuth refresh.
#[derive(Debug, thiserror::Error)]
pub enum OauthError {
    #[error(transparent)]
    Request(#[from] reqwest::Error),

    #[error("token endpoint returned {0}")]
    UpstreamStatus(StatusCode),

    #[error("token endpoint rejected the request: {error}{}", description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    TokenResponse { error: String, description: Option<String> },

    #[error("credential has no refresh token")]
    MissingRefreshToken,

    #[error("credential is missing client_id/client_secret")]
    MissingClientCredentials,

    #[error("credential {0} is not an oauth credential")]
    NotOauth(String),

    #[error(transparent)]
    InvalidUrl(#[from] url::ParseError),
}

impl IsRetryable for OauthError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            OauthError::Request(_) | OauthError::UpstreamStatus(_)
        )
    }
}

type PkgsRequestTokenError<RE> = RequestTokenError<RE, BasicErrorResponse>;

impl<RE> From<PkgsRequestTokenError<RE>> for OauthError
where
    RE: std::error::Error + 'static,
{
    fn from(err: PkgsRequestTokenError<RE>) -> Self {
        match err {
            RequestTokenError::ServerResponse(resp) => OauthError::TokenResponse {
                error: resp.error().to_string(),
                description: resp.error_description().cloned(),
            },
            RequestTokenError::Request(_) => OauthError::UpstreamStatus(StatusCode::BAD_GATEWAY),
            other => OauthError::TokenResponse {
                error: "request_failed".to_string(),
                description: Some(other.to_string()),
            },
        }
    }
}
