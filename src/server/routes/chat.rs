//! `POST /v1/chat/completions`: extract, dispatch, shape stream-or-not.

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};

use crate::dispatcher::DispatchedResponse;
use crate::error::CoreError;
use crate::server::router::AppState;
use crate::translate::ChatCompletionRequest;

const STICKY_HEADER: &str = "x-session-id";

pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Response, CoreError> {
    let request_id = format!("chatcmpl-{}", uuid::Uuid::new_v4());
    let sticky_key = headers
        .get(STICKY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let dispatched = state
        .dispatcher
        .chat_completion(&request_id, &request, &headers, sticky_key.as_ref())
        .await?;

    Ok(match dispatched {
        DispatchedResponse::Json(body) => Json(body).into_response(),
        DispatchedResponse::Stream(stream) => Sse::new(stream).keep_alive(KeepAlive::default()).into_response(),
    })
}
