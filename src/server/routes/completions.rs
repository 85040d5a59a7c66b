//! `POST /v1/completions` (legacy single-prompt completions). Adapts the prompt into a single
//! user message and reuses the chat-completion path, then reshapes the response into the
//! legacy `text_completion` object. Streaming isn't offered on this endpoint; it's a thin
//! compatibility shim, not a first-class surface.

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::dispatcher::DispatchedResponse;
use crate::error::CoreError;
use crate::server::router::AppState;
use crate::translate::{ChatCompletionRequest, ChatMessage};

#[derive(Debug, Deserialize)]
pub struct CompletionsRequest {
    pub model: String,
    pub prompt: String,
    #[serde(default)]
    pub stream: bool,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct TextCompletionResponse {
    id: String,
    object: &'static str,
    model: String,
    choices: Vec<TextChoice>,
    usage: Usage,
}

#[derive(Debug, Serialize)]
struct TextChoice {
    index: u32,
    text: String,
    finish_reason: String,
}

#[derive(Debug, Serialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

pub async fn completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CompletionsRequest>,
) -> Result<Json<serde_json::Value>, CoreError> {
    if request.stream {
        return Err(CoreError::InvalidInput(
            "streaming is not supported on /v1/completions, use /v1/chat/completions".to_string(),
        ));
    }

    let request_id = format!("cmpl-{}", uuid::Uuid::new_v4());
    let chat_request = ChatCompletionRequest {
        model: request.model.clone(),
        messages: vec![ChatMessage { role: "user".to_string(), content: json!(request.prompt) }],
        stream: false,
        temperature: request.temperature,
        top_p: request.top_p,
        max_tokens: request.max_tokens,
    };

    let dispatched = state
        .dispatcher
        .chat_completion(&request_id, &chat_request, &headers, None)
        .await?;

    let DispatchedResponse::Json(chat_response) = dispatched else {
        unreachable!("non-streaming request never yields DispatchedResponse::Stream");
    };

    let shaped = TextCompletionResponse {
        id: chat_response.id,
        object: "text_completion",
        model: chat_response.model,
        choices: chat_response
            .choices
            .into_iter()
            .map(|c| TextChoice { index: c.index, text: c.message.content, finish_reason: c.finish_reason })
            .collect(),
        usage: Usage {
            prompt_tokens: chat_response.usage.prompt_tokens,
            completion_tokens: chat_response.usage.completion_tokens,
            total_tokens: chat_response.usage.total_tokens,
        },
    };

    Ok(Json(serde_json::to_value(shaped)?))
}
