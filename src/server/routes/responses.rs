//! `POST /v1/responses`. Minimal mapping onto the chat-completion path, reshaped into the
//! `response` object shape; not a full reimplementation of the Responses API — this is the
//! thin concrete translator, not a core component.

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
pub struct ResponsesRequest {
    pub model: String,
    pub input: String,
    #[serde(default)]
    pub stream: bool,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_output_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ResponseObject {
    id: String,
    object: &'static str,
    model: String,
    output: Vec<OutputItem>,
    usage: Usage,
}

#[derive(Debug, Serialize)]
struct OutputItem {
    #[serde(rename = "type")]
    kind: &'static str,
    role: &'static str,
    content: Vec<OutputContent>,
}

#[derive(Debug, Serialize)]
struct OutputContent {
    #[serde(rename = "type")]
    kind: &'static str,
    text: String,
}

#[derive(Debug, Serialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
    total_tokens: u64,
}

pub async fn responses(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ResponsesRequest>,
) -> Result<Json<serde_json::Value>, CoreError> {
    if request.stream {
        return Err(CoreError::InvalidInput(
            "streaming is not supported on /v1/responses, use /v1/chat/completions".to_string(),
        ));
    }

    let request_id = format!("resp-{}", uuid::Uuid::new_v4());
    let chat_request = ChatCompletionRequest {
        model: request.model.clone(),
        messages: vec![ChatMessage { role: "user".to_string(), content: json!(request.input) }],
        stream: false,
        temperature: request.temperature,
        top_p: request.top_p,
        max_tokens: request.max_output_tokens,
    };

    let dispatched = state
        .dispatcher
        .chat_completion(&request_id, &chat_request, &headers, None)
        .await?;

    let DispatchedResponse::Json(chat_response) = dispatched else {
        unreachable!("non-streaming request never yields DispatchedResponse::Stream");
    };

    let text = chat_response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .unwrap_or_default();

    let shaped = ResponseObject {
        id: chat_response.id,
        object: "response",
        model: chat_response.model,
        output: vec![OutputItem {
            kind: "message",
            role: "assistant",
            content: vec![OutputContent { kind: "output_text", text }],
        }],
        usage: Usage {
            input_tokens: chat_response.usage.prompt_tokens,
            output_tokens: chat_response.usage.completion_tokens,
            total_tokens: chat_response.usage.total_tokens,
        },
    };

    Ok(Json(serde_json::to_value(shaped)?))
}
