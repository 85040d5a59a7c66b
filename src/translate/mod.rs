//! OpenAI <-> Gemini Code Assist wire translation.
//!
//! Deliberately thin: the Dispatcher depends on this module only through `serde_json::Value` in,
//! `serde_json::Value`/SSE chunk out, so the core engine never needs to understand either wire
//! format. Kept as plain functions rather than a trait object, since there is exactly one
//! concrete translator wired at the composition root.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u32>,
}

/// Build a Gemini `generateContent`/`streamGenerateContent` request body (the `request` field
/// of the engine's wire envelope, not the outer `model`/`project` wrapper the Engine adds).
pub fn to_gemini_request(req: &ChatCompletionRequest) -> Value {
    let mut system_instruction: Option<Value> = None;
    let mut contents = Vec::new();

    for message in &req.messages {
        let text = message_text(&message.content);
        match message.role.as_str() {
            "system" => {
                system_instruction = Some(json!({ "parts": [{ "text": text }] }));
            }
            "assistant" | "model" => {
                contents.push(json!({ "role": "model", "parts": [{ "text": text }] }));
            }
            _ => {
                contents.push(json!({ "role": "user", "parts": [{ "text": text }] }));
            }
        }
    }

    let mut generation_config = serde_json::Map::new();
    if let Some(t) = req.temperature {
        generation_config.insert("temperature".to_string(), json!(t));
    }
    if let Some(p) = req.top_p {
        generation_config.insert("topP".to_string(), json!(p));
    }
    if let Some(m) = req.max_tokens {
        generation_config.insert("maxOutputTokens".to_string(), json!(m));
    }

    let mut body = serde_json::Map::new();
    body.insert("contents".to_string(), Value::Array(contents));
    if !generation_config.is_empty() {
        body.insert("generationConfig".to_string(), Value::Object(generation_config));
    }
    if let Some(sys) = system_instruction {
        body.insert("systemInstruction".to_string(), sys);
    }

    Value::Object(body)
}

fn message_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

#[derive(Debug, Serialize)]
pub struct Choice {
    pub index: u32,
    pub message: ChatMessageOut,
    pub finish_reason: String,
}

#[derive(Debug, Serialize)]
pub struct ChatMessageOut {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Shape a non-streaming Gemini response (the raw upstream JSON, `response` envelope already
/// unwrapped by the caller) into an OpenAI chat completion response.
pub fn from_gemini_response(request_id: &str, model: &str, gemini: &Value) -> ChatCompletionResponse {
    let candidate = gemini
        .get("response")
        .unwrap_or(gemini)
        .get("candidates")
        .and_then(|c| c.get(0));

    let text = candidate
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let finish_reason = candidate
        .and_then(|c| c.get("finishReason"))
        .and_then(Value::as_str)
        .map(|r| r.to_ascii_lowercase())
        .unwrap_or_else(|| "stop".to_string());

    let usage_meta = gemini.get("response").unwrap_or(gemini).get("usageMetadata");
    let usage = Usage {
        prompt_tokens: usage_meta
            .and_then(|u| u.get("promptTokenCount"))
            .and_then(Value::as_u64)
            .unwrap_or(0),
        completion_tokens: usage_meta
            .and_then(|u| u.get("candidatesTokenCount"))
            .and_then(Value::as_u64)
            .unwrap_or(0),
        total_tokens: usage_meta
            .and_then(|u| u.get("totalTokenCount"))
            .and_then(Value::as_u64)
            .unwrap_or(0),
    };

    ChatCompletionResponse {
        id: request_id.to_string(),
        object: "chat.completion",
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: ChatMessageOut { role: "assistant", content: text },
            finish_reason,
        }],
        usage,
    }
}

/// Translate one Gemini streaming SSE data frame into an OpenAI `chat.completion.chunk`, or
/// `None` if the frame carries nothing renderable (e.g. an empty keep-alive).
pub fn gemini_sse_to_openai_chunk(request_id: &str, model: &str, data: &str) -> Option<Value> {
    let gemini: Value = serde_json::from_str(data).ok()?;
    let candidate = gemini
        .get("response")
        .unwrap_or(&gemini)
        .get("candidates")
        .and_then(|c| c.get(0))?;

    let text = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let finish_reason = candidate.get("finishReason").and_then(Value::as_str);

    Some(json!({
        "id": request_id,
        "object": "chat.completion.chunk",
        "model": model,
        "choices": [{
            "index": 0,
            "delta": { "content": text },
            "finish_reason": finish_reason,
        }],
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_message_becomes_system_instruction() {
        let req = ChatCompletionRequest {
            model: "gemini-2.5-pro".to_string(),
            messages: vec![
                ChatMessage { role: "system".to_string(), content: json!("be terse") },
                ChatMessage { role: "user".to_string(), content: json!("hi") },
            ],
            stream: false,
            temperature: Some(0.2),
            top_p: None,
            max_tokens: Some(256),
        };
        let gemini = to_gemini_request(&req);
        assert_eq!(gemini["systemInstruction"]["parts"][0]["text"], "be terse");
        assert_eq!(gemini["contents"][0]["role"], "user");
        assert_eq!(gemini["generationConfig"]["temperature"], 0.2);
        assert_eq!(gemini["generationConfig"]["maxOutputTokens"], 256);
    }

    #[test]
    fn extracts_text_and_usage_from_gemini_response() {
        let gemini = json!({
            "response": {
                "candidates": [{
                    "content": { "parts": [{ "text": "hello there" }] },
                    "finishReason": "STOP",
                }],
                "usageMetadata": { "promptTokenCount": 5, "candidatesTokenCount": 2, "totalTokenCount": 7 },
            }
        });
        let resp = from_gemini_response("req-1", "gemini-2.5-pro", &gemini);
        assert_eq!(resp.choices[0].message.content, "hello there");
        assert_eq!(resp.choices[0].finish_reason, "stop");
        assert_eq!(resp.usage.total_tokens, 7);
    }

    #[test]
    fn sse_frame_without_candidates_is_skipped() {
        let data = r#"{"response":{}}"#;
        assert!(gemini_sse_to_openai_chunk("req-1", "gemini-2.5-pro", data).is_none());
    }

    #[test]
    fn sse_frame_with_candidate_becomes_chunk() {
        let data = r#"{"response":{"candidates":[{"content":{"parts":[{"text":"hi"}]}}]}}"#;
        let chunk = gemini_sse_to_openai_chunk("req-1", "gemini-2.5-pro", data).unwrap();
        assert_eq!(chunk["choices"][0]["delta"]["content"], "hi");
    }
}
