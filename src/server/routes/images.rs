//! `POST /v1/images/generations`. Routes an image-capable Gemini model through the same pool
//! and engine as chat, but reads the raw Gemini envelope back (rather than going through
//! `translate::from_gemini_response`, which only carries text) to pull out the base64 image
//! bytes Gemini returns as `inlineData` parts.

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::server::router::AppState;
use crate::translate::{self, ChatCompletionRequest, ChatMessage};

#[derive(Debug, Deserialize)]
pub struct ImageGenerationRequest {
    pub model: String,
    pub prompt: String,
    #[serde(default)]
    pub n: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ImagesResponse {
    created: u64,
    data: Vec<ImageData>,
}

#[derive(Debug, Serialize)]
struct ImageData {
    b64_json: String,
}

pub async fn generations(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ImageGenerationRequest>,
) -> Result<Json<serde_json::Value>, CoreError> {
    let chat_request = ChatCompletionRequest {
        model: request.model.clone(),
        messages: vec![ChatMessage { role: "user".to_string(), content: serde_json::json!(request.prompt) }],
        stream: false,
        temperature: None,
        top_p: None,
        max_tokens: None,
    };
    let payload = translate::to_gemini_request(&chat_request);

    let gemini = state
        .dispatcher
        .raw_completion(&request.model, &payload, &headers, None)
        .await?;

    let images = extract_inline_images(&gemini);
    if images.is_empty() {
        return Err(CoreError::Upstream {
            status: 502,
            body: "upstream returned no image parts".to_string(),
        });
    }

    let shaped = ImagesResponse {
        created: chrono::Utc::now().timestamp() as u64,
        data: images.into_iter().map(|b64_json| ImageData { b64_json }).collect(),
    };

    Ok(Json(serde_json::to_value(shaped)?))
}

fn extract_inline_images(gemini: &Value) -> Vec<String> {
    gemini
        .get("response")
        .unwrap_or(gemini)
        .get("candidates")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|candidate| candidate.get("content")?.get("parts")?.as_array())
        .flatten()
        .filter_map(|part| part.get("inlineData")?.get("data")?.as_str())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_inline_image_data() {
        let gemini = json!({
            "response": {
                "candidates": [{
                    "content": { "parts": [{ "inlineData": { "mimeType": "image/png", "data": "Zm9v" } }] }
                }]
            }
        });
        assert_eq!(extract_inline_images(&gemini), vec!["Zm9v".to_string()]);
    }

    #[test]
    fn no_inline_images_yields_empty() {
        let gemini = json!({ "response": { "candidates": [{ "content": { "parts": [{ "text": "no image" }] } }] } });
        assert!(extract_inline_images(&gemini).is_empty());
    }
}
