//! Request Dispatcher: the seam between inbound HTTP handlers and the core pool.
//!
//! Builds the Gemini payload via `translate`, drives the Engine, shapes the result back into an
//! OpenAI-style response (materialized JSON or an SSE stream), and reports the outcome to the
//! Routing Strategy. Split between "get bytes from upstream" and "shape bytes for the client",
//! generalized from a single provider to this engine.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::Event;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::header::HeaderMap;
use serde_json::Value;
use tracing::warn;

use crate::engine::{EngineResponse, UpstreamEngine};
use crate::error::CoreError;
use crate::routing::RoutingStrategy;
use crate::translate::{self, ChatCompletionRequest, ChatCompletionResponse};

const SSE_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

pub enum DispatchedResponse {
    Json(ChatCompletionResponse),
    Stream(Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>),
}

pub struct RequestDispatcher {
    engine: Arc<UpstreamEngine>,
    strategy: Arc<RoutingStrategy>,
}

impl RequestDispatcher {
    pub fn new(engine: Arc<UpstreamEngine>, strategy: Arc<RoutingStrategy>) -> Self {
        Self { engine, strategy }
    }

    pub async fn chat_completion(
        &self,
        request_id: &str,
        request: &ChatCompletionRequest,
        inbound: &HeaderMap,
        sticky_key: Option<&String>,
    ) -> Result<DispatchedResponse, CoreError> {
        let first_pick = self.strategy.pick(sticky_key).await?;
        let payload = translate::to_gemini_request(request);

        let result = self
            .engine
            .execute(&request.model, &payload, request.stream, inbound, Some(first_pick.clone()))
            .await;

        match &result {
            Ok(_) => self.strategy.on_result(sticky_key, &first_pick.id, true).await,
            Err(_) => self.strategy.on_result(sticky_key, &first_pick.id, false).await,
        }

        let (response, resolved_model) = result?;

        match response {
            EngineResponse::Json(value) => {
                let shaped = translate::from_gemini_response(request_id, &resolved_model, &value);
                Ok(DispatchedResponse::Json(shaped))
            }
            EngineResponse::Stream(upstream) => {
                let stream = shape_stream(request_id.to_string(), resolved_model, upstream);
                Ok(DispatchedResponse::Stream(Box::pin(stream)))
            }
        }
    }

    /// Run a non-streaming request without translating the response, so callers that need the
    /// raw Gemini envelope (image generation's `inlineData` parts, which the OpenAI chat shape
    /// has no room for) can read it directly. Used by the images route only.
    pub async fn raw_completion(
        &self,
        model: &str,
        payload: &Value,
        inbound: &HeaderMap,
        sticky_key: Option<&String>,
    ) -> Result<Value, CoreError> {
        let first_pick = self.strategy.pick(sticky_key).await?;
        let result = self
            .engine
            .execute(model, payload, false, inbound, Some(first_pick.clone()))
            .await;

        match &result {
            Ok(_) => self.strategy.on_result(sticky_key, &first_pick.id, true).await,
            Err(_) => self.strategy.on_result(sticky_key, &first_pick.id, false).await,
        }

        let (response, _resolved_model) = result?;
        match response {
            EngineResponse::Json(value) => Ok(value),
            EngineResponse::Stream(_) => unreachable!("raw_completion always requests stream=false"),
        }
    }
}

fn shape_stream(
    request_id: String,
    model: String,
    upstream: reqwest::Response,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let frames = upstream.bytes_stream().eventsource();

    let chunks = frames.filter_map(move |frame| {
        let request_id = request_id.clone();
        let model = model.clone();
        async move {
            let frame = match frame {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(error = %err, "malformed upstream SSE frame, skipping");
                    return None;
                }
            };
            if frame.data.is_empty() {
                return None;
            }
            let chunk = translate::gemini_sse_to_openai_chunk(&request_id, &model, &frame.data)?;
            Event::default().json_data(chunk).ok()
        }
    });

    let timed = tokio_stream::StreamExt::timeout(chunks, SSE_IDLE_TIMEOUT).filter_map(|item| async move {
        match item {
            Ok(event) => Some(event),
            Err(_) => {
                warn!("upstream SSE stream idle for {SSE_IDLE_TIMEOUT:?}, closing");
                None
            }
        }
    });

    let done = futures::stream::once(async { Event::default().data("[DONE]") });

    timed.chain(done).map(Ok::<_, Infallible>)
}
