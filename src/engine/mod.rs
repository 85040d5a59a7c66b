//! Upstream Engine: turns one already-translated Gemini payload into an upstream HTTP call,
//! applying payload safety, credential rotation, retry/backoff and model fallback.
//!
//! Shaped as three nested loops (model fallback, credential rotation, same-credential retry)
//! because the retry/rotation/ban rules here are richer than a single `backon` closure can
//! express directly; `engine::retry` carries the per-attempt decision so each loop body stays a
//! plain `match`.

pub mod endpoints;
pub mod headers;
pub mod payload;
pub mod retry;

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::PoolConfig;
use crate::error::CoreError;
use crate::manager::ManagerHandle;
use crate::model_catalog;
use crate::routing::RoutingStrategy;

use endpoints::GeminiEndpoints;
use retry::Attempt;

/// What an upstream attempt produced, for the dispatcher to forward to the client.
pub enum EngineResponse {
    Json(Value),
    Stream(reqwest::Response),
}

/// Per-call budget: `min(8, max(2, 2 * pool_size))`.
fn max_rotations(pool_size: usize) -> u32 {
    (2 * pool_size as u32).clamp(2, 8)
}

pub struct UpstreamEngine {
    http: reqwest::Client,
    manager: Arc<ManagerHandle>,
    strategy: Arc<RoutingStrategy>,
    config: Arc<PoolConfig>,
    endpoints: GeminiEndpoints,
}

impl UpstreamEngine {
    pub fn new(
        http: reqwest::Client,
        manager: Arc<ManagerHandle>,
        strategy: Arc<RoutingStrategy>,
        config: Arc<PoolConfig>,
    ) -> Self {
        let endpoints = GeminiEndpoints::new(&config.gemini_base_url);
        Self {
            http,
            manager,
            strategy,
            config,
            endpoints,
        }
    }

    /// Run `payload` (already in Gemini wire shape, minus the outer `model`/`project` envelope)
    /// against the upstream, walking the model fallback chain for `requested_model` and rotating
    /// credentials within each model as needed. `inbound` carries the caller's headers for
    /// passthrough.
    /// `first_pick` is the credential the Routing Strategy already selected (sticky binding or
    /// a fresh `Manager.get_credential()`), used only for the first attempt of the first model
    /// in the fallback chain; every rotation after that is the Engine's own.
    pub async fn execute(
        &self,
        requested_model: &str,
        payload: &Value,
        stream: bool,
        inbound: &HeaderMap,
        first_pick: Option<crate::credential::Credential>,
    ) -> Result<(EngineResponse, String), CoreError> {
        let chain = model_catalog::fallback_chain(requested_model, &self.config.disabled_models);
        if chain.is_empty() {
            return Err(CoreError::InvalidInput(format!(
                "model {requested_model} is disabled"
            )));
        }

        let pool_size = self.manager.pool_size().await.max(1);
        let rotation_budget = max_rotations(pool_size);
        let mut last_err: Option<CoreError> = None;
        let mut first_pick = first_pick;

        for (idx, model) in chain.iter().enumerate() {
            let is_last_model = idx + 1 == chain.len();
            let mut model_payload = payload.clone();
            payload::apply_safety_transforms(&mut model_payload, model);

            match self
                .run_model(model, &model_payload, stream, inbound, rotation_budget, first_pick.take())
                .await
            {
                Ok(resp) => return Ok((resp, model.clone())),
                Err(ModelOutcome::NextModel) if !is_last_model => {
                    info!(model, "upstream reported model not found, trying next fallback model");
                    continue;
                }
                Err(ModelOutcome::NextModel) => {
                    last_err = Some(CoreError::Upstream {
                        status: 404,
                        body: format!("no fallback model available after {model}"),
                    });
                }
                Err(ModelOutcome::Failed(err)) => {
                    last_err = Some(err);
                    if !is_last_model {
                        continue;
                    }
                }
            }
        }

        Err(last_err.unwrap_or(CoreError::NoAvailableCredential))
    }

    async fn run_model(
        &self,
        model: &str,
        payload: &Value,
        stream: bool,
        inbound: &HeaderMap,
        rotation_budget: u32,
        first_pick: Option<crate::credential::Credential>,
    ) -> Result<EngineResponse, ModelOutcome> {
        let mut exclude: Option<String> = None;
        let mut rotations = 0u32;
        let mut pending_pick = first_pick;

        loop {
            let credential = if let Some(picked) = pending_pick.take() {
                Ok(picked)
            } else {
                match &exclude {
                    None => self.manager.get_credential().await,
                    Some(id) => self.manager.get_alternate(id).await,
                }
            }
            .map_err(ModelOutcome::Failed)?;

            match self.run_credential(&credential, model, payload, stream, inbound).await {
                CredentialOutcome::Success(resp) => return Ok(resp),
                CredentialOutcome::NextModel => return Err(ModelOutcome::NextModel),
                CredentialOutcome::Rotate => {
                    rotations += 1;
                    exclude = Some(credential.id.clone());
                    if rotations >= rotation_budget {
                        return Err(ModelOutcome::Failed(CoreError::NoAvailableCredential));
                    }
                }
                CredentialOutcome::Exhausted(err) => return Err(ModelOutcome::Failed(err)),
            }
        }
    }

    async fn run_credential(
        &self,
        credential: &crate::credential::Credential,
        model: &str,
        payload: &Value,
        stream: bool,
        inbound: &HeaderMap,
    ) -> CredentialOutcome {
        let mut credential = credential.clone();
        let mut compensated_401 = false;
        let mut attempt = 0u32;

        loop {
            let body = wire_body(model, &credential, payload);
            let headers = headers::build(
                &credential,
                stream,
                &self.config.default_user_project,
                &self.config.header_passthrough,
                inbound,
            );
            let url = self.endpoints.select(stream);
            let timeout = if stream {
                Duration::from_secs(self.config.stream_timeout_secs)
            } else {
                Duration::from_secs(self.config.non_stream_timeout_secs)
            };

            let sent = self
                .http
                .post(url.clone())
                .headers(headers)
                .timeout(timeout)
                .json(&body)
                .send()
                .await;

            let response = match sent {
                Ok(resp) => resp,
                Err(err) => {
                    warn!(credential_id = %credential.id, model, error = %err, "transport error calling upstream");
                    self.manager.mark_failure(&credential.id, &err.to_string(), 0);
                    return match retry::decide_for_network_error(&self.config.retry) {
                        Attempt::Retry if attempt < self.config.retry.max => {
                            attempt += 1;
                            tokio::time::sleep(retry::backoff_for(attempt, None, &self.config.retry)).await;
                            continue;
                        }
                        _ => CredentialOutcome::Rotate,
                    };
                }
            };

            let status = response.status().as_u16();
            if response.status().is_success() {
                self.manager.mark_success(&credential.id);
                return match self.materialize(response, stream).await {
                    Ok(resp) => CredentialOutcome::Success(resp),
                    Err(err) => CredentialOutcome::Exhausted(err),
                };
            }

            let response_headers = response.headers().clone();
            let body_text = response.text().await.unwrap_or_default();
            warn!(credential_id = %credential.id, model, status, "upstream returned an error status");

            if status == 404 {
                return CredentialOutcome::NextModel;
            }

            if status == 401 && !compensated_401 {
                compensated_401 = true;
                match self.strategy.compensate_401(&credential.id).await {
                    Ok(refreshed) => {
                        info!(credential_id = %credential.id, "refreshed access token after 401, retrying same credential");
                        credential = refreshed;
                        continue;
                    }
                    Err(err) => {
                        warn!(credential_id = %credential.id, error = %err, "token refresh failed after 401");
                    }
                }
            }

            self.manager.mark_failure(&credential.id, &body_text, status);

            match retry::decide_for_status(status, &self.config.retry) {
                Attempt::Retry if attempt < self.config.retry.max && !should_rotate_now(status, &self.config.retry) => {
                    attempt += 1;
                    tokio::time::sleep(retry::backoff_for(attempt, Some(&response_headers), &self.config.retry)).await;
                    continue;
                }
                _ => return CredentialOutcome::Rotate,
            }
        }
    }

    async fn materialize(&self, response: reqwest::Response, stream: bool) -> Result<EngineResponse, CoreError> {
        if stream {
            Ok(EngineResponse::Stream(response))
        } else {
            let value: Value = response.json().await?;
            Ok(EngineResponse::Json(value))
        }
    }
}

fn should_rotate_now(status: u16, cfg: &crate::config::RetrySettings) -> bool {
    matches!(status, 401 | 403 | 429) || (matches!(status, 500..=599) && cfg.rotate_on_5xx)
}

fn wire_body(model: &str, credential: &crate::credential::Credential, payload: &Value) -> Value {
    serde_json::json!({
        "model": model,
        "project": credential.project_id.clone().unwrap_or_default(),
        "request": payload,
    })
}

enum ModelOutcome {
    NextModel,
    Failed(CoreError),
}

enum CredentialOutcome {
    Success(EngineResponse),
    NextModel,
    Rotate,
    Exhausted(CoreError),
}
