//! `GET /v1/models` and `GET /v1/models/{id}`. Lists the known base Gemini models (the heads of
//! `model_catalog::fallback_chain`), filtered by `disabled_models`, shaped as OpenAI's model list.

use axum::Json;
use axum::extract::{Path, State};
use serde::Serialize;

use crate::error::CoreError;
use crate::server::router::AppState;

const KNOWN_BASE_MODELS: &[&str] = &["gemini-2.5-pro", "gemini-2.5-flash", "gemini-2.0-flash"];

#[derive(Debug, Serialize)]
struct ModelObject {
    id: String,
    object: &'static str,
    owned_by: &'static str,
}

#[derive(Debug, Serialize)]
struct ModelList {
    object: &'static str,
    data: Vec<ModelObject>,
}

fn available_models(state: &AppState) -> Vec<ModelObject> {
    KNOWN_BASE_MODELS
        .iter()
        .filter(|m| !state.config.disabled_models.iter().any(|d| d == *m))
        .map(|m| ModelObject { id: m.to_string(), object: "model", owned_by: "google" })
        .collect()
}

pub async fn list_models(State(state): State<AppState>) -> Json<ModelList> {
    Json(ModelList { object: "list", data: available_models(&state) })
}

pub async fn get_model(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<ModelObject>, CoreError> {
    available_models(&state)
        .into_iter()
        .find(|m| m.id == id)
        .map(Json)
        .ok_or_else(|| CoreError::NotFound(id))
}
