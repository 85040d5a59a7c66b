//! Pure JSON payload transforms applied per-model before a request is sent upstream.
//!
//! The teacher carries payloads as typed `GeminiRequestBody` structs; this design keeps them
//! as untyped `serde_json::Value` at the engine boundary (the translator is an external
//! collaborator, so the engine has no business knowing the inner schema). Each transform is a
//! pure function of `(model, payload)`.

use serde_json::Value;

use crate::model_catalog;

/// Apply every payload-safety transform relevant to `model`, in place.
pub fn apply_safety_transforms(payload: &mut Value, model: &str) {
    if !model_catalog::allows_thinking(model) {
        strip_thinking_config(payload);
    }
    if model_catalog::wants_image_modality(model) {
        ensure_image_modality(payload);
    }
}

/// Remove `generationConfig.thinkingConfig` if present.
fn strip_thinking_config(payload: &mut Value) {
    if let Some(generation_config) = payload
        .get_mut("request")
        .and_then(|r| r.get_mut("generationConfig"))
        .or_else(|| payload.get_mut("generationConfig"))
        .and_then(Value::as_object_mut)
    {
        generation_config.remove("thinkingConfig");
    }
}

/// Ensure `generationConfig.responseModalities` contains `"Image"`.
fn ensure_image_modality(payload: &mut Value) {
    let Some(generation_config) = payload
        .get_mut("request")
        .and_then(|r| r.get_mut("generationConfig"))
        .or_else(|| payload.get_mut("generationConfig"))
        .and_then(Value::as_object_mut)
    else {
        return;
    };

    let modalities = generation_config
        .entry("responseModalities")
        .or_insert_with(|| Value::Array(Vec::new()));

    let Some(list) = modalities.as_array_mut() else {
        return;
    };
    let has_image = list.iter().any(|v| v.as_str() == Some("Image"));
    if !has_image {
        list.push(Value::String("Image".to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_thinking_config_for_disallowed_model() {
        let mut payload = json!({
            "generationConfig": { "thinkingConfig": { "thinkingBudget": 1024 }, "temperature": 0.5 }
        });
        apply_safety_transforms(&mut payload, "gemini-2.0-flash");
        assert!(payload["generationConfig"].get("thinkingConfig").is_none());
        assert_eq!(payload["generationConfig"]["temperature"], 0.5);
    }

    #[test]
    fn leaves_thinking_config_for_allowed_model() {
        let mut payload = json!({ "generationConfig": { "thinkingConfig": { "thinkingBudget": 1024 } } });
        apply_safety_transforms(&mut payload, "gemini-2.5-pro");
        assert!(payload["generationConfig"].get("thinkingConfig").is_some());
    }

    #[test]
    fn adds_image_modality_for_image_models() {
        let mut payload = json!({ "generationConfig": {} });
        apply_safety_transforms(&mut payload, "gemini-2.5-flash-image");
        assert_eq!(payload["generationConfig"]["responseModalities"], json!(["Image"]));
    }

    #[test]
    fn does_not_duplicate_existing_image_modality() {
        let mut payload = json!({ "generationConfig": { "responseModalities": ["Text", "Image"] } });
        apply_safety_transforms(&mut payload, "gemini-2.5-flash-image");
        assert_eq!(
            payload["generationConfig"]["responseModalities"],
            json!(["Text", "Image"])
        );
    }

    #[test]
    fn transforms_reach_into_nested_request_envelope() {
        let mut payload = json!({ "request": { "generationConfig": { "thinkingConfig": {} } } });
        apply_safety_transforms(&mut payload, "gemini-2.0-flash");
        assert!(payload["request"]["generationConfig"].get("thinkingConfig").is_none());
    }
}
