//! Fallback model chains and per-model capability facts.
//!
//! A small static table plus config-driven filtering; this pool has no per-credential,
//! per-model queues (every credential serves every model), so no registry bitset is needed.

/// Deterministic fallback order for a requested base model, filtered against `disabled_models`.
///
/// The chain always starts with the requested model itself. Unknown base models fall back to
/// a singleton chain of just themselves, so an operator can point at a brand-new Gemini model
/// name without a code change.
pub fn fallback_chain(base_model: &str, disabled_models: &[String]) -> Vec<String> {
    let chain = match base_model {
        "gemini-2.5-pro" => vec![
            "gemini-2.5-pro",
            "gemini-2.5-pro-preview-06-05",
            "gemini-2.5-pro-preview-05-06",
            "gemini-2.5-flash",
        ],
        "gemini-2.5-flash" => vec!["gemini-2.5-flash", "gemini-2.5-flash-preview-05-20"],
        "gemini-2.0-flash" => vec!["gemini-2.0-flash", "gemini-2.0-flash-001"],
        other => vec![other],
    };

    chain
        .into_iter()
        .map(str::to_string)
        .filter(|m| !disabled_models.iter().any(|d| d == m))
        .collect()
}

/// Models known to reject a `generationConfig.thinkingConfig` block outright.
fn disallows_thinking(model: &str) -> bool {
    matches!(
        model,
        "gemini-2.0-flash" | "gemini-2.0-flash-001" | "gemini-2.5-pro-preview-05-06"
    )
}

/// Models that can emit image parts and therefore need `Image` present in
/// `generationConfig.responseModalities`.
fn is_image_capable(model: &str) -> bool {
    model.contains("image")
}

pub use capability::{allows_thinking, wants_image_modality};

mod capability {
    pub fn allows_thinking(model: &str) -> bool {
        !super::disallows_thinking(model)
    }

    pub fn wants_image_modality(model: &str) -> bool {
        super::is_image_capable(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_has_full_fallback_chain() {
        let chain = fallback_chain("gemini-2.5-pro", &[]);
        assert_eq!(
            chain,
            vec![
                "gemini-2.5-pro",
                "gemini-2.5-pro-preview-06-05",
                "gemini-2.5-pro-preview-05-06",
                "gemini-2.5-flash",
            ]
        );
    }

    #[test]
    fn disabled_models_are_filtered_out() {
        let chain = fallback_chain(
            "gemini-2.5-pro",
            &["gemini-2.5-pro-preview-06-05".to_string()],
        );
        assert!(!chain.iter().any(|m| m == "gemini-2.5-pro-preview-06-05"));
        assert_eq!(chain.len(), 3);
    }

    #[test]
    fn unknown_model_falls_back_to_itself() {
        assert_eq!(fallback_chain("some-future-model", &[]), vec!["some-future-model"]);
    }

    #[test]
    fn thinking_disallowed_for_known_models() {
        assert!(!allows_thinking("gemini-2.0-flash"));
        assert!(allows_thinking("gemini-2.5-pro"));
    }
}
