//! Model registry and pricing
//!
//! Static catalog of the chat and embedding models Archway knows how to
//! price, backing `GET /v1/models` and the usage cost model. Models absent
//! from the catalog are billed at the default rate below.

use serde::Serialize;

/// Default pricing applied to unknown models (per 1K tokens, USD).
/// Conservative mid-tier estimate so unknown models are never free.
pub const DEFAULT_INPUT_COST_PER_1K: f64 = 0.005;
pub const DEFAULT_OUTPUT_COST_PER_1K: f64 = 0.015;

/// One entry in the model catalog.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub id: &'static str,
    pub owned_by: &'static str,
    pub max_tokens: u32,
    /// Whether chat requests against this model get knowledge context injected
    pub knowledge_aware: bool,
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
}

/// Known models. Pricing per 1K tokens (approximate).
pub const MODELS: &[ModelInfo] = &[
    ModelInfo {
        id: "gpt-4o",
        owned_by: "openai",
        max_tokens: 128_000,
        knowledge_aware: true,
        input_cost_per_1k: 0.005,
        output_cost_per_1k: 0.015,
    },
    ModelInfo {
        id: "gpt-4o-mini",
        owned_by: "openai",
        max_tokens: 128_000,
        knowledge_aware: true,
        input_cost_per_1k: 0.00015,
        output_cost_per_1k: 0.0006,
    },
    ModelInfo {
        id: "gpt-3.5-turbo",
        owned_by: "openai",
        max_tokens: 16_385,
        knowledge_aware: true,
        input_cost_per_1k: 0.0005,
        output_cost_per_1k: 0.0015,
    },
    ModelInfo {
        id: "claude-3-5-sonnet",
        owned_by: "anthropic",
        max_tokens: 200_000,
        knowledge_aware: true,
        input_cost_per_1k: 0.003,
        output_cost_per_1k: 0.015,
    },
    ModelInfo {
        id: "claude-3-haiku",
        owned_by: "anthropic",
        max_tokens: 200_000,
        knowledge_aware: true,
        input_cost_per_1k: 0.00025,
        output_cost_per_1k: 0.00125,
    },
    ModelInfo {
        id: "nomic-embed-text",
        owned_by: "nomic",
        max_tokens: 8_192,
        knowledge_aware: false,
        input_cost_per_1k: 0.0001,
        output_cost_per_1k: 0.0,
    },
];

/// Look up a model by exact id, falling back to a longest-substring match so
/// that provider-prefixed names ("openai/gpt-4o") and dated variants still
/// price correctly ("gpt-4o-mini" must not resolve to "gpt-4o").
pub fn find_model(model: &str) -> Option<&'static ModelInfo> {
    let lower = model.to_lowercase();
    MODELS.iter().find(|m| m.id == lower).or_else(|| {
        MODELS
            .iter()
            .filter(|m| lower.contains(m.id))
            .max_by_key(|m| m.id.len())
    })
}

/// Calculate cost from token usage based on model pricing.
///
/// Negative token counts are clamped to zero before pricing.
pub fn estimate_cost(model: &str, input_tokens: i64, output_tokens: i64) -> f64 {
    let (input_per_1k, output_per_1k) = match find_model(model) {
        Some(m) => (m.input_cost_per_1k, m.output_cost_per_1k),
        None => (DEFAULT_INPUT_COST_PER_1K, DEFAULT_OUTPUT_COST_PER_1K),
    };

    let input = input_tokens.max(0) as f64;
    let output = output_tokens.max(0) as f64;

    (input / 1000.0) * input_per_1k + (output / 1000.0) * output_per_1k
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_pricing() {
        // 1000 input at $0.005/1K + 500 output at $0.015/1K
        let cost = estimate_cost("gpt-4o", 1000, 500);
        assert!((cost - 0.0125).abs() < 1e-9);
    }

    #[test]
    fn prefixed_model_resolves_to_longest_match() {
        let m = find_model("openai/gpt-4o-mini").unwrap();
        assert_eq!(m.id, "gpt-4o-mini");
    }

    #[test]
    fn unknown_model_uses_default() {
        let cost = estimate_cost("some-future-model", 1000, 1000);
        assert!((cost - 0.020).abs() < 1e-9);
    }

    #[test]
    fn negative_tokens_clamp_to_zero() {
        assert_eq!(estimate_cost("gpt-4o", -50, -10), 0.0);
    }
}
