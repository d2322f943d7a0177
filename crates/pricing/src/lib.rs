//! Built-in pricing catalog for common LLM models.
//!
//! Prices are in USD per 1 million tokens, split into input, output,
//! cache-read and cache-write rates. The catalog is immutable after
//! construction and safe for concurrent reads without locking; custom
//! entries from config are merged in at build time.
//!
//! Lookups never fail: unknown models cost at the catch-all default entry
//! (zero by default) and the miss is logged for operational visibility.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelPricing {
    /// Price per 1M input tokens in USD.
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD.
    pub output_per_m: f64,
    /// Price per 1M cache-read tokens in USD.
    pub cache_read_per_m: f64,
    /// Price per 1M cache-write tokens in USD.
    pub cache_write_per_m: f64,
}

impl ModelPricing {
    /// Create a pricing entry with input/output rates only.
    pub fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
            ..Self::default()
        }
    }

    /// Create a pricing entry with all four rates.
    pub fn with_cache(
        input_per_m: f64,
        output_per_m: f64,
        cache_read_per_m: f64,
        cache_write_per_m: f64,
    ) -> Self {
        Self {
            input_per_m,
            output_per_m,
            cache_read_per_m,
            cache_write_per_m,
        }
    }

    /// Compute cost for the given token counts.
    pub fn cost(&self, input: u32, output: u32, cache_read: u32, cache_write: u32) -> f64 {
        (input as f64 * self.input_per_m
            + output as f64 * self.output_per_m
            + cache_read as f64 * self.cache_read_per_m
            + cache_write as f64 * self.cache_write_per_m)
            / 1_000_000.0
    }
}

/// Immutable pricing table keyed by normalized model identifier.
pub struct PricingCatalog {
    prices: HashMap<String, ModelPricing>,
    /// Catch-all entry used when no key matches.
    fallback: ModelPricing,
}

impl PricingCatalog {
    /// Build the catalog with built-in model prices, merging `overrides`
    /// (from config) on top. Override keys are normalized the same way
    /// lookups are.
    pub fn with_defaults(overrides: impl IntoIterator<Item = (String, ModelPricing)>) -> Self {
        let mut prices = HashMap::new();

        // ── Anthropic ──────────────────────────────────────────────
        // Cache read is 0.1x input; cache write is 1.25x input.
        prices.insert(
            "claude-sonnet-4".into(),
            ModelPricing::with_cache(3.0, 15.0, 0.3, 3.75),
        );
        prices.insert(
            "claude-opus-4".into(),
            ModelPricing::with_cache(15.0, 75.0, 1.5, 18.75),
        );
        prices.insert(
            "claude-3-7-sonnet".into(),
            ModelPricing::with_cache(3.0, 15.0, 0.3, 3.75),
        );
        prices.insert(
            "claude-3-5-sonnet".into(),
            ModelPricing::with_cache(3.0, 15.0, 0.3, 3.75),
        );
        prices.insert(
            "claude-3-5-haiku".into(),
            ModelPricing::with_cache(0.8, 4.0, 0.08, 1.0),
        );
        prices.insert(
            "claude-3-haiku".into(),
            ModelPricing::with_cache(0.25, 1.25, 0.03, 0.3),
        );

        // ── OpenAI ─────────────────────────────────────────────────
        prices.insert("gpt-4o".into(), ModelPricing::with_cache(2.5, 10.0, 1.25, 0.0));
        prices.insert(
            "gpt-4o-mini".into(),
            ModelPricing::with_cache(0.15, 0.6, 0.075, 0.0),
        );
        prices.insert("gpt-4-turbo".into(), ModelPricing::new(10.0, 30.0));
        prices.insert("gpt-4.1".into(), ModelPricing::with_cache(2.0, 8.0, 0.5, 0.0));
        prices.insert(
            "gpt-4.1-mini".into(),
            ModelPricing::with_cache(0.4, 1.6, 0.1, 0.0),
        );
        prices.insert("o1".into(), ModelPricing::with_cache(15.0, 60.0, 7.5, 0.0));
        prices.insert("o1-mini".into(), ModelPricing::with_cache(3.0, 12.0, 1.5, 0.0));
        prices.insert("o3-mini".into(), ModelPricing::with_cache(1.1, 4.4, 0.55, 0.0));

        // ── Google ─────────────────────────────────────────────────
        prices.insert("gemini-2.5-pro".into(), ModelPricing::new(1.25, 10.0));
        prices.insert("gemini-2.0-flash".into(), ModelPricing::new(0.1, 0.4));
        prices.insert("gemini-1.5-pro".into(), ModelPricing::new(1.25, 5.0));
        prices.insert("gemini-1.5-flash".into(), ModelPricing::new(0.075, 0.3));

        // ── Amazon ─────────────────────────────────────────────────
        prices.insert("nova-pro".into(), ModelPricing::new(0.8, 3.2));
        prices.insert("nova-lite".into(), ModelPricing::new(0.06, 0.24));

        // ── Meta ───────────────────────────────────────────────────
        prices.insert("llama-3.1-405b".into(), ModelPricing::new(2.7, 2.7));
        prices.insert("llama-3.1-70b".into(), ModelPricing::new(0.52, 0.75));
        prices.insert("llama-3.1-8b".into(), ModelPricing::new(0.055, 0.055));

        // ── Mistral ────────────────────────────────────────────────
        prices.insert("mistral-large".into(), ModelPricing::new(2.0, 6.0));
        prices.insert("mistral-small".into(), ModelPricing::new(0.2, 0.6));
        prices.insert("codestral".into(), ModelPricing::new(0.3, 0.9));

        // ── DeepSeek ───────────────────────────────────────────────
        prices.insert("deepseek-v3".into(), ModelPricing::new(0.27, 1.1));
        prices.insert("deepseek-r1".into(), ModelPricing::new(0.55, 2.19));

        for (model, pricing) in overrides {
            prices.insert(normalize(&model), pricing);
        }

        Self {
            prices,
            fallback: ModelPricing::default(),
        }
    }

    /// Create an empty catalog (tests and tooling).
    pub fn empty() -> Self {
        Self {
            prices: HashMap::new(),
            fallback: ModelPricing::default(),
        }
    }

    /// Look up pricing for a model without computing cost.
    ///
    /// Resolution order: exact normalized match, then longest key that is a
    /// prefix of the normalized model (so `gpt-4o-mini-2024-07-18` resolves
    /// to `gpt-4o-mini`, not `gpt-4o`).
    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        let normalized = normalize(model);
        if let Some(p) = self.prices.get(&normalized) {
            return Some(*p);
        }

        let mut best: Option<(&str, &ModelPricing)> = None;
        for (key, pricing) in &self.prices {
            if normalized.starts_with(key.as_str())
                && best.is_none_or(|(b, _)| key.len() > b.len())
            {
                best = Some((key, pricing));
            }
        }
        best.map(|(_, p)| *p)
    }

    /// Compute cost for a model call. Unknown models cost at the catch-all
    /// rate; the miss is recorded for operational visibility.
    pub fn cost(
        &self,
        model: &str,
        input: u32,
        output: u32,
        cache_read: u32,
        cache_write: u32,
    ) -> f64 {
        match self.get(model) {
            Some(p) => p.cost(input, output, cache_read, cache_write),
            None => {
                tracing::warn!(model, "model not in pricing catalog, using fallback rate");
                self.fallback.cost(input, output, cache_read, cache_write)
            }
        }
    }

    /// Number of models in the catalog.
    pub fn len(&self) -> usize {
        self.prices.len()
    }

    /// Whether the catalog has no entries.
    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

impl Default for PricingCatalog {
    fn default() -> Self {
        Self::with_defaults([])
    }
}

/// Normalize a model identifier for lookup: lowercase, then strip a vendor
/// prefix in either registry style (`openai/gpt-4o`) or Bedrock style
/// (`us.anthropic.claude-sonnet-4-v1:0`).
fn normalize(model: &str) -> String {
    let lower = model.to_lowercase();

    // Registry style: keep everything after the last '/'.
    let bare = lower.rsplit('/').next().unwrap_or(&lower);

    // Bedrock style: region prefix, then vendor prefix.
    let bare = bare
        .strip_prefix("us.")
        .or_else(|| bare.strip_prefix("eu."))
        .or_else(|| bare.strip_prefix("apac."))
        .unwrap_or(bare);
    let bare = bare
        .strip_prefix("anthropic.")
        .or_else(|| bare.strip_prefix("amazon."))
        .or_else(|| bare.strip_prefix("meta."))
        .or_else(|| bare.strip_prefix("mistral."))
        .unwrap_or(bare);

    bare.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_has_models() {
        let catalog = PricingCatalog::default();
        assert!(catalog.len() >= 20);
        assert!(!catalog.is_empty());
    }

    #[test]
    fn known_model_cost() {
        let catalog = PricingCatalog::default();
        // gpt-4o: $2.5/M input, $10/M output.
        let cost = catalog.cost("gpt-4o", 1000, 500, 0, 0);
        // (1000 * 2.5 + 500 * 10.0) / 1M = 0.0075
        assert!((cost - 0.0075).abs() < 1e-12);
    }

    #[test]
    fn cache_tokens_priced_separately() {
        let catalog = PricingCatalog::default();
        // claude-sonnet-4: cache read $0.3/M, cache write $3.75/M.
        let cost = catalog.cost("claude-sonnet-4", 0, 0, 1_000_000, 1_000_000);
        assert!((cost - (0.3 + 3.75)).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_returns_fallback_zero() {
        let catalog = PricingCatalog::default();
        let cost = catalog.cost("totally-unknown-model", 1000, 500, 0, 0);
        assert_eq!(cost, 0.0);
    }

    #[test]
    fn normalization_strips_vendor_prefixes() {
        assert_eq!(normalize("OpenAI/GPT-4o"), "gpt-4o");
        assert_eq!(
            normalize("us.anthropic.claude-sonnet-4-v1:0"),
            "claude-sonnet-4-v1:0"
        );
        assert_eq!(normalize("amazon.nova-pro-v1:0"), "nova-pro-v1:0");
        assert_eq!(normalize("gpt-4o"), "gpt-4o");
    }

    #[test]
    fn versioned_model_resolves_by_longest_prefix() {
        let catalog = PricingCatalog::default();
        let mini = catalog.get("gpt-4o-mini-2024-07-18").unwrap();
        assert_eq!(mini.input_per_m, 0.15);

        let bedrock = catalog.get("anthropic.claude-sonnet-4-v1:0").unwrap();
        assert_eq!(bedrock.input_per_m, 3.0);
    }

    #[test]
    fn overrides_win_over_builtins() {
        let catalog = PricingCatalog::with_defaults([(
            "gpt-4o".to_string(),
            ModelPricing::new(5.0, 20.0),
        )]);
        let cost = catalog.cost("gpt-4o", 1_000_000, 0, 0, 0);
        assert!((cost - 5.0).abs() < 1e-12);
    }

    #[test]
    fn same_inputs_same_cost() {
        let catalog = PricingCatalog::default();
        let a = catalog.cost("claude-3-5-haiku", 123, 456, 78, 9);
        let b = catalog.cost("claude-3-5-haiku", 123, 456, 78, 9);
        assert_eq!(a, b);
    }
}
