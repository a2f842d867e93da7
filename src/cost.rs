//! Token and cost estimation.
//!
//! Prices are USD per million tokens. Unknown remote models fall back to
//! [`DEFAULT_PRICING`]; local providers are always free.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const CHARS_PER_TOKEN: usize = 4;
/// Output tokens as a share of input when a backend reports no usage.
pub const OUTPUT_TOKEN_RATIO: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelPricing {
    pub const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }
}

/// Used for any remote model missing from the table (mid-tier pricing).
pub const DEFAULT_PRICING: ModelPricing = ModelPricing::new(3.0, 15.0);
pub const FREE: ModelPricing = ModelPricing::new(0.0, 0.0);

const LOCAL_PROVIDERS: &[&str] = &["ollama", "lmstudio", "local"];

static PRICE_TABLE: Lazy<HashMap<(&'static str, &'static str), ModelPricing>> = Lazy::new(|| {
    let entries: &[(&str, &str, f64, f64)] = &[
        ("anthropic", "claude-3-5-sonnet-20241022", 3.0, 15.0),
        ("anthropic", "claude-3-5-sonnet-latest", 3.0, 15.0),
        ("anthropic", "claude-3-5-haiku-20241022", 1.0, 5.0),
        ("anthropic", "claude-3-opus-20240229", 15.0, 75.0),
        ("anthropic", "claude-3-haiku-20240307", 0.25, 1.25),
        ("anthropic", "claude-sonnet-4-20250514", 3.0, 15.0),
        ("anthropic", "claude-opus-4-20250514", 15.0, 75.0),
        ("openai", "gpt-4o", 5.0, 15.0),
        ("openai", "gpt-4o-mini", 0.15, 0.6),
        ("openai", "gpt-4-turbo", 10.0, 30.0),
        ("deepseek", "deepseek-chat", 0.14, 0.28),
        ("deepseek", "deepseek-coder", 0.14, 0.28),
    ];
    entries
        .iter()
        .map(|(provider, model, input, output)| ((*provider, *model), ModelPricing::new(*input, *output)))
        .collect()
});

/// Rough token estimate for `len` characters of prompt text.
pub fn estimate_tokens(len: usize) -> u64 {
    len.div_ceil(CHARS_PER_TOKEN) as u64
}

/// Output estimate used when the backend does not report usage.
pub fn estimate_output_tokens(input_tokens: u64) -> u64 {
    (input_tokens as f64 * OUTPUT_TOKEN_RATIO).round() as u64
}

pub fn pricing_for(provider: &str, model: &str) -> ModelPricing {
    if LOCAL_PROVIDERS.contains(&provider) {
        return FREE;
    }
    PRICE_TABLE
        .get(&(provider, model))
        .copied()
        .unwrap_or(DEFAULT_PRICING)
}

/// USD cost of one call.
pub fn cost(provider: &str, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    let pricing = pricing_for(provider, model);
    (input_tokens as f64 * pricing.input_per_million + output_tokens as f64 * pricing.output_per_million)
        / 1_000_000.0
}

/// Running totals for one run: what was spent and what the cache saved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CostTracker {
    provider: String,
    model: String,
    pub tokens_used: u64,
    pub tokens_saved: u64,
    pub cost_used: f64,
    pub cost_saved: f64,
}

impl CostTracker {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn record_call(&mut self, input_tokens: u64, output_tokens: u64) {
        self.tokens_used += input_tokens + output_tokens;
        self.cost_used += cost(&self.provider, &self.model, input_tokens, output_tokens);
    }

    /// A call avoided entirely (cache hit). `total_tokens` covers input and output.
    pub fn record_saved(&mut self, total_tokens: u64) {
        let input = (total_tokens as f64 / (1.0 + OUTPUT_TOKEN_RATIO)).round() as u64;
        let output = total_tokens.saturating_sub(input);
        self.tokens_saved += total_tokens;
        self.cost_saved += cost(&self.provider, &self.model, input, output);
    }

    /// Input tokens avoided by sending a diff instead of the full file.
    pub fn record_diff_savings(&mut self, input_tokens: u64) {
        self.tokens_saved += input_tokens;
        self.cost_saved += cost(&self.provider, &self.model, input_tokens, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(0), 0);
        assert_eq!(estimate_tokens(1), 1);
        assert_eq!(estimate_tokens(4), 1);
        assert_eq!(estimate_tokens(5), 2);
        assert_eq!(estimate_tokens(4000), 1000);
    }

    #[test]
    fn test_estimate_output_tokens() {
        assert_eq!(estimate_output_tokens(1000), 200);
        assert_eq!(estimate_output_tokens(0), 0);
    }

    #[test]
    fn test_known_model_cost() {
        let usd = cost("anthropic", "claude-3-5-sonnet-20241022", 1_000_000, 1_000_000);
        assert!((usd - 18.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_model_uses_default() {
        assert_eq!(pricing_for("anthropic", "claude-next"), DEFAULT_PRICING);
        assert_eq!(pricing_for("someone", "something"), DEFAULT_PRICING);
    }

    #[test]
    fn test_local_providers_are_free() {
        assert_eq!(pricing_for("ollama", "llama3.1"), FREE);
        assert_eq!(cost("ollama", "anything", 10_000, 10_000), 0.0);
    }

    #[test]
    fn test_tracker_accumulates() {
        let mut tracker = CostTracker::new("anthropic", "claude-3-5-sonnet-20241022");
        tracker.record_call(1000, 200);
        tracker.record_call(1000, 200);
        assert_eq!(tracker.tokens_used, 2400);
        assert!(tracker.cost_used > 0.0);

        tracker.record_saved(1200);
        assert_eq!(tracker.tokens_saved, 1200);
        let expected = cost("anthropic", "claude-3-5-sonnet-20241022", 1000, 200);
        assert!((tracker.cost_saved - expected).abs() < 1e-12);

        tracker.record_diff_savings(800);
        assert_eq!(tracker.tokens_saved, 2000);
    }
}
