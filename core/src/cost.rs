use serde::Serialize;

use crate::ai::TokenUsage;
use crate::config::PricingConfig;

const DEFAULT_RATE_PER_1K: f64 = 0.002;

/// Approximate USD per 1k tokens for common OpenRouter models.
const MODEL_RATES: &[(&str, f64)] = &[
    ("anthropic/claude-3.5-sonnet", 0.003),
    ("openai/gpt-4-turbo", 0.01),
    ("openai/gpt-3.5-turbo", 0.0015),
    ("google/gemini-pro", 0.00025),
];

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CostEstimate {
    pub source_chars: usize,
    pub estimated_input_tokens: u64,
    pub estimated_output_tokens: u64,
    /// Provider-reported usage, when known
    pub actual_tokens: Option<u64>,
    pub estimated_usd: f64,
}

impl CostEstimate {
    /// Tokens used for pricing: actual usage when reported, the estimate otherwise.
    pub fn billable_tokens(&self) -> u64 {
        self.actual_tokens
            .unwrap_or(self.estimated_input_tokens + self.estimated_output_tokens)
    }

    pub fn add(&mut self, other: &CostEstimate) {
        self.source_chars += other.source_chars;
        self.estimated_input_tokens += other.estimated_input_tokens;
        self.estimated_output_tokens += other.estimated_output_tokens;
        self.actual_tokens = match (self.actual_tokens, other.actual_tokens) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
        };
        self.estimated_usd += other.estimated_usd;
    }
}

#[derive(Debug, Clone)]
pub struct CostModel {
    rate_per_1k: f64,
    tokens_per_char: f64,
    prompt_overhead_tokens: u64,
}

impl CostModel {
    pub fn new(pricing: &PricingConfig, provider_model: &str) -> Self {
        let model = pricing.model.as_deref().unwrap_or(provider_model);
        Self {
            rate_per_1k: pricing.rate_per_1k.unwrap_or_else(|| rate_for_model(model)),
            tokens_per_char: pricing.tokens_per_char,
            prompt_overhead_tokens: pricing.prompt_overhead_tokens,
        }
    }

    pub fn rate_per_1k(&self) -> f64 {
        self.rate_per_1k
    }

    pub fn estimate(&self, text: &str) -> CostEstimate {
        let source_chars = text.chars().count();
        let text_tokens = (source_chars as f64 * self.tokens_per_char).ceil() as u64;
        let mut estimate = CostEstimate {
            source_chars,
            estimated_input_tokens: text_tokens + self.prompt_overhead_tokens,
            estimated_output_tokens: text_tokens,
            actual_tokens: None,
            estimated_usd: 0.0,
        };
        estimate.estimated_usd = self.price(estimate.billable_tokens());
        estimate
    }

    /// Replaces the estimate with what the provider reported.
    pub fn apply_usage(&self, estimate: &mut CostEstimate, usage: Option<TokenUsage>) {
        if let Some(usage) = usage {
            estimate.actual_tokens = Some(usage.total());
            estimate.estimated_usd = self.price(usage.total());
        }
    }

    fn price(&self, tokens: u64) -> f64 {
        tokens as f64 / 1000.0 * self.rate_per_1k
    }
}

pub fn rate_for_model(model: &str) -> f64 {
    MODEL_RATES
        .iter()
        .find(|(name, _)| *name == model)
        .map_or(DEFAULT_RATE_PER_1K, |(_, rate)| *rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn known_and_unknown_models() {
        assert!(approx(rate_for_model("openai/gpt-4-turbo"), 0.01));
        assert!(approx(rate_for_model("google/gemini-pro"), 0.00025));
        assert!(approx(rate_for_model("someone/new-model"), 0.002));
    }

    #[test]
    fn estimate_uses_chars_and_overhead() {
        let model = CostModel::new(&PricingConfig::default(), "anthropic/claude-3.5-sonnet");
        let estimate = model.estimate(&"a".repeat(100));
        assert_eq!(estimate.estimated_input_tokens, 30 + 150);
        assert_eq!(estimate.estimated_output_tokens, 30);
        assert!(approx(estimate.estimated_usd, 210.0 / 1000.0 * 0.003));
    }

    #[test]
    fn rate_override_wins() {
        let pricing = PricingConfig {
            rate_per_1k: Some(1.0),
            ..Default::default()
        };
        assert!(approx(CostModel::new(&pricing, "openai/gpt-4-turbo").rate_per_1k(), 1.0));
    }

    #[test]
    fn actual_usage_replaces_estimate() {
        let model = CostModel::new(&PricingConfig::default(), "openai/gpt-4-turbo");
        let mut estimate = model.estimate("Hello world");
        model.apply_usage(
            &mut estimate,
            Some(TokenUsage {
                prompt_tokens: 400,
                completion_tokens: 100,
            }),
        );
        assert_eq!(estimate.billable_tokens(), 500);
        assert!(approx(estimate.estimated_usd, 0.005));
    }

    #[test]
    fn totals_accumulate() {
        let model = CostModel::new(&PricingConfig::default(), "x");
        let mut total = CostEstimate::default();
        total.add(&model.estimate("abc"));
        total.add(&model.estimate("defg"));
        assert_eq!(total.source_chars, 7);
        assert_eq!(total.actual_tokens, None);
    }
}
