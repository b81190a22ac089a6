//! Token Estimation and Pricing
//!
//! Default implementations of the `TokenCounter` and `PriceLookup`
//! capabilities. Exact tokenizers and live pricing feeds can be swapped in
//! behind the same traits; these defaults keep the pipeline self-contained.

use std::collections::HashMap;

use tracing::debug;

use super::traits::{PriceLookup, TokenCounter};
use crate::models::CostBreakdown;

/// Characters-per-token estimate used when no tokenizer is available
const CHARS_PER_TOKEN: f64 = 4.0;

/// Estimate token count from text length alone
pub fn estimate_tokens(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }
    (text.chars().count() as f64 / CHARS_PER_TOKEN).ceil() as u32
}

/// Length-based token counter, identical for every provider
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenCounter;

impl TokenCounter for HeuristicTokenCounter {
    fn count_tokens(&self, text: &str, _provider: &str, _model: &str) -> u32 {
        estimate_tokens(text)
    }
}

/// USD price per 1K tokens
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub prompt: f64,
    pub completion: f64,
}

impl ModelPricing {
    pub const FREE: ModelPricing = ModelPricing {
        prompt: 0.0,
        completion: 0.0,
    };

    pub const fn new(prompt: f64, completion: f64) -> Self {
        Self { prompt, completion }
    }
}

/// Round to the 6 decimal places costs are reported with
pub fn round_cost(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

/// In-memory price table keyed by provider, then model
#[derive(Debug, Clone)]
pub struct StaticPriceTable {
    pricing: HashMap<String, HashMap<String, ModelPricing>>,
}

impl StaticPriceTable {
    /// Empty table; every lookup prices at zero
    pub fn empty() -> Self {
        Self {
            pricing: HashMap::new(),
        }
    }

    /// Register or replace the price of one model
    pub fn insert(&mut self, provider: &str, model: &str, pricing: ModelPricing) {
        self.pricing
            .entry(provider.to_ascii_lowercase())
            .or_default()
            .insert(model.to_ascii_lowercase(), pricing);
    }

    /// Find pricing for a model: exact match first, then substring either way
    pub fn pricing_for(&self, provider: &str, model: &str) -> ModelPricing {
        let Some(models) = self.pricing.get(&provider.to_ascii_lowercase()) else {
            debug!("No pricing for provider {}", provider);
            return ModelPricing::FREE;
        };

        let model = model.to_ascii_lowercase();
        if let Some(pricing) = models.get(&model) {
            return *pricing;
        }

        // Longest key wins so "gpt-4-turbo" is not priced as "gpt-4"
        models
            .iter()
            .filter(|(key, _)| model.contains(key.as_str()) || key.contains(model.as_str()))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, pricing)| *pricing)
            .unwrap_or_else(|| {
                debug!("No pricing for model {} on {}", model, provider);
                ModelPricing::FREE
            })
    }
}

impl Default for StaticPriceTable {
    fn default() -> Self {
        let mut table = Self::empty();

        for (model, prompt, completion) in [
            ("gpt-4", 0.03, 0.06),
            ("gpt-4-32k", 0.06, 0.12),
            ("gpt-4-turbo", 0.01, 0.03),
            ("gpt-4o", 0.005, 0.015),
            ("gpt-4o-mini", 0.00015, 0.0006),
            ("gpt-3.5-turbo", 0.0015, 0.002),
            ("gpt-3.5-turbo-16k", 0.003, 0.004),
        ] {
            table.insert("openai", model, ModelPricing::new(prompt, completion));
        }

        for (model, prompt, completion) in [
            ("openai/gpt-4", 0.03, 0.06),
            ("openai/gpt-3.5-turbo", 0.0015, 0.002),
            ("anthropic/claude-2", 0.008, 0.024),
            ("meta-llama/llama-2-70b-chat", 0.0007, 0.0009),
            ("mistralai/mistral-7b-instruct", 0.0002, 0.0002),
        ] {
            table.insert("openrouter", model, ModelPricing::new(prompt, completion));
        }

        for (model, prompt, completion) in [
            ("mistral-tiny", 0.00025, 0.00025),
            ("mistral-small", 0.002, 0.006),
            ("mistral-medium", 0.0027, 0.0081),
            ("mistral-large", 0.008, 0.024),
        ] {
            table.insert("mistral", model, ModelPricing::new(prompt, completion));
        }

        table
    }
}

impl PriceLookup for StaticPriceTable {
    fn calculate_cost(
        &self,
        provider: &str,
        model: &str,
        prompt_tokens: u32,
        completion_tokens: u32,
    ) -> CostBreakdown {
        let pricing = self.pricing_for(provider, model);
        let prompt_cost = round_cost(prompt_tokens as f64 / 1000.0 * pricing.prompt);
        let completion_cost = round_cost(completion_tokens as f64 / 1000.0 * pricing.completion);
        CostBreakdown::new(prompt_cost, completion_cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_exact_and_partial_pricing() {
        let table = StaticPriceTable::default();
        assert_eq!(
            table.pricing_for("openai", "gpt-3.5-turbo"),
            ModelPricing::new(0.0015, 0.002)
        );
        assert_eq!(
            table.pricing_for("openai", "gpt-4-turbo-2024-04-09"),
            ModelPricing::new(0.01, 0.03)
        );
        assert_eq!(table.pricing_for("ollama", "llama2"), ModelPricing::FREE);
    }

    #[test]
    fn test_cost_is_rounded_and_summed() {
        let table = StaticPriceTable::default();
        let cost = table.calculate_cost("openai", "gpt-4", 1000, 500);
        assert_eq!(cost.prompt_cost, 0.03);
        assert_eq!(cost.completion_cost, 0.03);
        assert_eq!(cost.total_cost, cost.prompt_cost + cost.completion_cost);

        let small = table.calculate_cost("openai", "gpt-3.5-turbo", 10, 0);
        assert_eq!(small.prompt_cost, 0.000015);
    }

    #[test]
    fn test_unknown_provider_is_free() {
        let table = StaticPriceTable::default();
        let cost = table.calculate_cost("acme", "model-x", 10_000, 10_000);
        assert_eq!(cost.total_cost, 0.0);
    }
}
