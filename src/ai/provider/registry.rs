//! Model info registry and rate table.
//!
//! Built once at startup from built-in entries plus config overrides, then
//! shared read-only across concurrent calls.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::TokenUsage;
use crate::constants::generation;

/// Static facts about one model. Rates are USD per 1K tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub context_window: u32,
    pub max_output_tokens: u32,
    #[serde(default)]
    pub input_rate: Option<f64>,
    #[serde(default)]
    pub output_rate: Option<f64>,
}

impl ModelInfo {
    fn builtin(name: &str, context_window: u32, max_output_tokens: u32, rates: (f64, f64)) -> Self {
        Self {
            name: name.to_string(),
            context_window,
            max_output_tokens,
            input_rate: Some(rates.0),
            output_rate: Some(rates.1),
        }
    }

    /// `(in/1000)*in_rate + (out/1000)*out_rate`, or None without rate data
    pub fn estimate_cost(&self, usage: &TokenUsage) -> Option<f64> {
        let (input_rate, output_rate) = (self.input_rate?, self.output_rate?);
        Some(
            f64::from(usage.input_tokens) / 1000.0 * input_rate
                + f64::from(usage.output_tokens) / 1000.0 * output_rate,
        )
    }
}

/// Immutable lookup of model facts
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: HashMap<String, ModelInfo>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::with_overrides(Vec::new())
    }
}

impl ModelRegistry {
    /// Built-in entries with `overrides` replacing same-named ones
    pub fn with_overrides(overrides: Vec<ModelInfo>) -> Self {
        let mut models: HashMap<String, ModelInfo> = [
            ModelInfo::builtin("gpt-4o", 128_000, 16_384, (0.0025, 0.01)),
            ModelInfo::builtin("gpt-4o-mini", 128_000, 16_384, (0.00015, 0.0006)),
            ModelInfo::builtin("gpt-4.1", 1_047_576, 32_768, (0.002, 0.008)),
            ModelInfo::builtin("gpt-4.1-mini", 1_047_576, 32_768, (0.0004, 0.0016)),
            ModelInfo::builtin("deepseek-chat", 64_000, 8_192, (0.00027, 0.0011)),
            ModelInfo::builtin("deepseek-reasoner", 64_000, 8_192, (0.00055, 0.00219)),
            ModelInfo::builtin("qwen-plus", 131_072, 8_192, (0.0008, 0.002)),
        ]
        .into_iter()
        .map(|m| (m.name.clone(), m))
        .collect();

        for model in overrides {
            models.insert(model.name.clone(), model);
        }

        Self { models }
    }

    /// Exact match, or a registered name plus a dated snapshot suffix
    /// (`gpt-4o-2024-08-06` resolves to `gpt-4o`). Anything else is unknown.
    pub fn get(&self, model: &str) -> Option<&ModelInfo> {
        self.models
            .get(model)
            .or_else(|| strip_snapshot_date(model).and_then(|base| self.models.get(base)))
    }

    pub fn context_window(&self, model: &str) -> u32 {
        self.get(model)
            .map(|m| m.context_window)
            .unwrap_or(generation::DEFAULT_CONTEXT_WINDOW)
    }

    /// Tokens left for input once `max_tokens` of output is reserved
    pub fn max_input_tokens(&self, model: &str, max_tokens: u32) -> u32 {
        self.context_window(model)
            .saturating_sub(max_tokens)
            .max(generation::MIN_INPUT_TOKENS)
    }

    pub fn estimate_cost(&self, model: &str, usage: &TokenUsage) -> Option<f64> {
        self.get(model)?.estimate_cost(usage)
    }
}

/// `name-YYYY-MM-DD` -> `name`
fn strip_snapshot_date(model: &str) -> Option<&str> {
    const SUFFIX_LEN: usize = "-YYYY-MM-DD".len();
    let split = model.len().checked_sub(SUFFIX_LEN)?;
    let (base, suffix) = (model.get(..split)?, model.get(split..)?);
    let date = suffix.strip_prefix('-')?;
    let is_date = date.bytes().enumerate().all(|(i, b)| match i {
        4 | 7 => b == b'-',
        _ => b.is_ascii_digit(),
    });
    (!base.is_empty() && is_date).then_some(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_formula() {
        let registry = ModelRegistry::default();
        let cost = registry
            .estimate_cost("gpt-4o", &TokenUsage::new(2000, 1000))
            .unwrap();
        // 2 * 0.0025 + 1 * 0.01
        assert!((cost - 0.015).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_model_has_no_cost() {
        let registry = ModelRegistry::default();
        assert_eq!(
            registry.estimate_cost("mystery-model", &TokenUsage::new(10, 10)),
            None
        );
        assert_eq!(
            registry.context_window("mystery-model"),
            generation::DEFAULT_CONTEXT_WINDOW
        );
    }

    #[test]
    fn test_partial_rates_mean_no_cost() {
        let registry = ModelRegistry::with_overrides(vec![ModelInfo {
            name: "local-llama".into(),
            context_window: 8192,
            max_output_tokens: 2048,
            input_rate: Some(0.0),
            output_rate: None,
        }]);
        assert_eq!(
            registry.estimate_cost("local-llama", &TokenUsage::new(10, 10)),
            None
        );
        assert_eq!(registry.context_window("local-llama"), 8192);
    }

    #[test]
    fn test_dated_snapshot_resolves_to_base() {
        let registry = ModelRegistry::default();
        assert_eq!(registry.get("gpt-4o-2024-08-06").unwrap().name, "gpt-4o");
        assert_eq!(
            registry.get("gpt-4o-mini-2024-07-18").unwrap().name,
            "gpt-4o-mini"
        );
    }

    #[test]
    fn test_unregistered_variant_is_not_priced_as_its_prefix() {
        let registry = ModelRegistry::default();
        let usage = TokenUsage::new(1000, 1000);
        assert_eq!(registry.estimate_cost("gpt-4.1-nano", &usage), None);
        assert_eq!(registry.estimate_cost("gpt-4o-audio-preview", &usage), None);
        assert_eq!(registry.estimate_cost("gpt-4o-2024-8-6", &usage), None);
        assert!(registry.get("gpt-4.1-nano").is_none());
        assert_eq!(
            registry.context_window("gpt-4.1-nano"),
            generation::DEFAULT_CONTEXT_WINDOW
        );
    }

    #[test]
    fn test_override_replaces_builtin() {
        let registry = ModelRegistry::with_overrides(vec![ModelInfo {
            name: "gpt-4o".into(),
            context_window: 1000,
            max_output_tokens: 100,
            input_rate: None,
            output_rate: None,
        }]);
        assert_eq!(registry.context_window("gpt-4o"), 1000);
    }

    #[test]
    fn test_max_input_tokens_floor() {
        let registry = ModelRegistry::default();
        assert_eq!(registry.max_input_tokens("deepseek-chat", 4000), 60_000);
        assert_eq!(
            registry.max_input_tokens("deepseek-chat", 100_000),
            generation::MIN_INPUT_TOKENS
        );
    }
}
