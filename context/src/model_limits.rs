//! Model token limits and registry.
//!
//! This module provides [`ModelLimits`] for storing token constraints per model,
//! and [`ModelRegistry`] for looking up limits by model name with prefix matching.

use std::collections::HashMap;

/// Each model has a maximum context window (input tokens) and maximum output tokens.
/// The effective input budget accounts for output reservation and a safety margin.
///
/// # Example
///
/// ```
/// use keel_context::ModelLimits;
///
/// let limits = ModelLimits::new(200_000, 16_000);
/// assert_eq!(limits.context_window(), 200_000);
/// assert_eq!(limits.max_output(), 16_000);
///
/// // Effective budget = context_window - max_output - 5% safety margin
/// assert_eq!(limits.effective_input_budget(), 174_800);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelLimits {
    /// Maximum input context window in tokens.
    context_window: u32,
    /// Maximum output tokens the model can generate.
    max_output: u32,
}

impl ModelLimits {
    #[must_use]
    pub const fn new(context_window: u32, max_output: u32) -> Self {
        Self {
            context_window,
            max_output,
        }
    }

    /// Returns the effective input budget.
    ///
    /// This is the maximum number of tokens available for input messages,
    /// calculated as: `context_window - max_output - 5% safety margin`.
    ///
    /// The 5% safety margin accounts for token counting inaccuracies and
    /// overhead from formatting and tool definitions.
    #[must_use]
    pub fn effective_input_budget(&self) -> u32 {
        let available = self.context_window.saturating_sub(self.max_output);
        // Subtract 5% safety margin
        let safety_margin = available / 20; // 5% = 1/20
        available.saturating_sub(safety_margin)
    }

    #[must_use]
    pub const fn context_window(&self) -> u32 {
        self.context_window
    }

    #[must_use]
    pub const fn max_output(&self) -> u32 {
        self.max_output
    }
}

/// Where model limits came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelLimitsSource {
    /// Exact match from an override.
    Override,
    /// Matched a known prefix (the matched prefix).
    Prefix(&'static str),
}

/// Result of looking up model limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedModelLimits {
    limits: ModelLimits,
    source: ModelLimitsSource,
}

impl ResolvedModelLimits {
    #[must_use]
    pub const fn new(limits: ModelLimits, source: ModelLimitsSource) -> Self {
        Self { limits, source }
    }

    #[must_use]
    pub const fn limits(self) -> ModelLimits {
        self.limits
    }

    #[must_use]
    pub const fn source(self) -> ModelLimitsSource {
        self.source
    }
}

/// Known model prefixes and their limits.
///
/// Ordered by specificity (more specific prefixes first) to ensure
/// correct matching when multiple prefixes could match.
const KNOWN_MODELS: &[(&str, ModelLimits)] = &[
    // Claude 4.5 models
    ("claude-opus-4-5", ModelLimits::new(200_000, 64_000)),
    ("claude-sonnet-4-5", ModelLimits::new(200_000, 64_000)),
    ("claude-haiku-4-5", ModelLimits::new(200_000, 64_000)),
    // GPT 5.2 models
    ("gpt-5.2-pro", ModelLimits::new(400_000, 128_000)),
    ("gpt-5.2", ModelLimits::new(400_000, 128_000)),
    // Gemini 3 models (1M context, 65K output)
    ("gemini-3-pro", ModelLimits::new(1_048_576, 65_536)),
    ("gemini-3-flash", ModelLimits::new(1_048_576, 65_536)),
];

/// Registry of known model limits with support for custom overrides.
///
/// Lookup is two-tier:
/// 1. Exact match in overrides set via [`ModelRegistry::set_override`]
/// 2. Prefix match against the known catalog
///
/// There is no fallback. An unknown model resolves to `None`, and callers
/// surface that as an error rather than guessing a budget.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    overrides: HashMap<String, ModelLimits>,
}

impl ModelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, model: &str) -> Option<ResolvedModelLimits> {
        if let Some(limits) = self.overrides.get(model) {
            return Some(ResolvedModelLimits::new(
                *limits,
                ModelLimitsSource::Override,
            ));
        }

        KNOWN_MODELS
            .iter()
            .find(|(prefix, _)| model.starts_with(prefix))
            .map(|(prefix, limits)| {
                ResolvedModelLimits::new(*limits, ModelLimitsSource::Prefix(*prefix))
            })
    }

    /// Overrides take precedence over prefix matching for exact matches.
    pub fn set_override(&mut self, model: impl Into<String>, limits: ModelLimits) {
        self.overrides.insert(model.into(), limits);
    }

    #[must_use]
    pub fn has_override(&self, model: &str) -> bool {
        self.overrides.contains_key(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod model_limits {
        use super::*;

        #[test]
        fn effective_input_budget_subtracts_output_and_safety_margin() {
            let limits = ModelLimits::new(200_000, 16_000);
            // available = 200_000 - 16_000 = 184_000
            // safety = 184_000 / 20 = 9_200
            assert_eq!(limits.effective_input_budget(), 174_800);
        }

        #[test]
        fn effective_input_budget_with_small_values() {
            let limits = ModelLimits::new(8192, 4096);
            // available = 4096, safety = 204 (integer division)
            assert_eq!(limits.effective_input_budget(), 3892);
        }

        #[test]
        fn effective_input_budget_handles_output_exceeding_context() {
            let limits = ModelLimits::new(4096, 8192);
            assert_eq!(limits.effective_input_budget(), 0);
        }
    }

    mod model_registry {
        use super::*;

        #[test]
        fn prefix_matches_dated_claude_models() {
            let registry = ModelRegistry::new();

            let resolved = registry.get("claude-haiku-4-5-20251001").unwrap();
            assert_eq!(
                resolved.source(),
                ModelLimitsSource::Prefix("claude-haiku-4-5")
            );
            assert_eq!(resolved.limits().context_window(), 200_000);
            assert_eq!(resolved.limits().max_output(), 64_000);
        }

        #[test]
        fn more_specific_prefix_wins() {
            let registry = ModelRegistry::new();
            let resolved = registry.get("gpt-5.2-pro-2025").unwrap();
            assert_eq!(resolved.source(), ModelLimitsSource::Prefix("gpt-5.2-pro"));
        }

        #[test]
        fn unknown_models_resolve_to_none() {
            let registry = ModelRegistry::new();

            assert!(registry.get("claude-experimental-x").is_none());
            assert!(registry.get("gpt-4o").is_none());
            assert!(registry.get("llama-3-70b").is_none());
        }

        #[test]
        fn set_override_takes_precedence() {
            let mut registry = ModelRegistry::new();
            registry.set_override("claude-opus-4-5-custom", ModelLimits::new(50_000, 8000));

            let resolved = registry.get("claude-opus-4-5-custom").unwrap();
            assert_eq!(resolved.source(), ModelLimitsSource::Override);
            assert_eq!(resolved.limits().context_window(), 50_000);
            assert!(registry.has_override("claude-opus-4-5-custom"));

            // Other claude-opus-4-5 models still use the catalog
            let limits = registry.get("claude-opus-4-5-20251101").unwrap().limits();
            assert_eq!(limits.context_window(), 200_000);
        }

        #[test]
        fn override_can_define_an_unknown_model() {
            let mut registry = ModelRegistry::new();
            registry.set_override("local-llm", ModelLimits::new(32_768, 4096));

            assert_eq!(
                registry.get("local-llm").map(ResolvedModelLimits::limits),
                Some(ModelLimits::new(32_768, 4096))
            );
        }
    }
}
