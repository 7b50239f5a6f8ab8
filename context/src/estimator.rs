//! Token accounting collaborator.
//!
//! The context manager never tokenizes on its own. It asks a
//! [`TokenEstimator`] for per-message counts and model limits, and every
//! failure comes back as an [`EstimateError`] instead of a guessed number.

use serde::Serialize;
use thiserror::Error;

use keel_types::Message;

use crate::model_limits::{ModelLimits, ModelRegistry};
use crate::token_counter::TokenCounter;

#[derive(Debug, Error)]
pub enum EstimateError {
    #[error("unknown model `{0}`: no context limits are registered for it")]
    UnknownModel(String),
    #[error("tokenizer unavailable: {0}")]
    Tokenizer(String),
}

/// Token usage of a message list against one model's limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenEstimate {
    pub current_tokens: u32,
    pub context_limit: u32,
    pub output_reserve: u32,
    /// Input budget left after the current messages.
    pub available_tokens: u32,
}

impl TokenEstimate {
    #[must_use]
    pub fn new(current_tokens: u32, limits: ModelLimits) -> Self {
        Self {
            current_tokens,
            context_limit: limits.context_window(),
            output_reserve: limits.max_output(),
            available_tokens: limits
                .effective_input_budget()
                .saturating_sub(current_tokens),
        }
    }

    /// Tokens usable for input: the window minus the output reserve and safety margin.
    #[must_use]
    pub fn input_budget(&self) -> u32 {
        ModelLimits::new(self.context_limit, self.output_reserve).effective_input_budget()
    }
}

pub trait TokenEstimator {
    fn count_message(&self, message: &Message) -> u32;

    /// Limits for `model_id`. Unknown models are an error.
    fn limits(&self, model_id: &str) -> Result<ModelLimits, EstimateError>;

    fn count_messages(&self, messages: &[Message]) -> u32 {
        messages
            .iter()
            .map(|message| self.count_message(message))
            .fold(0u32, u32::saturating_add)
    }

    fn estimate(&self, messages: &[Message], model_id: &str) -> Result<TokenEstimate, EstimateError> {
        let limits = self.limits(model_id)?;
        Ok(TokenEstimate::new(self.count_messages(messages), limits))
    }
}

/// Default estimator: tiktoken counts plus the model registry.
#[derive(Debug, Clone)]
pub struct TiktokenEstimator {
    counter: TokenCounter,
    registry: ModelRegistry,
}

impl TiktokenEstimator {
    pub fn new(registry: ModelRegistry) -> Result<Self, EstimateError> {
        Ok(Self::with_counter(TokenCounter::new()?, registry))
    }

    #[must_use]
    pub fn with_counter(counter: TokenCounter, registry: ModelRegistry) -> Self {
        Self { counter, registry }
    }

    #[must_use]
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }
}

impl TokenEstimator for TiktokenEstimator {
    fn count_message(&self, message: &Message) -> u32 {
        self.counter.count_message(message)
    }

    fn limits(&self, model_id: &str) -> Result<ModelLimits, EstimateError> {
        self.registry
            .get(model_id)
            .map(|resolved| resolved.limits())
            .ok_or_else(|| EstimateError::UnknownModel(model_id.to_string()))
    }
}
