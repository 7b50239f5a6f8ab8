//! Tunable knobs for trimming and compaction.

use serde::{Deserialize, Serialize};

/// Budget policy for [`ContextTrimmer`](crate::ContextTrimmer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextManagerConfig {
    /// Soft ceiling on turn messages kept (system message and orphans excluded).
    pub max_messages: usize,
    /// Hard floor of most recent turns kept intact regardless of budget.
    pub min_turns_to_keep: usize,
}

impl ContextManagerConfig {
    pub const DEFAULT_MAX_MESSAGES: usize = 20;
    pub const DEFAULT_MIN_TURNS_TO_KEEP: usize = 2;

    #[must_use]
    pub fn with_max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = max_messages;
        self
    }
}

impl Default for ContextManagerConfig {
    fn default() -> Self {
        Self {
            max_messages: Self::DEFAULT_MAX_MESSAGES,
            min_turns_to_keep: Self::DEFAULT_MIN_TURNS_TO_KEEP,
        }
    }
}

/// Usage thresholds and compaction targets, as percentages of the input budget.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    /// Usage at or above this percentage marks the context as approaching its limit.
    pub approaching_percent: f64,
    /// Usage at or above this percentage marks the context as over its limit.
    pub over_limit_percent: f64,
    /// Token usage the message budget is derived from when compacting.
    pub target_percent: f64,
    /// Tool outputs longer than this (serialized chars) are pruned outside the protected turns.
    pub prune_output_chars: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            approaching_percent: 80.0,
            over_limit_percent: 100.0,
            target_percent: 60.0,
            prune_output_chars: 2000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ContextManagerConfig::default();
        assert_eq!(config.max_messages, 20);
        assert_eq!(config.min_turns_to_keep, 2);

        let compaction = CompactionConfig::default();
        assert!((compaction.approaching_percent - 80.0).abs() < f64::EPSILON);
        assert!((compaction.over_limit_percent - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn partial_json_keeps_remaining_defaults() {
        let config: ContextManagerConfig =
            serde_json::from_str(r#"{"max_messages": 8}"#).unwrap();
        assert_eq!(config.max_messages, 8);
        assert_eq!(config.min_turns_to_keep, 2);
    }
}
