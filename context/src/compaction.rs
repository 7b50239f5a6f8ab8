//! Budget-triggered compaction.
//!
//! [`CompactionPolicy`] ties the pieces together: it measures usage through
//! the injected [`TokenEstimator`], decides whether to compact, translates
//! token headroom into a message budget for [`ContextTrimmer`], prunes old
//! tool outputs, and drops de-referenced tools from working memory.
//!
//! Compaction never fabricates changes. When nothing can be removed the
//! caller gets back exactly what it passed in, with a skip reason.

use std::fmt;

use serde::Serialize;

use keel_types::Message;

use crate::estimator::{EstimateError, TokenEstimate, TokenEstimator};
use crate::parser::MessageParser;
use crate::pruning::{count_pruned, prune_tool_outputs};
use crate::settings::{CompactionConfig, ContextManagerConfig};
use crate::trimmer::ContextTrimmer;
use crate::turn::ParseResult;
use crate::working_memory::WorkingMemory;

/// Token usage snapshot for one session and model.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextStats {
    pub current_tokens: u32,
    pub available_tokens: u32,
    pub context_limit: u32,
    pub output_reserve: u32,
    /// Share of the input budget in use, 0-100 (can exceed 100).
    pub usage_percent: f64,
    pub message_count: usize,
    pub pruned_results: usize,
    pub is_approaching_limit: bool,
    pub is_over_limit: bool,
}

/// Why a compaction request left the context untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompactionSkipReason {
    #[serde(rename = "not needed")]
    NotNeeded,
    #[serde(rename = "already minimal")]
    AlreadyMinimal,
    #[serde(rename = "no compaction possible")]
    NoCompactionPossible,
}

impl CompactionSkipReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CompactionSkipReason::NotNeeded => "not needed",
            CompactionSkipReason::AlreadyMinimal => "already minimal",
            CompactionSkipReason::NoCompactionPossible => "no compaction possible",
        }
    }
}

impl fmt::Display for CompactionSkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionResult {
    pub compacted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<CompactionSkipReason>,
    pub tokens_before: u32,
    pub tokens_after: u32,
    pub tokens_saved: u32,
    /// `tokens_saved / tokens_before`, 0 when nothing was measured.
    pub compression_ratio: f64,
    pub pruned_outputs: usize,
    pub compacted_messages: usize,
    pub removed_tools: Vec<String>,
    pub messages_before: usize,
    pub messages_after: usize,
}

impl CompactionResult {
    fn skipped(reason: CompactionSkipReason, tokens: u32, messages: usize) -> Self {
        Self {
            compacted: false,
            reason: Some(reason),
            tokens_before: tokens,
            tokens_after: tokens,
            tokens_saved: 0,
            compression_ratio: 0.0,
            pruned_outputs: 0,
            compacted_messages: 0,
            removed_tools: Vec::new(),
            messages_before: messages,
            messages_after: messages,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CompactOptions<'a> {
    pub model_id: &'a str,
    /// Compact even when usage is below the approaching threshold.
    pub force: bool,
}

/// New session state plus the report. On a skip, `messages` and `memory`
/// are the inputs, unchanged.
#[derive(Debug, Clone)]
pub struct CompactionOutcome {
    pub messages: Vec<Message>,
    pub memory: WorkingMemory,
    pub result: CompactionResult,
}

pub struct CompactionPolicy<'a, E: TokenEstimator + ?Sized> {
    estimator: &'a E,
    context: ContextManagerConfig,
    config: CompactionConfig,
}

impl<'a, E: TokenEstimator + ?Sized> CompactionPolicy<'a, E> {
    pub fn new(estimator: &'a E, context: ContextManagerConfig, config: CompactionConfig) -> Self {
        Self {
            estimator,
            context,
            config,
        }
    }

    pub fn compute_stats(
        &self,
        messages: &[Message],
        model_id: &str,
    ) -> Result<ContextStats, EstimateError> {
        let estimate = self.estimator.estimate(messages, model_id)?;
        Ok(self.stats_from(messages, &estimate))
    }

    pub fn compact(
        &self,
        messages: Vec<Message>,
        mut memory: WorkingMemory,
        options: CompactOptions<'_>,
    ) -> Result<CompactionOutcome, EstimateError> {
        let estimate = self.estimator.estimate(&messages, options.model_id)?;
        let stats = self.stats_from(&messages, &estimate);
        let tokens_before = estimate.current_tokens;
        let messages_before = messages.len();

        if !(options.force || stats.is_approaching_limit || stats.is_over_limit) {
            tracing::debug!(usage = stats.usage_percent, "Compaction not needed");
            return Ok(CompactionOutcome {
                result: CompactionResult::skipped(
                    CompactionSkipReason::NotNeeded,
                    tokens_before,
                    messages_before,
                ),
                messages,
                memory,
            });
        }

        let parsed = MessageParser::parse(&messages);
        let trim_config = self
            .context
            .with_max_messages(self.message_budget(&parsed, &estimate));
        let trimmed = ContextTrimmer::trim(&parsed, &trim_config);
        let pruned = prune_tool_outputs(
            trimmed.messages,
            self.context.min_turns_to_keep,
            self.config.prune_output_chars,
        );

        if trimmed.messages_removed == 0 && pruned.pruned == 0 {
            let reason = if stats.is_over_limit {
                CompactionSkipReason::NoCompactionPossible
            } else {
                CompactionSkipReason::AlreadyMinimal
            };
            tracing::debug!(%reason, "Compaction skipped");
            return Ok(CompactionOutcome {
                result: CompactionResult::skipped(reason, tokens_before, messages_before),
                messages,
                memory,
            });
        }

        memory.remove_tools(&trimmed.removed_tools);

        let messages = pruned.messages;
        let tokens_after = self.estimator.count_messages(&messages);
        let tokens_saved = tokens_before.saturating_sub(tokens_after);
        let compression_ratio = if tokens_before == 0 {
            0.0
        } else {
            f64::from(tokens_saved) / f64::from(tokens_before)
        };

        let result = CompactionResult {
            compacted: true,
            reason: None,
            tokens_before,
            tokens_after,
            tokens_saved,
            compression_ratio,
            pruned_outputs: pruned.pruned,
            compacted_messages: trimmed.messages_removed,
            removed_tools: trimmed.removed_tools.into_iter().collect(),
            messages_before,
            messages_after: messages.len(),
        };
        tracing::info!(
            tokens_before,
            tokens_after,
            messages_before,
            messages_after = result.messages_after,
            pruned_outputs = result.pruned_outputs,
            "Compacted context"
        );

        Ok(CompactionOutcome {
            messages,
            memory,
            result,
        })
    }

    fn stats_from(&self, messages: &[Message], estimate: &TokenEstimate) -> ContextStats {
        let budget = estimate.input_budget();
        let usage_percent = if budget == 0 {
            if estimate.current_tokens == 0 { 0.0 } else { 100.0 }
        } else {
            f64::from(estimate.current_tokens) / f64::from(budget) * 100.0
        };

        ContextStats {
            current_tokens: estimate.current_tokens,
            available_tokens: estimate.available_tokens,
            context_limit: estimate.context_limit,
            output_reserve: estimate.output_reserve,
            usage_percent,
            message_count: messages.len(),
            pruned_results: count_pruned(messages),
            is_approaching_limit: usage_percent >= self.config.approaching_percent,
            is_over_limit: usage_percent >= self.config.over_limit_percent,
        }
    }

    /// Messages allowed after compaction: the configured ceiling, lowered to
    /// the number of newest retainable turn messages that fit in the target
    /// share of the budget.
    ///
    /// The system message and orphans are always kept, so their tokens come
    /// off the target first and they never occupy a message slot.
    fn message_budget(&self, parsed: &ParseResult, estimate: &TokenEstimate) -> usize {
        let target =
            (f64::from(estimate.input_budget()) * self.config.target_percent / 100.0).max(0.0) as u32;

        let fixed = parsed
            .system_message
            .iter()
            .map(|system| self.estimator.count_message(&Message::System(system.clone())))
            .chain(
                parsed
                    .orphaned_messages
                    .iter()
                    .map(|orphan| self.estimator.count_message(&orphan.message)),
            )
            .fold(0u32, u32::saturating_add);
        let mut remaining = target.saturating_sub(fixed);

        let mut fitting = 0;
        'turns: for turn in ContextTrimmer::retainable_turns(parsed, &self.context) {
            for message in turn.to_messages().iter().rev() {
                let tokens = self.estimator.count_message(message);
                if tokens > remaining {
                    break 'turns;
                }
                remaining -= tokens;
                fitting += 1;
            }
        }

        let budget = self.context.max_messages.min(fitting);
        tracing::debug!(target, fixed, fitting, budget, "Derived message budget");
        budget
    }
}
