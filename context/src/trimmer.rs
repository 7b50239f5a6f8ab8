//! Budget-driven history trimming that never breaks tool id pairing.
//!
//! Turns are walked newest to oldest. The newest `min_turns_to_keep` turns are
//! kept no matter what, even when they alone exceed `max_messages`; the budget
//! is a soft target beneath that floor. Older turns are kept while the running
//! message total fits. Exchanges are only ever kept or dropped whole.

use std::collections::BTreeSet;

use keel_types::Message;

use crate::parser::MessageParser;
use crate::settings::ContextManagerConfig;
use crate::turn::{ConversationTurn, ParseResult};
use crate::validator::{TurnValidator, ValidationResult};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrimResult {
    /// System message, then orphans, then kept turns in chronological order.
    pub messages: Vec<Message>,
    /// Tool names referenced only by dropped turns or exchanges.
    pub removed_tools: BTreeSet<String>,
    /// Tool names still referenced by a surviving turn.
    pub active_tools: BTreeSet<String>,
    pub messages_removed: usize,
    /// Turns dropped entirely.
    pub turns_removed: usize,
    /// Invalid turns dropped outside the floor plus invalid turns repaired inside it.
    pub invalid_turns_removed: usize,
}

impl TrimResult {
    #[must_use]
    pub fn removed_anything(&self) -> bool {
        self.messages_removed > 0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ContextTrimmer;

impl ContextTrimmer {
    /// Parse and trim in one step.
    #[must_use]
    pub fn trim_messages(messages: &[Message], config: &ContextManagerConfig) -> TrimResult {
        Self::trim(&MessageParser::parse(messages), config)
    }

    #[must_use]
    pub fn trim(parsed: &ParseResult, config: &ContextManagerConfig) -> TrimResult {
        let mut kept: Vec<ConversationTurn> = Vec::new();
        let mut removal_candidates = BTreeSet::new();
        let mut protected = 0usize;
        let mut total = 0usize;
        let mut budget_exhausted = false;
        let mut turns_removed = 0usize;
        let mut invalid_turns_removed = 0usize;

        for (age, turn) in parsed.turns.iter().rev().enumerate() {
            let validation = TurnValidator::validate(turn);

            if protected < config.min_turns_to_keep {
                let turn = if validation.is_valid {
                    turn.clone()
                } else {
                    invalid_turns_removed += 1;
                    tracing::debug!(
                        age,
                        issues = ?validation.messages(),
                        "Repairing invalid turn inside protected window"
                    );
                    Self::repair(turn, &validation, &mut removal_candidates)
                };

                if turn.is_empty() {
                    turns_removed += 1;
                    continue;
                }
                total += turn.message_count();
                protected += 1;
                kept.push(turn);
                continue;
            }

            let keep = if !validation.is_valid {
                invalid_turns_removed += 1;
                tracing::debug!(age, issues = ?validation.messages(), "Dropping invalid turn");
                false
            } else if budget_exhausted {
                false
            } else if total + turn.message_count() > config.max_messages {
                budget_exhausted = true;
                false
            } else {
                true
            };

            if keep {
                total += turn.message_count();
                kept.push(turn.clone());
            } else {
                turns_removed += 1;
                removal_candidates.extend(turn.tool_names());
            }
        }

        kept.reverse();

        let active_tools: BTreeSet<String> =
            kept.iter().flat_map(ConversationTurn::tool_names).collect();
        let removed_tools: BTreeSet<String> = removal_candidates
            .difference(&active_tools)
            .cloned()
            .collect();

        let mut messages = Vec::with_capacity(
            usize::from(parsed.system_message.is_some()) + parsed.orphaned_messages.len() + total,
        );
        if let Some(system) = &parsed.system_message {
            messages.push(Message::System(system.clone()));
        }
        messages.extend(parsed.orphaned_messages.iter().map(|o| o.message.clone()));
        for turn in &kept {
            turn.push_messages(&mut messages);
        }

        let messages_removed = parsed.message_count().saturating_sub(messages.len());
        tracing::debug!(
            kept_turns = kept.len(),
            turns_removed,
            invalid_turns_removed,
            messages_removed,
            "Trimmed history"
        );

        TrimResult {
            messages,
            removed_tools,
            active_tools,
            messages_removed,
            turns_removed,
            invalid_turns_removed,
        }
    }

    /// Turns the trimmer may keep, newest first: the floor turns as repaired,
    /// then every older valid turn. Budget checks are left to the caller.
    pub(crate) fn retainable_turns(
        parsed: &ParseResult,
        config: &ContextManagerConfig,
    ) -> Vec<ConversationTurn> {
        let mut turns = Vec::with_capacity(parsed.turns.len());
        let mut protected = 0usize;

        for turn in parsed.turns.iter().rev() {
            let validation = TurnValidator::validate(turn);
            if protected < config.min_turns_to_keep {
                let turn = if validation.is_valid {
                    turn.clone()
                } else {
                    Self::repair(turn, &validation, &mut BTreeSet::new())
                };
                if !turn.is_empty() {
                    protected += 1;
                    turns.push(turn);
                }
            } else if validation.is_valid {
                turns.push(turn.clone());
            }
        }

        turns
    }

    /// Drop only the exchanges with pairing issues.
    fn repair(
        turn: &ConversationTurn,
        validation: &ValidationResult,
        removal_candidates: &mut BTreeSet<String>,
    ) -> ConversationTurn {
        let invalid = validation.invalid_exchanges();
        let mut repaired = ConversationTurn {
            user_message: turn.user_message.clone(),
            exchanges: Vec::with_capacity(turn.exchanges.len()),
        };

        for (index, exchange) in turn.exchanges.iter().enumerate() {
            if invalid.contains(&index) {
                removal_candidates.extend(exchange.tool_names().map(str::to_string));
            } else {
                repaired.exchanges.push(exchange.clone());
            }
        }

        repaired
    }
}
