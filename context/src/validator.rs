//! Tool-call / tool-result id pairing checks.
//!
//! Providers reject a request unless every tool call id is answered by exactly
//! one tool result id. Invalid turns are expected input, so validation reports
//! issues as data instead of failing.

use std::collections::BTreeSet;
use std::fmt;

use crate::turn::{AssistantExchange, ConversationTurn};

/// A specific pairing problem inside one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    /// A tool call has no matching result.
    MissingResult { exchange: usize, call_id: String },
    /// A result answers a call id the assistant never issued.
    UnexpectedResult { exchange: usize, result_id: String },
    /// The same call id was issued more than once.
    DuplicateCallId { exchange: usize, call_id: String },
    /// The same call id was answered more than once.
    DuplicateResultId { exchange: usize, result_id: String },
    /// A tool message is attached to an assistant message without tool calls.
    UnexpectedToolMessage { exchange: usize },
}

impl ValidationIssue {
    /// Index of the offending exchange within its turn.
    #[must_use]
    pub fn exchange(&self) -> usize {
        match self {
            ValidationIssue::MissingResult { exchange, .. }
            | ValidationIssue::UnexpectedResult { exchange, .. }
            | ValidationIssue::DuplicateCallId { exchange, .. }
            | ValidationIssue::DuplicateResultId { exchange, .. }
            | ValidationIssue::UnexpectedToolMessage { exchange } => *exchange,
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::MissingResult { exchange, call_id } => {
                write!(f, "exchange {exchange}: tool call {call_id} has no result")
            }
            ValidationIssue::UnexpectedResult {
                exchange,
                result_id,
            } => write!(
                f,
                "exchange {exchange}: tool result {result_id} has no matching call"
            ),
            ValidationIssue::DuplicateCallId { exchange, call_id } => {
                write!(f, "exchange {exchange}: tool call id {call_id} is repeated")
            }
            ValidationIssue::DuplicateResultId {
                exchange,
                result_id,
            } => write!(
                f,
                "exchange {exchange}: tool result id {result_id} is repeated"
            ),
            ValidationIssue::UnexpectedToolMessage { exchange } => write!(
                f,
                "exchange {exchange}: tool message follows an assistant message without tool calls"
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Indices of exchanges with at least one issue, ascending.
    #[must_use]
    pub fn invalid_exchanges(&self) -> BTreeSet<usize> {
        self.issues.iter().map(ValidationIssue::exchange).collect()
    }

    /// Human-readable issue descriptions.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.issues.iter().map(ToString::to_string).collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TurnValidator;

impl TurnValidator {
    #[must_use]
    pub fn validate(turn: &ConversationTurn) -> ValidationResult {
        let issues: Vec<ValidationIssue> = turn
            .exchanges
            .iter()
            .enumerate()
            .flat_map(|(index, exchange)| Self::validate_exchange(exchange, index))
            .collect();

        ValidationResult {
            is_valid: issues.is_empty(),
            issues,
        }
    }

    /// Issues for a single exchange, tagged with `index`.
    #[must_use]
    pub fn validate_exchange(exchange: &AssistantExchange, index: usize) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        let mut call_ids = BTreeSet::new();
        for call in exchange.assistant.tool_calls() {
            if !call_ids.insert(call.id.as_str()) {
                issues.push(ValidationIssue::DuplicateCallId {
                    exchange: index,
                    call_id: call.id.clone(),
                });
            }
        }

        let mut result_ids = BTreeSet::new();
        if let Some(tool) = &exchange.tool_message {
            if call_ids.is_empty() {
                issues.push(ValidationIssue::UnexpectedToolMessage { exchange: index });
            }
            for result in tool.results() {
                if !result_ids.insert(result.tool_call_id.as_str()) {
                    issues.push(ValidationIssue::DuplicateResultId {
                        exchange: index,
                        result_id: result.tool_call_id.clone(),
                    });
                }
            }
        }

        issues.extend(
            call_ids
                .difference(&result_ids)
                .map(|id| ValidationIssue::MissingResult {
                    exchange: index,
                    call_id: (*id).to_string(),
                }),
        );
        issues.extend(
            result_ids
                .difference(&call_ids)
                .map(|id| ValidationIssue::UnexpectedResult {
                    exchange: index,
                    result_id: (*id).to_string(),
                }),
        );

        issues
    }
}
