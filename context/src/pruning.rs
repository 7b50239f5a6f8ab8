//! Tool output pruning.
//!
//! Large tool payloads in older turns rarely matter once the agent has acted
//! on them. Pruning swaps them for a short placeholder while keeping the
//! result entry and its call id, so id pairing is never affected.

use serde_json::Value;

use keel_types::{Message, ToolResult};

pub const PRUNED_PLACEHOLDER: &str = "[tool output pruned during compaction]";

#[derive(Debug, Clone, PartialEq)]
pub struct PruneOutcome {
    pub messages: Vec<Message>,
    /// Results pruned by this pass.
    pub pruned: usize,
}

/// Replace oversized tool outputs outside the newest `protected_turns` turns.
///
/// Results already pruned or whose serialized output is at most `max_chars`
/// characters are left alone.
#[must_use]
pub fn prune_tool_outputs(
    messages: Vec<Message>,
    protected_turns: usize,
    max_chars: usize,
) -> PruneOutcome {
    let boundary = protected_boundary(&messages, protected_turns);
    let mut messages = messages;
    let mut pruned = 0;

    for message in &mut messages[..boundary] {
        let Message::Tool(tool) = message else {
            continue;
        };
        for result in tool.results_mut() {
            if !result.pruned && output_chars(&result.output) > max_chars {
                prune(result);
                pruned += 1;
            }
        }
    }

    if pruned > 0 {
        tracing::debug!(pruned, boundary, "Pruned tool outputs");
    }
    PruneOutcome { messages, pruned }
}

/// Number of results in `messages` that carry the pruned marker.
#[must_use]
pub fn count_pruned(messages: &[Message]) -> usize {
    messages
        .iter()
        .flat_map(Message::tool_results)
        .filter(|result| result.pruned)
        .count()
}

fn prune(result: &mut ToolResult) {
    result.output = Value::String(PRUNED_PLACEHOLDER.to_string());
    result.pruned = true;
}

/// Index of the first message belonging to the protected window.
///
/// Turns start at user messages. With fewer user messages than
/// `protected_turns`, everything is protected.
fn protected_boundary(messages: &[Message], protected_turns: usize) -> usize {
    if protected_turns == 0 {
        return messages.len();
    }
    messages
        .iter()
        .enumerate()
        .rev()
        .filter(|(_, message)| matches!(message, Message::User(_)))
        .nth(protected_turns - 1)
        .map_or(0, |(index, _)| index)
}

fn output_chars(output: &Value) -> usize {
    match output {
        Value::String(text) => text.chars().count(),
        other => other.to_string().chars().count(),
    }
}
