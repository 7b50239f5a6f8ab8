//! Shared test utilities and fixtures
//!
//! Common infrastructure for integration tests.

#![allow(dead_code)]

use std::path::Path;

use serde_json::json;

use keel_context::{
    EstimateError, FileSessionStore, ModelLimits, SessionSnapshot, SessionStore, TokenEstimator,
};
use keel_types::{Message, SessionId, ToolCall, ToolResult};

pub const TEST_MODEL: &str = "test-model";

/// Deterministic estimator: four characters per token plus one per message.
pub struct CharEstimator {
    pub limits: ModelLimits,
}

impl CharEstimator {
    pub fn roomy() -> Self {
        Self {
            limits: ModelLimits::new(1_000_000, 1_000),
        }
    }
}

impl TokenEstimator for CharEstimator {
    fn count_message(&self, message: &Message) -> u32 {
        let chars = message.content().len()
            + message
                .tool_calls()
                .iter()
                .map(|call| call.arguments.to_string().len())
                .sum::<usize>()
            + message
                .tool_results()
                .iter()
                .map(|result| result.output.to_string().len())
                .sum::<usize>();
        u32::try_from(chars / 4 + 1).unwrap()
    }

    fn limits(&self, model_id: &str) -> Result<ModelLimits, EstimateError> {
        if model_id == TEST_MODEL {
            Ok(self.limits)
        } else {
            Err(EstimateError::UnknownModel(model_id.to_string()))
        }
    }
}

/// One turn: user request, assistant calling `tool`, the result, a closing answer.
pub fn tool_turn(n: usize, tool: &str) -> Vec<Message> {
    let id = format!("call_{n}");
    vec![
        Message::user(format!("request {n}")),
        Message::assistant_with_tools("", vec![ToolCall::new(&id, tool, json!({"n": n}))]),
        Message::tool(vec![ToolResult::success(
            &id,
            tool,
            json!({"id": format!("p{n}"), "title": format!("Page {n}")}),
        )]),
        Message::assistant(format!("done {n}")),
    ]
}

/// A system message followed by `turns` tool turns, turn `n` using `tool_n`.
pub fn history(turns: usize) -> Vec<Message> {
    let mut messages = vec![Message::system("You manage a website.")];
    for n in 0..turns {
        messages.extend(tool_turn(n, &format!("tool_{n}")));
    }
    messages
}

pub fn write_session(dir: &Path, id: &str, messages: Vec<Message>) -> SessionId {
    let id = SessionId::new(id);
    let snapshot = SessionSnapshot {
        messages,
        ..SessionSnapshot::default()
    };
    FileSessionStore::new(dir).save(&id, &snapshot).unwrap();
    id
}
