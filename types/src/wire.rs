//! Boundary decoding of provider/SDK-shaped message payloads.
//!
//! Stored histories and client requests carry messages whose `content` is
//! either a plain string or an array of typed parts (`text`, `tool-call`,
//! `tool-result`). Everything past this module works on [`Message`] only.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::message::{Message, Role, ToolCall, ToolResult};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("message {index}: malformed payload: {source}")]
    Malformed {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("message {index}: {role} messages cannot contain {part} parts")]
    UnexpectedPart {
        index: usize,
        role: Role,
        part: &'static str,
    },
    #[error("message {index}: tool message has no tool-result parts")]
    EmptyToolMessage { index: usize },
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    role: Role,
    #[serde(default)]
    content: WireContent,
    /// OpenAI-style assistant tool calls outside of `content`.
    #[serde(default, alias = "toolCalls")]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Parts(Vec<WirePart>),
    #[default]
    Null,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum WirePart {
    Text {
        text: String,
    },
    ToolCall {
        #[serde(alias = "toolCallId")]
        tool_call_id: String,
        #[serde(alias = "toolName")]
        tool_name: String,
        #[serde(default, alias = "args")]
        input: Value,
    },
    ToolResult {
        #[serde(alias = "toolCallId")]
        tool_call_id: String,
        #[serde(alias = "toolName")]
        tool_name: String,
        #[serde(default, alias = "result")]
        output: Value,
        #[serde(default, alias = "isError")]
        is_error: bool,
    },
}

impl WirePart {
    fn kind(&self) -> &'static str {
        match self {
            WirePart::Text { .. } => "text",
            WirePart::ToolCall { .. } => "tool-call",
            WirePart::ToolResult { .. } => "tool-result",
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(default)]
    function: Option<WireFunction>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

impl From<WireToolCall> for ToolCall {
    fn from(call: WireToolCall) -> Self {
        match call.function {
            Some(function) => {
                ToolCall::new(call.id, function.name, parse_arguments(function.arguments))
            }
            None => ToolCall::new(
                call.id,
                call.name.unwrap_or_default(),
                parse_arguments(call.arguments),
            ),
        }
    }
}

/// OpenAI encodes arguments as a JSON string; keep the raw string if it isn't JSON.
fn parse_arguments(arguments: Value) -> Value {
    match arguments {
        Value::String(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
        other => other,
    }
}

/// Decode one message. `index` is only used for error reporting.
pub fn decode_message(index: usize, value: Value) -> Result<Message, DecodeError> {
    let wire: WireMessage =
        serde_json::from_value(value).map_err(|source| DecodeError::Malformed { index, source })?;

    let parts = match wire.content {
        WireContent::Text(text) => vec![WirePart::Text { text }],
        WireContent::Parts(parts) => parts,
        WireContent::Null => Vec::new(),
    };

    let reject = |role: Role, part: &WirePart| DecodeError::UnexpectedPart {
        index,
        role,
        part: part.kind(),
    };

    match wire.role {
        Role::System | Role::User => {
            let mut text = String::new();
            for part in parts {
                match part {
                    WirePart::Text { text: chunk } => text.push_str(&chunk),
                    other => return Err(reject(wire.role, &other)),
                }
            }
            Ok(if wire.role == Role::System {
                Message::system(text)
            } else {
                Message::user(text)
            })
        }
        Role::Assistant => {
            let mut text = String::new();
            let mut calls: Vec<ToolCall> = wire.tool_calls.into_iter().map(Into::into).collect();
            for part in parts {
                match part {
                    WirePart::Text { text: chunk } => text.push_str(&chunk),
                    WirePart::ToolCall {
                        tool_call_id,
                        tool_name,
                        input,
                    } => calls.push(ToolCall::new(tool_call_id, tool_name, input)),
                    other @ WirePart::ToolResult { .. } => {
                        return Err(reject(Role::Assistant, &other));
                    }
                }
            }
            Ok(Message::assistant_with_tools(text, calls))
        }
        Role::Tool => {
            let mut results = Vec::with_capacity(parts.len());
            for part in parts {
                match part {
                    WirePart::ToolResult {
                        tool_call_id,
                        tool_name,
                        output,
                        is_error,
                    } => results.push(ToolResult {
                        tool_call_id,
                        tool_name,
                        output,
                        is_error,
                        pruned: false,
                    }),
                    other => return Err(reject(Role::Tool, &other)),
                }
            }
            if results.is_empty() {
                return Err(DecodeError::EmptyToolMessage { index });
            }
            Ok(Message::tool(results))
        }
    }
}

/// Decode an ordered list of wire messages, failing on the first bad entry.
pub fn decode_messages(values: Vec<Value>) -> Result<Vec<Message>, DecodeError> {
    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| decode_message(index, value))
        .collect()
}
