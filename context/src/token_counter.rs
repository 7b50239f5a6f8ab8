//! Token counting using tiktoken.
//!
//! This module provides **approximate** token counting using the `o200k_base`
//! encoding from tiktoken. This encoding is accurate for OpenAI models and
//! serves as a reasonable approximation for others:
//!
//! - **Claude models**: Anthropic uses a proprietary tokenizer; counts may vary by ~5-10%
//! - **Gemini models**: Google uses a proprietary tokenizer; counts may vary
//! - **Message overhead**: The fixed 4-token overhead per message is an approximation
//!
//! The 5% safety margin in `ModelLimits::effective_input_budget()` helps account
//! for these inaccuracies.

use std::sync::Arc;

use serde_json::Value;
use tiktoken_rs::{CoreBPE, o200k_base};

use keel_types::{Message, ToolCall, ToolResult};

use crate::estimator::EstimateError;

/// Approximate token counter over an explicitly constructed `o200k_base` encoder.
///
/// Loading the vocabulary is expensive, so build one counter and share it
/// (it is cheap to clone). There is no byte-length fallback: if the encoder
/// cannot be built, construction fails.
///
/// # Token Counting Overhead
///
/// Each message adds ~4 tokens of overhead to approximate role markers and
/// message delimiters. This overhead may vary by provider and model.
#[derive(Clone)]
pub struct TokenCounter {
    encoder: Arc<CoreBPE>,
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter")
            .field("encoder", &"<CoreBPE o200k_base>")
            .finish()
    }
}

impl TokenCounter {
    pub fn new() -> Result<Self, EstimateError> {
        let encoder = o200k_base().map_err(|e| EstimateError::Tokenizer(e.to_string()))?;
        Ok(Self {
            encoder: Arc::new(encoder),
        })
    }

    /// Counts the number of tokens in a string.
    #[must_use]
    pub fn count_str(&self, text: &str) -> u32 {
        let len = self.encoder.encode_ordinary(text).len();
        u32::try_from(len).unwrap_or(u32::MAX)
    }

    /// Counts tokens for a single message, including role overhead.
    #[must_use]
    pub fn count_message(&self, msg: &Message) -> u32 {
        const MESSAGE_OVERHEAD: u32 = 4;

        let role_tokens = self.count_str(msg.role().as_str());

        let content_tokens = match msg {
            Message::System(_) | Message::User(_) => self.count_str(msg.content()),
            Message::Assistant(assistant) => {
                self.count_str(assistant.content())
                    + assistant
                        .tool_calls()
                        .iter()
                        .map(|call| self.count_call(call))
                        .sum::<u32>()
            }
            Message::Tool(tool) => tool
                .results()
                .iter()
                .map(|result| self.count_result(result))
                .sum(),
        };

        content_tokens + role_tokens + MESSAGE_OVERHEAD
    }

    /// Sums the token count of each message including their overhead.
    #[must_use]
    pub fn count_messages(&self, messages: &[Message]) -> u32 {
        messages.iter().map(|msg| self.count_message(msg)).sum()
    }

    fn count_call(&self, call: &ToolCall) -> u32 {
        let args_tokens = match serde_json::to_string(&call.arguments) {
            Ok(s) => self.count_str(&s),
            Err(_) => 0,
        };
        self.count_str(&call.name) + self.count_str(&call.id) + args_tokens
    }

    fn count_result(&self, result: &ToolResult) -> u32 {
        let output_tokens = match &result.output {
            Value::String(text) => self.count_str(text),
            other => self.count_str(&other.to_string()),
        };
        output_tokens + self.count_str(&result.tool_call_id) + self.count_str(&result.tool_name)
    }
}

#[cfg(test)]
mod tests {
    use super::TokenCounter;
    use keel_types::{Message, ToolCall, ToolResult};
    use serde_json::json;

    fn counter() -> TokenCounter {
        TokenCounter::new().expect("o200k_base encoder")
    }

    #[test]
    fn count_str_empty_string() {
        assert_eq!(counter().count_str(""), 0);
    }

    #[test]
    fn count_str_longer_text() {
        let tokens = counter().count_str("The quick brown fox jumps over the lazy dog.");

        assert!(tokens >= 5);
        assert!(tokens <= 20);
    }

    #[test]
    fn count_message_user() {
        let counter = counter();
        let tokens = counter.count_message(&Message::user("Hello!"));

        let expected = counter.count_str("Hello!") + counter.count_str("user") + 4;
        assert_eq!(tokens, expected);
    }

    #[test]
    fn count_messages_sums_each_message() {
        let counter = counter();
        let messages = vec![
            Message::user("Hello!"),
            Message::assistant("How can I help?"),
            Message::user("I have a question about Rust."),
        ];

        let sum: u32 = messages.iter().map(|m| counter.count_message(m)).sum();
        assert_eq!(counter.count_messages(&messages), sum);
        assert_eq!(counter.count_messages(&[]), 0);
    }

    #[test]
    fn assistant_count_includes_tool_call_arguments() {
        let counter = counter();
        let plain = counter.count_message(&Message::assistant(""));
        let with_call = counter.count_message(&Message::assistant_with_tools(
            "",
            vec![ToolCall::new(
                "call_123",
                "update_page",
                json!({"id": "p1", "body": "a fairly long replacement paragraph"}),
            )],
        ));

        assert!(with_call > plain + counter.count_str("update_page"));
    }

    #[test]
    fn tool_count_includes_output_and_metadata() {
        let counter = counter();
        let msg = Message::tool(vec![ToolResult::success(
            "call_123",
            "get_page",
            json!("file contents here"),
        )]);

        let tokens = counter.count_message(&msg);
        let content_only = counter.count_str("file contents here") + counter.count_str("tool") + 4;
        assert!(tokens > content_only);
    }

    #[test]
    fn clones_share_the_encoder() {
        let a = counter();
        let b = a.clone();
        let text = "The quick brown fox";
        assert_eq!(a.count_str(text), b.count_str(text));
    }
}
