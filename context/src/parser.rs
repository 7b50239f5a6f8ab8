//! Splits a flat message list into system message, turns, and orphans.
//!
//! Parsing never fails. Anything that cannot be placed into the turn
//! structure is kept as an [`OrphanedMessage`].

use keel_types::Message;

use crate::turn::{AssistantExchange, ConversationTurn, OrphanReason, OrphanedMessage, ParseResult};

#[derive(Debug, Clone, Copy, Default)]
pub struct MessageParser;

impl MessageParser {
    #[must_use]
    pub fn parse(messages: &[Message]) -> ParseResult {
        let mut result = ParseResult::default();
        let mut current: Option<ConversationTurn> = None;

        for (index, message) in messages.iter().enumerate() {
            let orphan_reason = match message {
                Message::System(system) if index == 0 => {
                    result.system_message = Some(system.clone());
                    None
                }
                Message::System(_) => Some(OrphanReason::MisplacedSystem),
                Message::User(user) => {
                    if let Some(turn) = current.replace(ConversationTurn::new(user.clone())) {
                        result.turns.push(turn);
                    }
                    None
                }
                Message::Assistant(assistant) => {
                    current
                        .get_or_insert_with(ConversationTurn::preamble)
                        .exchanges
                        .push(AssistantExchange::new(assistant.clone()));
                    None
                }
                Message::Tool(tool) => {
                    match current.as_mut().and_then(|turn| turn.exchanges.last_mut()) {
                        Some(exchange) if exchange.tool_message.is_some() => {
                            Some(OrphanReason::DuplicateToolMessage)
                        }
                        Some(exchange) if exchange.assistant.has_tool_calls() => {
                            exchange.tool_message = Some(tool.clone());
                            None
                        }
                        _ => Some(OrphanReason::NoPendingToolCalls),
                    }
                }
            };

            if let Some(reason) = orphan_reason {
                tracing::warn!(index, role = %message.role(), %reason, "Orphaned message in history");
                result.orphaned_messages.push(OrphanedMessage {
                    index,
                    reason,
                    message: message.clone(),
                });
            }
        }

        if let Some(turn) = current {
            result.turns.push(turn);
        }

        result
    }
}
