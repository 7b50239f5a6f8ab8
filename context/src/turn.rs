//! Turn structure derived from a flat message history.
//!
//! A turn starts at a user message and owns every assistant exchange up to the
//! next user message. Messages before the first user message form a preamble
//! turn without a user message.

use std::collections::BTreeSet;

use keel_types::{AssistantMessage, Message, SystemMessage, ToolMessage, UserMessage};

use crate::validator::TurnValidator;

/// One assistant message plus the tool message answering its tool calls.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantExchange {
    pub assistant: AssistantMessage,
    pub tool_message: Option<ToolMessage>,
}

impl AssistantExchange {
    #[must_use]
    pub fn new(assistant: AssistantMessage) -> Self {
        Self {
            assistant,
            tool_message: None,
        }
    }

    #[must_use]
    pub fn with_tool_message(assistant: AssistantMessage, tool_message: ToolMessage) -> Self {
        Self {
            assistant,
            tool_message: Some(tool_message),
        }
    }

    #[must_use]
    pub fn message_count(&self) -> usize {
        1 + usize::from(self.tool_message.is_some())
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        TurnValidator::validate_exchange(self, 0).is_empty()
    }

    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.assistant
            .tool_calls()
            .iter()
            .map(|call| call.name.as_str())
    }

    fn push_messages(&self, out: &mut Vec<Message>) {
        out.push(Message::Assistant(self.assistant.clone()));
        if let Some(tool) = &self.tool_message {
            out.push(Message::Tool(tool.clone()));
        }
    }
}

/// A user message plus the ordered assistant activity that followed it.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationTurn {
    /// `None` only for the preamble before the first user message.
    pub user_message: Option<UserMessage>,
    pub exchanges: Vec<AssistantExchange>,
}

impl ConversationTurn {
    #[must_use]
    pub fn new(user_message: UserMessage) -> Self {
        Self {
            user_message: Some(user_message),
            exchanges: Vec::new(),
        }
    }

    #[must_use]
    pub fn preamble() -> Self {
        Self {
            user_message: None,
            exchanges: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_preamble(&self) -> bool {
        self.user_message.is_none()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.user_message.is_none() && self.exchanges.is_empty()
    }

    #[must_use]
    pub fn message_count(&self) -> usize {
        usize::from(self.user_message.is_some())
            + self
                .exchanges
                .iter()
                .map(AssistantExchange::message_count)
                .sum::<usize>()
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.exchanges.iter().all(AssistantExchange::is_valid)
    }

    /// Tool names referenced by the tool calls of this turn.
    #[must_use]
    pub fn tool_names(&self) -> BTreeSet<String> {
        self.exchanges
            .iter()
            .flat_map(AssistantExchange::tool_names)
            .map(str::to_string)
            .collect()
    }

    /// Messages of this turn in original order.
    #[must_use]
    pub fn to_messages(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.message_count());
        self.push_messages(&mut out);
        out
    }

    pub(crate) fn push_messages(&self, out: &mut Vec<Message>) {
        if let Some(user) = &self.user_message {
            out.push(Message::User(user.clone()));
        }
        for exchange in &self.exchanges {
            exchange.push_messages(out);
        }
    }
}

/// Why a message could not be placed into the turn structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrphanReason {
    /// A system message anywhere but the first position.
    MisplacedSystem,
    /// A tool message that does not directly follow an assistant message with tool calls.
    NoPendingToolCalls,
    /// A second tool message answering an exchange that already has one.
    DuplicateToolMessage,
}

impl std::fmt::Display for OrphanReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            OrphanReason::MisplacedSystem => "system message after the start of history",
            OrphanReason::NoPendingToolCalls => "tool message without preceding tool calls",
            OrphanReason::DuplicateToolMessage => "second tool message for one exchange",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrphanedMessage {
    /// Position in the parsed input.
    pub index: usize,
    pub reason: OrphanReason,
    pub message: Message,
}

/// Structured view of a flat history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseResult {
    /// Leading system message, always retained.
    pub system_message: Option<SystemMessage>,
    pub turns: Vec<ConversationTurn>,
    /// Messages that could not be grouped; preserved, never reasoned about.
    pub orphaned_messages: Vec<OrphanedMessage>,
}

impl ParseResult {
    /// Total number of messages represented, including system and orphans.
    #[must_use]
    pub fn message_count(&self) -> usize {
        usize::from(self.system_message.is_some())
            + self.orphaned_messages.len()
            + self
                .turns
                .iter()
                .map(ConversationTurn::message_count)
                .sum::<usize>()
    }
}
