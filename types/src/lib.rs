//! Core domain types for Keel.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod ids;
mod memory;
mod message;
pub mod wire;

pub use ids::SessionId;
pub use memory::{Entity, ToolOutcome, ToolUsageRecord};
pub use message::{
    AssistantMessage, Message, Role, SystemMessage, ToolCall, ToolMessage, ToolResult,
    UserMessage,
};
pub use wire::{DecodeError, decode_message, decode_messages};
