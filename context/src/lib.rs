//! Context management for tool-using conversations.
//!
//! This crate provides:
//! - Parsing of flat message histories into turns and exchanges
//! - Tool-call / tool-result pairing validation
//! - Budget-driven trimming that never splits an exchange
//! - Cross-turn working memory of entities and tools
//! - Token estimation against model-specific limits
//! - Compaction orchestration and session persistence
//!
//! # Architecture
//!
//! ```text
//! ContextService
//! ├── store: SessionStore (load/save at call boundaries)
//! ├── estimator: TokenEstimator (tiktoken + ModelRegistry)
//! └── per-session locks
//!
//! CompactionPolicy (one call)
//! ├── MessageParser  -> ParseResult
//! ├── TurnValidator  -> ValidationResult per turn
//! ├── ContextTrimmer -> TrimResult
//! ├── prune_tool_outputs
//! └── WorkingMemory::remove_tools
//! ```

mod compaction;
mod estimator;
mod extraction;
mod model_limits;
mod parser;
mod pruning;
mod service;
mod settings;
mod store;
mod token_counter;
mod trimmer;
mod turn;
mod validator;
mod working_memory;

pub use compaction::{
    CompactOptions, CompactionOutcome, CompactionPolicy, CompactionResult, CompactionSkipReason,
    ContextStats,
};
pub use estimator::{EstimateError, TiktokenEstimator, TokenEstimate, TokenEstimator};
pub use extraction::{EntityExtractor, ExtractionRule, ResultShape, ToolPattern};
pub use model_limits::{ModelLimits, ModelLimitsSource, ModelRegistry, ResolvedModelLimits};
pub use parser::MessageParser;
pub use pruning::{PRUNED_PLACEHOLDER, PruneOutcome, count_pruned, prune_tool_outputs};
pub use service::{CompactRequest, ContextError, ContextService};
pub use settings::{CompactionConfig, ContextManagerConfig};
pub use store::{FileSessionStore, PersistenceError, SessionSnapshot, SessionStore};
pub use token_counter::TokenCounter;
pub use trimmer::{ContextTrimmer, TrimResult};
pub use turn::{AssistantExchange, ConversationTurn, OrphanReason, OrphanedMessage, ParseResult};
pub use validator::{TurnValidator, ValidationIssue, ValidationResult};
pub use working_memory::{
    MAX_DISCOVERED_TOOLS, MAX_ENTITIES, WorkingMemory, WorkingMemoryState,
};
