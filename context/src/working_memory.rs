//! Cross-turn working memory.
//!
//! Bounded recency caches of referenced entities and discovered tools, plus
//! per-tool usage statistics. The state survives history trimming and is
//! rendered into the prompt, so rendering must be a pure function of state:
//! identical state always yields identical text, which keeps provider prompt
//! prefix caches warm.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;
use std::time::SystemTime;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use keel_types::{Entity, ToolOutcome, ToolResult, ToolUsageRecord};

use crate::extraction::EntityExtractor;

pub const MAX_ENTITIES: usize = 10;
pub const MAX_DISCOVERED_TOOLS: usize = 20;
/// Entities rendered per entity type.
const MAX_RENDERED_PER_TYPE: usize = 3;

/// Serializable snapshot of [`WorkingMemory`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingMemoryState {
    /// Most recently touched first.
    #[serde(default)]
    pub entities: Vec<Entity>,
    /// Oldest inserted first.
    #[serde(default)]
    pub discovered_tools: Vec<String>,
    /// Sorted by tool name.
    #[serde(default)]
    pub tool_usage: Vec<ToolUsageRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct WorkingMemory {
    entities: Vec<Entity>,
    discovered_tools: IndexSet<String>,
    tool_usage: BTreeMap<String, ToolUsageRecord>,
}

impl WorkingMemory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh an entity, moving it to the front.
    pub fn add(&mut self, entity: Entity) {
        self.entities.retain(|existing| existing.id != entity.id);
        self.entities.insert(0, entity);
        self.entities.truncate(MAX_ENTITIES);
    }

    /// Union `names` into the discovered set, evicting the oldest insertions past the cap.
    pub fn add_discovered_tools<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self.discovered_tools.insert(name.into());
        }
        let excess = self
            .discovered_tools
            .len()
            .saturating_sub(MAX_DISCOVERED_TOOLS);
        if excess > 0 {
            self.discovered_tools.drain(..excess);
        }
    }

    pub fn remove_tools<'a, I>(&mut self, names: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        for name in names {
            self.discovered_tools.shift_remove(name);
        }
    }

    pub fn record_tool_usage(&mut self, name: &str, outcome: ToolOutcome, at: SystemTime) {
        match self.tool_usage.get_mut(name) {
            Some(record) => record.record(outcome, at),
            None => {
                self.tool_usage.insert(
                    name.to_string(),
                    ToolUsageRecord::first_use(name, outcome, at),
                );
            }
        }
    }

    /// Record usage of the tool behind `result` and remember the entities it yielded.
    pub fn observe_tool_result(
        &mut self,
        result: &ToolResult,
        extractor: &EntityExtractor,
        at: SystemTime,
    ) {
        self.record_tool_usage(
            &result.tool_name,
            ToolOutcome::from_is_error(result.is_error),
            at,
        );
        if result.is_error || result.pruned {
            return;
        }
        let entities = extractor.extract(&result.tool_name, &result.output, at);
        // Reverse so the first entity in the payload ends up most recent.
        for entity in entities.into_iter().rev() {
            self.add(entity);
        }
    }

    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn discovered_tools(&self) -> impl ExactSizeIterator<Item = &str> {
        self.discovered_tools.iter().map(String::as_str)
    }

    #[must_use]
    pub fn tool_usage(&self, name: &str) -> Option<&ToolUsageRecord> {
        self.tool_usage.get(name)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.discovered_tools.is_empty() && self.tool_usage.is_empty()
    }

    /// Prompt text for the current state. Empty when there is nothing to show.
    #[must_use]
    pub fn render_context(&self) -> String {
        if self.entities.is_empty() && self.discovered_tools.is_empty() {
            return String::new();
        }

        let mut out = String::from("## Working memory\n");

        if !self.entities.is_empty() {
            let mut by_type: BTreeMap<&str, Vec<&Entity>> = BTreeMap::new();
            for entity in &self.entities {
                by_type
                    .entry(entity.entity_type.as_str())
                    .or_default()
                    .push(entity);
            }

            out.push_str("\nRecently referenced:\n");
            for (entity_type, entities) in by_type {
                let shown: Vec<String> = entities
                    .iter()
                    .take(MAX_RENDERED_PER_TYPE)
                    .map(|entity| render_entity(entity))
                    .collect();
                let _ = write!(out, "- {entity_type}: {}", shown.join("; "));
                let hidden = entities.len().saturating_sub(MAX_RENDERED_PER_TYPE);
                if hidden > 0 {
                    let _ = write!(out, " (+{hidden} more)");
                }
                out.push('\n');
            }
        }

        if !self.discovered_tools.is_empty() {
            let sorted: BTreeSet<&str> = self.discovered_tools().collect();
            let names: Vec<&str> = sorted.into_iter().collect();
            let _ = writeln!(out, "\nDiscovered tools: {}", names.join(", "));
        }

        out
    }

    #[must_use]
    pub fn to_state(&self) -> WorkingMemoryState {
        WorkingMemoryState {
            entities: self.entities.clone(),
            discovered_tools: self.discovered_tools.iter().cloned().collect(),
            tool_usage: self.tool_usage.values().cloned().collect(),
        }
    }

    /// Rebuild from a snapshot, re-applying the capacity limits.
    #[must_use]
    pub fn from_state(state: WorkingMemoryState) -> Self {
        let mut memory = Self::new();
        for entity in state.entities.into_iter().rev() {
            memory.add(entity);
        }
        memory.add_discovered_tools(state.discovered_tools);
        memory.tool_usage = state
            .tool_usage
            .into_iter()
            .map(|record| (record.name.clone(), record))
            .collect();
        memory
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.to_state())
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json).map(Self::from_state)
    }
}

fn render_entity(entity: &Entity) -> String {
    match &entity.slug {
        Some(slug) => format!("{} (id: {}, slug: {})", entity.name, entity.id, slug),
        None => format!("{} (id: {})", entity.name, entity.id),
    }
}
