//! Records held by the cross-turn working memory.
//!
//! Constructors take `SystemTime` explicitly; callers own the clock.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// A resource the agent has referenced (a page, an image, a collection...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Free-form type tag such as `page` or `image`.
    pub entity_type: String,
    /// Unique id of the resource. Identity for deduplication.
    pub id: String,
    /// Human readable name shown in the rendered context.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    pub last_touched: SystemTime,
}

impl Entity {
    pub fn new(
        entity_type: impl Into<String>,
        id: impl Into<String>,
        name: impl Into<String>,
        last_touched: SystemTime,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
            name: name.into(),
            slug: None,
            last_touched,
        }
    }

    #[must_use]
    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }
}

/// Outcome of the most recent invocation of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolOutcome {
    Success,
    Error,
}

impl ToolOutcome {
    #[must_use]
    pub fn from_is_error(is_error: bool) -> Self {
        if is_error {
            ToolOutcome::Error
        } else {
            ToolOutcome::Success
        }
    }
}

/// Usage statistics for a tool the agent actually invoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolUsageRecord {
    pub name: String,
    pub count: u32,
    pub last_used: SystemTime,
    pub last_outcome: ToolOutcome,
}

impl ToolUsageRecord {
    pub fn first_use(name: impl Into<String>, outcome: ToolOutcome, at: SystemTime) -> Self {
        Self {
            name: name.into(),
            count: 1,
            last_used: at,
            last_outcome: outcome,
        }
    }

    pub fn record(&mut self, outcome: ToolOutcome, at: SystemTime) {
        self.count = self.count.saturating_add(1);
        self.last_used = at;
        self.last_outcome = outcome;
    }
}
