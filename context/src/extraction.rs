//! Entity extraction from tool results.
//!
//! A tool result payload is first classified into a [`ResultShape`]. An
//! ordered list of [`ExtractionRule`]s is then tried against the tool name;
//! the first rule whose pattern matches decides the entity type. When no rule
//! matches, a resource's own `type` field is used if present.

use std::time::SystemTime;

use serde_json::{Map, Value};

use keel_types::Entity;

/// Array keys that wrap collections in list-style responses.
const COLLECTION_KEYS: &[&str] = &["items", "data", "results"];
/// Keys tried in order for an entity's display name.
const NAME_KEYS: &[&str] = &["name", "title", "filename", "label"];
/// Entities taken from one collection result.
const MAX_FROM_COLLECTION: usize = 5;

/// Structural classification of a tool result payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResultShape<'a> {
    /// A single object carrying an `id`.
    Resource(&'a Map<String, Value>),
    /// A list of objects, bare or wrapped under a known key.
    Collection(&'a [Value]),
    /// Anything else: strings, numbers, objects without ids.
    Opaque,
}

impl<'a> ResultShape<'a> {
    #[must_use]
    pub fn classify(value: &'a Value) -> Self {
        match value {
            Value::Array(items) => ResultShape::Collection(items),
            Value::Object(map) if map.contains_key("id") => ResultShape::Resource(map),
            Value::Object(map) => COLLECTION_KEYS
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_array))
                .map_or(ResultShape::Opaque, |items| ResultShape::Collection(items)),
            _ => ResultShape::Opaque,
        }
    }
}

/// How a rule matches a tool name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolPattern {
    Exact(String),
    Prefix(String),
    Contains(String),
}

impl ToolPattern {
    #[must_use]
    pub fn matches(&self, tool_name: &str) -> bool {
        match self {
            ToolPattern::Exact(name) => tool_name == name,
            ToolPattern::Prefix(prefix) => tool_name.starts_with(prefix.as_str()),
            ToolPattern::Contains(needle) => tool_name.contains(needle.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRule {
    pub pattern: ToolPattern,
    pub entity_type: String,
}

impl ExtractionRule {
    pub fn contains(needle: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            pattern: ToolPattern::Contains(needle.into()),
            entity_type: entity_type.into(),
        }
    }
}

/// Ordered rule list; earlier rules take priority.
#[derive(Debug, Clone)]
pub struct EntityExtractor {
    rules: Vec<ExtractionRule>,
}

impl Default for EntityExtractor {
    fn default() -> Self {
        // "section" before "page" so `update_page_section` yields a section.
        Self::new(vec![
            ExtractionRule::contains("section", "section"),
            ExtractionRule::contains("page", "page"),
            ExtractionRule::contains("image", "image"),
            ExtractionRule::contains("media", "image"),
            ExtractionRule::contains("collection", "collection"),
            ExtractionRule::contains("entry", "entry"),
            ExtractionRule::contains("post", "post"),
        ])
    }
}

impl EntityExtractor {
    #[must_use]
    pub fn new(rules: Vec<ExtractionRule>) -> Self {
        Self { rules }
    }

    /// Type assigned by the first matching rule, if any.
    #[must_use]
    pub fn entity_type_for(&self, tool_name: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| rule.pattern.matches(tool_name))
            .map(|rule| rule.entity_type.as_str())
    }

    /// Entities identifiable in `output`, in payload order.
    #[must_use]
    pub fn extract(&self, tool_name: &str, output: &Value, now: SystemTime) -> Vec<Entity> {
        let rule_type = self.entity_type_for(tool_name);
        match ResultShape::classify(output) {
            ResultShape::Resource(map) => entity_from(map, rule_type, now).into_iter().collect(),
            ResultShape::Collection(items) => items
                .iter()
                .filter_map(Value::as_object)
                .filter_map(|map| entity_from(map, rule_type, now))
                .take(MAX_FROM_COLLECTION)
                .collect(),
            ResultShape::Opaque => Vec::new(),
        }
    }
}

fn entity_from(
    map: &Map<String, Value>,
    rule_type: Option<&str>,
    now: SystemTime,
) -> Option<Entity> {
    let id = match map.get("id")? {
        Value::String(id) if !id.is_empty() => id.clone(),
        Value::Number(id) => id.to_string(),
        _ => return None,
    };
    let entity_type = rule_type
        .map(str::to_string)
        .or_else(|| string_field(map, &["type", "kind"]))?;
    let name = string_field(map, NAME_KEYS).unwrap_or_else(|| id.clone());

    let entity = Entity::new(entity_type, id, name, now);
    Some(match string_field(map, &["slug"]) {
        Some(slug) => entity.with_slug(slug),
        None => entity,
    })
}

fn string_field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| map.get(*key).and_then(Value::as_str))
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
