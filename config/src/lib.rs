//! Configuration for Keel.
//!
//! Settings live in `~/.keel/config.toml`:
//!
//! ```toml
//! [context]
//! max_messages = 20
//! min_turns_to_keep = 2
//!
//! [compaction]
//! approaching_percent = 80.0
//! target_percent = 60.0
//!
//! [model]
//! default = "claude-sonnet-4-5"
//!
//! [models."local-llm"]
//! context_window = 32768
//! max_output = 4096
//!
//! [prompt]
//! system_prompt_path = "${HOME}/.keel/system.md"
//! ```

mod cached_text;

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use keel_context::{CompactionConfig, ContextManagerConfig, ModelLimits, ModelRegistry};

pub use cached_text::CachedText;

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct KeelConfig {
    pub context: ContextManagerConfig,
    pub compaction: CompactionConfig,
    pub model: ModelConfig,
    /// Per-model limit overrides keyed by exact model id.
    pub models: BTreeMap<String, ModelOverride>,
    pub prompt: PromptConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model used when a request names none.
    pub default: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            default: DEFAULT_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ModelOverride {
    pub context_window: u32,
    pub max_output: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// `${VAR}` references are expanded from the environment.
    pub system_prompt_path: Option<String>,
}

impl KeelConfig {
    /// Config from the default location.
    ///
    /// A missing file yields defaults. An unreadable or invalid file is
    /// logged and also yields defaults.
    #[must_use]
    pub fn load() -> Self {
        let Some(path) = config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!("{err}; using default configuration");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    /// Built-in catalog plus the `[models]` overrides.
    #[must_use]
    pub fn model_registry(&self) -> ModelRegistry {
        let mut registry = ModelRegistry::new();
        for (model, limits) in &self.models {
            registry.set_override(
                model.clone(),
                ModelLimits::new(limits.context_window, limits.max_output),
            );
        }
        registry
    }

    #[must_use]
    pub fn system_prompt_path(&self) -> Option<PathBuf> {
        self.prompt
            .system_prompt_path
            .as_deref()
            .map(|raw| PathBuf::from(expand_env_vars(raw)))
    }
}

/// Replace `${VAR}` with the variable's value; unset variables expand to nothing.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let var = &after[..end];
                if !var.is_empty() {
                    out.push_str(&env::var(var).unwrap_or_default());
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);

    out
}

fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".keel").join("config.toml"))
}
