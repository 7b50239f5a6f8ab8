//! Keel CLI - inspect and compact agent session context.
//!
//! Each command works on one session file (`<dir>/<session-id>.json`) and
//! prints JSON to stdout:
//!
//! ```text
//! keel stats   <session-file> [--model ID]          -> ContextStats
//! keel compact <session-file> [--model ID] [--force] -> CompactionResult (session saved)
//! keel observe <session-file>                       -> results folded into working memory
//! keel prompt  <session-file>                       -> system prompt + working memory text
//! ```
//!
//! Logs go to a file so stdout stays machine-readable.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use keel_config::{CachedText, KeelConfig};
use keel_context::{
    CompactRequest, ContextService, FileSessionStore, SessionStore, TiktokenEstimator,
};
use keel_types::SessionId;

#[derive(Parser, Debug)]
#[command(name = "keel", version, about = "Inspect and compact agent session context")]
struct Cli {
    /// Config file to use instead of ~/.keel/config.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print token usage for a session.
    Stats {
        session: PathBuf,
        #[arg(long)]
        model: Option<String>,
    },
    /// Compact a session and save the result.
    Compact {
        session: PathBuf,
        #[arg(long)]
        model: Option<String>,
        /// Compact even when usage is below the approaching threshold.
        #[arg(long)]
        force: bool,
    },
    /// Fold the latest turn's tool results into working memory.
    Observe { session: PathBuf },
    /// Print the system prompt followed by the rendered working memory.
    Prompt { session: PathBuf },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ObserveReport {
    observed_results: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = match &cli.config {
        Some(path) => KeelConfig::load_from(path)?,
        None => KeelConfig::load(),
    };

    match cli.command {
        Command::Stats { session, model } => {
            let (service, id) = open_session(&config, &session)?;
            let stats = service.context_stats(&id, model.as_deref())?;
            print_json(&stats)
        }
        Command::Compact {
            session,
            model,
            force,
        } => {
            let (service, id) = open_session(&config, &session)?;
            let result = service.compact(
                &id,
                &CompactRequest {
                    model_id: model,
                    force,
                },
            )?;
            print_json(&result)
        }
        Command::Observe { session } => {
            let (service, id) = open_session(&config, &session)?;
            let observed_results = service.observe_latest_turn(&id, SystemTime::now())?;
            print_json(&ObserveReport { observed_results })
        }
        Command::Prompt { session } => {
            let (service, id) = open_session(&config, &session)?;
            let system_prompt = match config.system_prompt_path() {
                Some(path) => CachedText::new(path).get()?.to_string(),
                None => service
                    .store()
                    .load(&id)?
                    .messages
                    .first()
                    .filter(|message| message.role() == keel_types::Role::System)
                    .map(|message| message.content().to_string())
                    .unwrap_or_default(),
            };
            let memory = service.render_working_memory(&id)?;
            println!("{}", assemble_prompt(&system_prompt, &memory));
            Ok(())
        }
    }
}

fn open_session(
    config: &KeelConfig,
    session: &Path,
) -> Result<(ContextService<FileSessionStore, TiktokenEstimator>, SessionId)> {
    let (store, id) = FileSessionStore::for_file(session)
        .ok_or_else(|| anyhow!("not a session file path: {}", session.display()))?;
    let estimator = TiktokenEstimator::new(config.model_registry())
        .context("failed to initialize the token estimator")?;
    let service = ContextService::new(store, estimator, config.model.default.clone())
        .with_context_config(config.context)
        .with_compaction_config(config.compaction);
    Ok((service, id))
}

fn assemble_prompt(system_prompt: &str, memory: &str) -> String {
    match (system_prompt.trim_end(), memory.trim_end()) {
        ("", memory) => memory.to_string(),
        (system, "") => system.to_string(),
        (system, memory) => format!("{system}\n\n{memory}"),
    }
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_keel_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::debug!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // Without a log file, log nothing rather than mixing logs into JSON output.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_keel_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in keel_log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn keel_log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.keel/logs/keel.log
    if let Some(config_path) = KeelConfig::path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("keel.log"));
    }

    // Fallback: ./.keel/logs/keel.log
    candidates.push(PathBuf::from(".keel").join("logs").join("keel.log"));

    candidates
}
