//! Session-level stats and compaction operations.
//!
//! [`ContextService`] is the operation surface an outer transport calls:
//! load the session, run the pure transform, save the result. Compaction on
//! one session is serialized by a per-session lock; different sessions never
//! contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use serde::Deserialize;
use thiserror::Error;

use keel_types::{Message, SessionId};

use crate::compaction::{
    CompactOptions, CompactionPolicy, CompactionResult, ContextStats,
};
use crate::estimator::{EstimateError, TokenEstimator};
use crate::extraction::EntityExtractor;
use crate::settings::{CompactionConfig, ContextManagerConfig};
use crate::store::{PersistenceError, SessionSnapshot, SessionStore};
use crate::working_memory::WorkingMemory;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("token estimation failed: {0}")]
    Estimation(#[from] EstimateError),
    #[error("session persistence failed: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Body of a compaction request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompactRequest {
    pub model_id: Option<String>,
    pub force: bool,
}

/// Per-session lock registry. Entries live only while some caller holds them.
#[derive(Debug, Default)]
struct SessionLocks {
    locks: HashMap<SessionId, Arc<Mutex<()>>>,
}

impl SessionLocks {
    fn get(&mut self, session_id: &SessionId) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(session_id.clone()).or_default())
    }

    /// Forget the session's lock once the caller's handle is the last one outside the map.
    fn release(&mut self, session_id: &SessionId, lock: &Arc<Mutex<()>>) {
        let registered = self
            .locks
            .get(session_id)
            .is_some_and(|held| Arc::ptr_eq(held, lock));
        if registered && Arc::strong_count(lock) == 2 {
            self.locks.remove(session_id);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

pub struct ContextService<S, E> {
    store: S,
    estimator: E,
    context: ContextManagerConfig,
    compaction: CompactionConfig,
    default_model: String,
    extractor: EntityExtractor,
    session_locks: Mutex<SessionLocks>,
}

impl<S: SessionStore, E: TokenEstimator> ContextService<S, E> {
    pub fn new(store: S, estimator: E, default_model: impl Into<String>) -> Self {
        Self {
            store,
            estimator,
            context: ContextManagerConfig::default(),
            compaction: CompactionConfig::default(),
            default_model: default_model.into(),
            extractor: EntityExtractor::default(),
            session_locks: Mutex::new(SessionLocks::default()),
        }
    }

    #[must_use]
    pub fn with_context_config(mut self, context: ContextManagerConfig) -> Self {
        self.context = context;
        self
    }

    #[must_use]
    pub fn with_compaction_config(mut self, compaction: CompactionConfig) -> Self {
        self.compaction = compaction;
        self
    }

    #[must_use]
    pub fn with_extractor(mut self, extractor: EntityExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn context_stats(
        &self,
        session_id: &SessionId,
        model_id: Option<&str>,
    ) -> Result<ContextStats, ContextError> {
        let snapshot = self.store.load(session_id)?;
        let model_id = model_id.unwrap_or(&self.default_model);
        Ok(self.policy().compute_stats(&snapshot.messages, model_id)?)
    }

    /// Load, compact, and save one session while holding its lock.
    ///
    /// Nothing is written when compaction is skipped or fails.
    pub fn compact(
        &self,
        session_id: &SessionId,
        request: &CompactRequest,
    ) -> Result<CompactionResult, ContextError> {
        self.with_session_lock(session_id, || self.compact_locked(session_id, request))
    }

    fn compact_locked(
        &self,
        session_id: &SessionId,
        request: &CompactRequest,
    ) -> Result<CompactionResult, ContextError> {
        let snapshot = self.store.load(session_id)?;
        let memory = WorkingMemory::from_state(snapshot.working_memory);
        let options = CompactOptions {
            model_id: request.model_id.as_deref().unwrap_or(&self.default_model),
            force: request.force,
        };

        let outcome = self.policy().compact(snapshot.messages, memory, options)?;

        if outcome.result.compacted {
            let compacted = SessionSnapshot {
                messages: outcome.messages,
                working_memory: outcome.memory.to_state(),
            };
            self.store.save(session_id, &compacted)?;
        }
        Ok(outcome.result)
    }

    /// Fold the latest turn's tool activity into the session's working memory.
    ///
    /// Called tools become discovered tools; each result records usage and
    /// contributes extracted entities. Returns the number of results observed.
    pub fn observe_latest_turn(
        &self,
        session_id: &SessionId,
        at: SystemTime,
    ) -> Result<usize, ContextError> {
        self.with_session_lock(session_id, || self.observe_locked(session_id, at))
    }

    fn observe_locked(&self, session_id: &SessionId, at: SystemTime) -> Result<usize, ContextError> {
        let snapshot = self.store.load(session_id)?;
        let start = snapshot
            .messages
            .iter()
            .rposition(|message| matches!(message, Message::User(_)))
            .unwrap_or(0);

        let mut memory = WorkingMemory::from_state(snapshot.working_memory);
        let mut observed = 0;
        for message in &snapshot.messages[start..] {
            memory.add_discovered_tools(message.tool_calls().iter().map(|call| call.name.clone()));
            for result in message.tool_results() {
                memory.observe_tool_result(result, &self.extractor, at);
                observed += 1;
            }
        }

        let updated = SessionSnapshot {
            messages: snapshot.messages,
            working_memory: memory.to_state(),
        };
        self.store.save(session_id, &updated)?;
        tracing::debug!(session = %session_id, observed, "Observed latest turn");
        Ok(observed)
    }

    /// Working-memory prompt text for a session.
    pub fn render_working_memory(&self, session_id: &SessionId) -> Result<String, ContextError> {
        let snapshot = self.store.load(session_id)?;
        Ok(WorkingMemory::from_state(snapshot.working_memory).render_context())
    }

    fn policy(&self) -> CompactionPolicy<'_, E> {
        CompactionPolicy::new(&self.estimator, self.context, self.compaction)
    }

    /// Run `f` while holding the session's lock.
    fn with_session_lock<T>(&self, session_id: &SessionId, f: impl FnOnce() -> T) -> T {
        let lock = self
            .session_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id);

        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        self.session_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .release(session_id, &lock);
        result
    }

    #[cfg(test)]
    fn tracked_sessions(&self) -> usize {
        self.session_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
