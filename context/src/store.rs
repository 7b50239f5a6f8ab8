//! Session persistence.
//!
//! The context manager only touches storage at call boundaries, through the
//! [`SessionStore`] trait. [`FileSessionStore`] keeps one JSON document per
//! session and writes it atomically.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use keel_types::{DecodeError, Message, SessionId, decode_message};
use keel_utils::{atomic_write, recover_bak_file};

use crate::working_memory::WorkingMemoryState;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("session `{0}` not found")]
    NotFound(SessionId),
    #[error("session id `{0}` cannot be used as a file name")]
    InvalidSessionId(SessionId),
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid session data in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid message in {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },
}

/// Everything persisted for one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub working_memory: WorkingMemoryState,
}

pub trait SessionStore {
    fn load(&self, session_id: &SessionId) -> Result<SessionSnapshot, PersistenceError>;

    fn save(&self, session_id: &SessionId, snapshot: &SessionSnapshot)
    -> Result<(), PersistenceError>;
}

/// Stored messages are read in our own format first; anything else is
/// decoded as a provider-style payload.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredMessage {
    Native(Message),
    Wire(Value),
}

#[derive(Deserialize)]
struct StoredSnapshot {
    messages: Vec<StoredMessage>,
    #[serde(default)]
    working_memory: WorkingMemoryState,
}

/// `<dir>/<session-id>.json` per session.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted at the file's directory, and the session id its stem names.
    #[must_use]
    pub fn for_file(path: &Path) -> Option<(Self, SessionId)> {
        let stem = path.file_stem()?.to_str()?;
        let dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Some((Self::new(dir), SessionId::new(stem)))
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, session_id: &SessionId) -> Result<PathBuf, PersistenceError> {
        let id = session_id.as_str();
        let usable = !id.is_empty()
            && id != "."
            && id != ".."
            && !id.contains(['/', '\\'])
            && !id.contains('\0');
        if !usable {
            return Err(PersistenceError::InvalidSessionId(session_id.clone()));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self, session_id: &SessionId) -> Result<SessionSnapshot, PersistenceError> {
        let path = self.path_for(session_id)?;
        if recover_bak_file(&path) {
            tracing::warn!(path = %path.display(), "Recovered session file from backup");
        }

        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(PersistenceError::NotFound(session_id.clone()));
            }
            Err(source) => return Err(PersistenceError::Io { path, source }),
        };

        let stored: StoredSnapshot = serde_json::from_str(&raw)
            .map_err(|source| PersistenceError::Json {
                path: path.clone(),
                source,
            })?;

        let messages = stored
            .messages
            .into_iter()
            .enumerate()
            .map(|(index, message)| match message {
                StoredMessage::Native(message) => Ok(message),
                StoredMessage::Wire(value) => decode_message(index, value),
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| PersistenceError::Decode {
                path: path.clone(),
                source,
            })?;

        tracing::debug!(session = %session_id, messages = messages.len(), "Loaded session");
        Ok(SessionSnapshot {
            messages,
            working_memory: stored.working_memory,
        })
    }

    fn save(
        &self,
        session_id: &SessionId,
        snapshot: &SessionSnapshot,
    ) -> Result<(), PersistenceError> {
        let path = self.path_for(session_id)?;
        let json = serde_json::to_vec_pretty(snapshot).map_err(|source| PersistenceError::Json {
            path: path.clone(),
            source,
        })?;

        fs::create_dir_all(&self.dir).map_err(|source| PersistenceError::Io {
            path: self.dir.clone(),
            source,
        })?;
        atomic_write(&path, &json).map_err(|source| PersistenceError::Io {
            path: path.clone(),
            source,
        })?;

        tracing::debug!(session = %session_id, messages = snapshot.messages.len(), "Saved session");
        Ok(())
    }
}
