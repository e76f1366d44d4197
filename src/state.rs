//! Persistent assistant state
//!
//! A small key-value document (conversation history, tasks, preferences,
//! session bookkeeping) serialized as one JSON blob. Every mutation is
//! written through to disk.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Local};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::tasks::Task;
use crate::{Error, Result};

/// Default state file name inside the data directory
pub const STATE_FILE: &str = "assistant_state.json";

/// Maximum number of conversation messages kept
pub const MAX_HISTORY: usize = 50;

/// Who said a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    /// Label used when rendering conversation context
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Model => "Assistant",
        }
    }
}

/// A message in the conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Local>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ConversationMessage {
    /// Create a message stamped with the current time
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Local::now(),
            metadata: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    #[must_use]
    pub fn model(content: impl Into<String>) -> Self {
        Self::new(Role::Model, content)
    }
}

/// Serialized state document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StateData {
    pub conversation_history: Vec<ConversationMessage>,
    pub tasks: BTreeMap<String, Task>,
    pub user_preferences: serde_json::Map<String, serde_json::Value>,
    pub session_count: u64,
    pub last_active: Option<DateTime<Local>>,
}

/// File-backed state store shared by the controller and task manager
#[derive(Debug)]
pub struct StateManager {
    path: PathBuf,
    data: Mutex<StateData>,
}

impl StateManager {
    /// Open the state file, falling back to defaults if it is missing or unreadable
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = match load(&path) {
            Ok(Some(data)) => {
                tracing::info!(
                    path = %path.display(),
                    messages = data.conversation_history.len(),
                    tasks = data.tasks.len(),
                    "state loaded"
                );
                data
            }
            Ok(None) => StateData::default(),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "failed to load state");
                StateData::default()
            }
        };

        Self {
            path,
            data: Mutex::new(data),
        }
    }

    /// Path of the backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, StateData> {
        // A poisoned lock still holds consistent data: every writer replaces whole fields
        self.data
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Persist the current state
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn save(&self) -> Result<()> {
        let mut data = self.lock();
        data.last_active = Some(Local::now());
        let result = write_atomic(&self.path, &data);
        drop(data);

        match &result {
            Ok(()) => tracing::debug!(path = %self.path.display(), "state saved"),
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "failed to save state");
            }
        }
        result
    }

    /// Apply a mutation and write the result through to disk
    fn update<F: FnOnce(&mut StateData)>(&self, f: F) -> Result<()> {
        f(&mut self.lock());
        self.save()
    }

    /// Append to the conversation history, keeping the newest messages
    ///
    /// # Errors
    ///
    /// Returns error if the state cannot be saved
    pub fn update_conversation(&self, message: ConversationMessage) -> Result<()> {
        self.update(|data| {
            data.conversation_history.push(message);
            let len = data.conversation_history.len();
            if len > MAX_HISTORY {
                data.conversation_history.drain(..len - MAX_HISTORY);
            }
        })
    }

    /// Full conversation history, oldest first
    #[must_use]
    pub fn conversation_history(&self) -> Vec<ConversationMessage> {
        self.lock().conversation_history.clone()
    }

    /// The last `n` messages, oldest first
    #[must_use]
    pub fn recent_messages(&self, n: usize) -> Vec<ConversationMessage> {
        let data = self.lock();
        let start = data.conversation_history.len().saturating_sub(n);
        data.conversation_history[start..].to_vec()
    }

    /// Snapshot of the persisted task table
    #[must_use]
    pub fn tasks(&self) -> BTreeMap<String, Task> {
        self.lock().tasks.clone()
    }

    /// Replace the persisted task table
    ///
    /// # Errors
    ///
    /// Returns error if the state cannot be saved
    pub fn set_tasks(&self, tasks: BTreeMap<String, Task>) -> Result<()> {
        self.update(|data| data.tasks = tasks)
    }

    /// Read a user preference
    #[must_use]
    pub fn preference<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.lock().user_preferences.get(key).cloned()?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(key, error = %e, "ignoring malformed preference");
                None
            }
        }
    }

    /// Store a user preference
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized or saved
    pub fn set_preference<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.update(|data| {
            data.user_preferences.insert(key.to_string(), value);
        })
    }

    /// Record the start of a new session, returning the session number
    ///
    /// # Errors
    ///
    /// Returns error if the state cannot be saved
    pub fn begin_session(&self) -> Result<u64> {
        let mut count = 0;
        self.update(|data| {
            data.session_count += 1;
            count = data.session_count;
        })?;
        Ok(count)
    }

    #[must_use]
    pub fn session_count(&self) -> u64 {
        self.lock().session_count
    }

    #[must_use]
    pub fn last_active(&self) -> Option<DateTime<Local>> {
        self.lock().last_active
    }
}

fn load(path: &Path) -> Result<Option<StateData>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}

/// Write through a sibling temp file and rename it over the target
fn write_atomic(path: &Path, data: &StateData) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut file, data)?;
    file.flush()?;
    file.persist(path)
        .map_err(|e| Error::State(format!("failed to replace {}: {}", path.display(), e.error)))?;
    Ok(())
}
