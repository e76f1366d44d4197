//! Task records

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Free-form task metadata
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Kind of task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Timer,
    Reminder,
    Note,
    Calendar,
    Lookup,
    Weather,
    General,
}

impl TaskType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timer => "timer",
            Self::Reminder => "reminder",
            Self::Note => "note",
            Self::Calendar => "calendar",
            Self::Lookup => "lookup",
            Self::Weather => "weather",
            Self::General => "general",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A timer, reminder, note or other tracked item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub content: String,
    #[serde(default)]
    pub scheduled_time: Option<DateTime<Local>>,
    #[serde(default)]
    pub completed: bool,
    pub created_at: DateTime<Local>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Task {
    /// Create a pending task with a fresh id
    pub fn new(task_type: TaskType, content: impl Into<String>) -> Self {
        Self {
            id: format!("task_{}", uuid::Uuid::new_v4().simple()),
            task_type,
            content: content.into(),
            scheduled_time: None,
            completed: false,
            created_at: Local::now(),
            metadata: Metadata::new(),
        }
    }

    #[must_use]
    pub const fn scheduled_at(mut self, when: Option<DateTime<Local>>) -> Self {
        self.scheduled_time = when;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Pending and scheduled at or before `now`
    #[must_use]
    pub fn is_due(&self, now: DateTime<Local>) -> bool {
        !self.completed && self.scheduled_time.is_some_and(|t| t <= now)
    }
}
