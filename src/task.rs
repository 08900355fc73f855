//! Task records and the filters applied to them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Server-assigned task identifier. Never reused, even after deletion.
pub type TaskId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Priority {
    High = 1,
    Medium = 2,
    Low = 3,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Priority::High),
            2 => Ok(Priority::Medium),
            3 => Ok(Priority::Low),
            _ => Err(format!("priority out of range: {} (expected 1-3)", v)),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::High => write!(f, "High"),
            Priority::Medium => write!(f, "Medium"),
            Priority::Low => write!(f, "Low"),
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "high" | "h" => Ok(Priority::High),
            "2" | "medium" | "m" => Ok(Priority::Medium),
            "3" | "low" | "l" => Ok(Priority::Low),
            other => Err(format!("unknown priority: {} (use 1-3 or high/medium/low)", other)),
        }
    }
}

/// A task as stored by the server and returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: Priority,
    pub completed: bool,
    /// Set only once an upload has fully completed.
    pub has_attachment: bool,
}

impl Task {
    /// Materialize a draft under a freshly minted id.
    pub fn from_draft(id: TaskId, draft: TaskDraft) -> Self {
        Self {
            id,
            description: draft.description,
            due_date: draft.due_date,
            priority: draft.priority,
            completed: false,
            has_attachment: false,
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let due = self
            .due_date
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "#{} {} [priority={} due={} completed={} attachment={}]",
            self.id, self.description, self.priority, due, self.completed, self.has_attachment
        )
    }
}

/// Client-supplied fields of a CREATE request. Carries no id: the server
/// always mints one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDraft {
    pub description: String,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: Priority,
}

impl TaskDraft {
    pub fn new(description: impl Into<String>, due_date: Option<DateTime<Utc>>, priority: Priority) -> Self {
        Self {
            description: description.into(),
            due_date,
            priority,
        }
    }
}

/// Conjunctive FILTER criteria. `None` means "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFilter {
    pub completed: Option<bool>,
    pub priority: Option<Priority>,
    /// Inclusive upper bound on the due date.
    pub max_due_date: Option<DateTime<Utc>>,
}

impl TaskFilter {
    pub fn is_empty(&self) -> bool {
        self.completed.is_none() && self.priority.is_none() && self.max_due_date.is_none()
    }

    pub fn matches(&self, task: &Task) -> bool {
        if let Some(completed) = self.completed {
            if task.completed != completed {
                return false;
            }
        }
        if let Some(priority) = self.priority {
            if task.priority != priority {
                return false;
            }
        }
        if let Some(max_due) = self.max_due_date {
            // A task without a due date never satisfies a due-date bound
            match task.due_date {
                Some(due) if due <= max_due => {}
                _ => return false,
            }
        }
        true
    }

    pub fn apply(&self, tasks: Vec<Task>) -> Vec<Task> {
        tasks.into_iter().filter(|t| self.matches(t)).collect()
    }
}
