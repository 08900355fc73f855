//! Clap definitions for `taskwired` and `taskwire`, plus the value parsers
//! they share

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;

use crate::task::{Priority, TaskFilter, TaskId};

/// Task tracker server
#[derive(Clone, Debug, Parser)]
#[command(name = "taskwired", version)]
pub struct ServerOpts {
    /// TOML config file (keys: bind, storage_dir)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Bind address (host:port) [default: 0.0.0.0:5050]
    #[arg(long, env = "TASKWIRE_BIND")]
    pub bind: Option<String>,

    /// Directory holding task attachments [default: ./attachments]
    #[arg(long, env = "TASKWIRE_STORAGE_DIR")]
    pub storage_dir: Option<PathBuf>,
}

/// Task tracker client
#[derive(Clone, Debug, Parser)]
#[command(name = "taskwire", version)]
pub struct ClientOpts {
    /// Server address (host:port) [default: 127.0.0.1:5050]
    #[arg(long, global = true, env = "TASKWIRE_SERVER")]
    pub server: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// List every task
    List,
    /// List tasks matching all given conditions
    #[command(group(ArgGroup::new("state").args(["pending", "completed"])))]
    Filter {
        #[arg(long)]
        pending: bool,
        #[arg(long)]
        completed: bool,
        #[arg(long, value_parser = parse_priority)]
        priority: Option<Priority>,
        /// Due at or before this time
        #[arg(long, value_parser = parse_due)]
        due_before: Option<DateTime<Utc>>,
    },
    /// Create a task
    Create {
        description: String,
        #[arg(long, value_parser = parse_due)]
        due: Option<DateTime<Utc>>,
        #[arg(long, value_parser = parse_priority, default_value = "medium")]
        priority: Priority,
    },
    /// Delete a task and its attachment
    Delete { id: TaskId },
    /// Mark a task completed
    Done { id: TaskId },
    /// Mark a task pending again
    Undo { id: TaskId },
    /// Attach a file to a task, replacing any earlier one
    Upload { id: TaskId, path: PathBuf },
    /// Save a task's attachment to a local file
    Download { id: TaskId, dest: PathBuf },
}

impl Command {
    /// The filter described by `filter` flags; `None` for other commands.
    pub fn task_filter(&self) -> Option<TaskFilter> {
        match self {
            Command::Filter {
                pending,
                completed,
                priority,
                due_before,
            } => Some(TaskFilter {
                completed: match (*pending, *completed) {
                    (true, _) => Some(false),
                    (_, true) => Some(true),
                    _ => None,
                },
                priority: *priority,
                max_due_date: *due_before,
            }),
            _ => None,
        }
    }
}

pub fn parse_priority(s: &str) -> Result<Priority, String> {
    s.parse()
}

/// RFC 3339, or `YYYY-MM-DD` / `YYYY-MM-DD HH:MM` taken as UTC. A bare date
/// means the end of that day.
pub fn parse_due(s: &str) -> Result<DateTime<Utc>, String> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("invalid date: {} (use RFC 3339 or YYYY-MM-DD[ HH:MM])", s))
}
