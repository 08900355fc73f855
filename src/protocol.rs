//! Shared protocol constants and message types for the taskwire framed transport

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::task::{Task, TaskDraft, TaskFilter, TaskId};

// Protocol header constants
pub const MAGIC: &[u8; 4] = b"TSKW";
pub const VERSION: u16 = 1;

// MAGIC (4) | VERSION (2) | KIND (1) | LENGTH (4)
pub const HEADER_LEN: usize = 11;

// Maximum frame payload size (16MB) - prevents DoS via memory exhaustion.
// Attachment blocks are tiny; the bound is sized for large LIST replies.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

// Attachment bodies travel in blocks of this size; not negotiated
pub const BLOCK_SIZE: usize = 4096;

pub const DEFAULT_PORT: u16 = 5050;

/// Message discriminant carried in the frame header.
/// Keep numeric values stable: they are the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    List = 1,
    Filter = 2,
    Create = 3,
    Delete = 4,
    UploadFile = 5,
    DownloadFile = 6,
    ChangeState = 7,
    Response = 8,
    Error = 9,
    Close = 10,
}

impl MessageKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => MessageKind::List,
            2 => MessageKind::Filter,
            3 => MessageKind::Create,
            4 => MessageKind::Delete,
            5 => MessageKind::UploadFile,
            6 => MessageKind::DownloadFile,
            7 => MessageKind::ChangeState,
            8 => MessageKind::Response,
            9 => MessageKind::Error,
            10 => MessageKind::Close,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::List => "LIST",
            MessageKind::Filter => "FILTER",
            MessageKind::Create => "CREATE",
            MessageKind::Delete => "DELETE",
            MessageKind::UploadFile => "UPLOAD_FILE",
            MessageKind::DownloadFile => "DOWNLOAD_FILE",
            MessageKind::ChangeState => "CHANGE_STATE",
            MessageKind::Response => "RESPONSE",
            MessageKind::Error => "ERROR",
            MessageKind::Close => "CLOSE",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// UPLOAD_FILE sub-protocol:
// Client sends: Start (task id + local file name), Block, Block, ..., End
// Server responds once: RESPONSE(Flag(true)) or ERROR
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadFile {
    Start { task_id: TaskId, file_name: String },
    Block(Vec<u8>),
    /// Terminates the block stream; carries no data
    End,
}

// DOWNLOAD_FILE sub-protocol:
// Client sends: Request
// Server responds: Block, Block, ..., End  (or a single ERROR)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadFile {
    Request { task_id: TaskId },
    Block(Vec<u8>),
    End,
}

/// Result payload of a RESPONSE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    Tasks(Vec<Task>),
    Task(Task),
    Flag(bool),
    Empty,
}

/// One wire message. Each variant carries exactly the payload its kind needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    List,
    Filter(TaskFilter),
    Create(TaskDraft),
    Delete { task_id: TaskId },
    UploadFile(UploadFile),
    DownloadFile(DownloadFile),
    ChangeState { task_id: TaskId, completed: bool },
    Response(Reply),
    Error { message: String },
    Close,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::List => MessageKind::List,
            Message::Filter(_) => MessageKind::Filter,
            Message::Create(_) => MessageKind::Create,
            Message::Delete { .. } => MessageKind::Delete,
            Message::UploadFile(_) => MessageKind::UploadFile,
            Message::DownloadFile(_) => MessageKind::DownloadFile,
            Message::ChangeState { .. } => MessageKind::ChangeState,
            Message::Response(_) => MessageKind::Response,
            Message::Error { .. } => MessageKind::Error,
            Message::Close => MessageKind::Close,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Message::Error {
            message: message.into(),
        }
    }

    pub fn flag(v: bool) -> Self {
        Message::Response(Reply::Flag(v))
    }
}

// Canonical ERROR texts sent by the server
pub mod errors {
    pub const TASK_NOT_FOUND: &str = "task not found";
    pub const FILE_NOT_FOUND: &str = "file not found";
    pub const UNKNOWN_REQUEST: &str = "unknown request type";
}
