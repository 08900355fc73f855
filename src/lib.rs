//! Taskwire: a multi-client task tracker served over a framed TCP protocol
//!
//! The server keeps tasks in memory and stores one attachment per task on
//! disk. Clients drive it with request/response frames; attachments travel as
//! a chunked sub-protocol of fixed-size blocks.

pub mod cli;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod file_store;
pub mod handler;
pub mod logging;
pub mod protocol;
pub mod repository;
pub mod server;
pub mod task;

pub use client::TaskClient;
pub use error::{Error, ProtocolError, Result};
pub use server::ServerState;
pub use task::{Priority, Task, TaskDraft, TaskFilter, TaskId};
