//! Client session: one TCP connection, one request in flight at a time

use std::path::Path;

use tokio::fs;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use crate::codec::Connection;
use crate::error::{Error, Result};
use crate::file_store::read_block;
use crate::protocol::{DownloadFile, Message, MessageKind, Reply, UploadFile, BLOCK_SIZE};
use crate::task::{Task, TaskDraft, TaskFilter, TaskId};

pub struct TaskClient<R = OwnedReadHalf, W = OwnedWriteHalf> {
    conn: Connection<R, W>,
}

impl TaskClient {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        debug!(addr, "connected");
        Ok(Self::new(Connection::from_tcp(stream)))
    }
}

impl<R, W> TaskClient<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(conn: Connection<R, W>) -> Self {
        Self { conn }
    }

    async fn read_reply(&mut self, expected: &'static str) -> Result<Reply> {
        match self.conn.recv().await? {
            Message::Response(reply) => Ok(reply),
            Message::Error { message } => Err(Error::Remote(message)),
            other => Err(Error::UnexpectedReply {
                expected,
                got: other.kind(),
            }),
        }
    }

    async fn request_tasks(&mut self, msg: Message) -> Result<Vec<Task>> {
        self.conn.send(&msg).await?;
        match self.read_reply("task list").await? {
            Reply::Tasks(tasks) => Ok(tasks),
            _ => Err(Error::UnexpectedReply {
                expected: "task list",
                got: MessageKind::Response,
            }),
        }
    }

    async fn request_flag(&mut self, msg: Message) -> Result<bool> {
        self.conn.send(&msg).await?;
        match self.read_reply("flag").await? {
            Reply::Flag(flag) => Ok(flag),
            _ => Err(Error::UnexpectedReply {
                expected: "flag",
                got: MessageKind::Response,
            }),
        }
    }

    /// All tasks in ascending id order.
    pub async fn list(&mut self) -> Result<Vec<Task>> {
        self.request_tasks(Message::List).await
    }

    pub async fn filter(&mut self, filter: &TaskFilter) -> Result<Vec<Task>> {
        self.request_tasks(Message::Filter(filter.clone())).await
    }

    pub async fn create(&mut self, draft: TaskDraft) -> Result<bool> {
        self.request_flag(Message::Create(draft)).await
    }

    /// Succeeds whether or not the task existed.
    pub async fn delete(&mut self, task_id: TaskId) -> Result<bool> {
        self.request_flag(Message::Delete { task_id }).await
    }

    /// The server never answers CHANGE_STATE, so this returns as soon as the
    /// frame is flushed.
    pub async fn change_state(&mut self, task_id: TaskId, completed: bool) -> Result<()> {
        self.conn
            .send(&Message::ChangeState { task_id, completed })
            .await
    }

    /// Stream `reader` to the server as the task's attachment. `file_name`
    /// only contributes its extension. Returns the number of bytes sent.
    pub async fn upload_from<S>(&mut self, task_id: TaskId, file_name: &str, reader: &mut S) -> Result<u64>
    where
        S: AsyncRead + Unpin + ?Sized,
    {
        self.conn
            .send(&Message::UploadFile(UploadFile::Start {
                task_id,
                file_name: file_name.to_string(),
            }))
            .await?;

        let mut buf = vec![0u8; BLOCK_SIZE];
        let mut sent = 0u64;
        loop {
            let n = read_block(reader, &mut buf).await?;
            if n == 0 {
                break;
            }
            self.conn
                .send(&Message::UploadFile(UploadFile::Block(buf[..n].to_vec())))
                .await?;
            sent += n as u64;
            if n < BLOCK_SIZE {
                break;
            }
        }
        self.conn.send(&Message::UploadFile(UploadFile::End)).await?;

        match self.read_reply("upload result").await? {
            Reply::Flag(true) => Ok(sent),
            _ => Err(Error::UnexpectedReply {
                expected: "upload result",
                got: MessageKind::Response,
            }),
        }
    }

    pub async fn upload_file(&mut self, task_id: TaskId, path: &Path) -> Result<u64> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::InvalidInput(format!("not a file path: {}", path.display())))?;
        let mut file = fs::File::open(path).await?;
        self.upload_from(task_id, &file_name, &mut file).await
    }

    /// Copy the task's attachment into `writer`. Returns the byte count.
    pub async fn download_to<S>(&mut self, task_id: TaskId, writer: &mut S) -> Result<u64>
    where
        S: AsyncWrite + Unpin + ?Sized,
    {
        self.conn
            .send(&Message::DownloadFile(DownloadFile::Request { task_id }))
            .await?;
        let mut received = 0u64;
        loop {
            match self.conn.recv().await? {
                Message::DownloadFile(DownloadFile::Block(block)) => {
                    writer.write_all(&block).await?;
                    received += block.len() as u64;
                }
                Message::DownloadFile(DownloadFile::End) => break,
                Message::Error { message } => return Err(Error::Remote(message)),
                other => {
                    return Err(Error::UnexpectedReply {
                        expected: "download block",
                        got: other.kind(),
                    })
                }
            }
        }
        writer.flush().await?;
        Ok(received)
    }

    /// Download into `dest`; a partial or empty file is removed on failure.
    pub async fn download_file(&mut self, task_id: TaskId, dest: &Path) -> Result<u64> {
        let mut file = fs::File::create(dest).await?;
        match self.download_to(task_id, &mut file).await {
            Ok(n) => Ok(n),
            Err(e) => {
                drop(file);
                let _ = fs::remove_file(dest).await;
                Err(e)
            }
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.conn.send(&Message::Close).await?;
        self.conn.shutdown().await
    }
}
