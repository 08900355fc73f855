//! Per-connection request loop
//!
//! AwaitingRequest -> Dispatching(kind) -> AwaitingRequest ... -> Closed
//!
//! Closed is reached on CLOSE, on EOF, or on any fatal I/O or decoding
//! failure. Application failures (missing task, missing file, bad file name)
//! are answered with ERROR and the loop keeps going.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, trace, warn};

use crate::codec::Connection;
use crate::error::{Error, ProtocolError, Result};
use crate::file_store::{BlockSink, FileStore};
use crate::protocol::{errors, DownloadFile, Message, MessageKind, Reply, UploadFile};
use crate::server::ServerState;
use crate::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    AwaitingRequest,
    Dispatching(MessageKind),
    Closed,
}

enum Flow {
    Continue,
    Close,
}

pub struct ConnectionHandler<R, W> {
    conn: Connection<R, W>,
    shared: Arc<ServerState>,
    state: HandlerState,
}

impl<R, W> ConnectionHandler<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(conn: Connection<R, W>, shared: Arc<ServerState>) -> Self {
        Self {
            conn,
            shared,
            state: HandlerState::AwaitingRequest,
        }
    }

    pub fn state(&self) -> HandlerState {
        self.state
    }

    fn transition(&mut self, next: HandlerState) {
        trace!(from = ?self.state, to = ?next, "handler state");
        self.state = next;
    }

    /// Serve requests until the peer closes or the stream breaks.
    /// A peer hanging up is a normal end, not an error.
    pub async fn run(mut self) -> Result<()> {
        let result = self.serve_requests().await;
        self.transition(HandlerState::Closed);
        let _ = self.conn.shutdown().await;
        match result {
            Ok(()) | Err(Error::ConnectionClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn serve_requests(&mut self) -> Result<()> {
        loop {
            self.transition(HandlerState::AwaitingRequest);
            let request = match self.conn.recv().await {
                Ok(msg) => msg,
                Err(Error::Protocol(ProtocolError::UnknownKind(kind))) => {
                    debug!(kind, "unknown request kind");
                    self.send_error(errors::UNKNOWN_REQUEST).await?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            self.transition(HandlerState::Dispatching(request.kind()));
            match self.dispatch(request).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Close) => {
                    debug!("client sent CLOSE");
                    return Ok(());
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    if matches!(e, Error::NotFound(_)) {
                        debug!(error = %e, "request failed");
                    } else {
                        warn!(error = %e, "request failed");
                    }
                    self.send_error(&e.to_string()).await?;
                }
            }
        }
    }

    async fn dispatch(&mut self, request: Message) -> Result<Flow> {
        match request {
            Message::List => {
                let tasks = self.shared.repo.snapshot();
                debug!(count = tasks.len(), "LIST");
                self.reply(Reply::Tasks(tasks)).await
            }
            Message::Filter(filter) => {
                let tasks = filter.apply(self.shared.repo.snapshot());
                debug!(?filter, count = tasks.len(), "FILTER");
                self.reply(Reply::Tasks(tasks)).await
            }
            Message::Create(draft) => {
                let task = self.shared.repo.create(draft);
                info!(task_id = task.id, "task created");
                self.reply(Reply::Flag(true)).await
            }
            Message::Delete { task_id } => {
                if self.shared.repo.remove(task_id) {
                    info!(task_id, "task deleted");
                    if let Err(e) = self.shared.files.remove(task_id).await {
                        warn!(task_id, error = %e, "could not remove attachment");
                    }
                } else {
                    debug!(task_id, "DELETE for unknown task");
                }
                self.reply(Reply::Flag(true)).await
            }
            Message::ChangeState { task_id, completed } => {
                // Fire-and-forget: nothing is sent back, found or not
                if self.shared.repo.set_completed(task_id, completed) {
                    info!(task_id, completed, "task state changed");
                } else {
                    debug!(task_id, "CHANGE_STATE for unknown task ignored");
                }
                Ok(Flow::Continue)
            }
            Message::UploadFile(UploadFile::Start { task_id, file_name }) => {
                self.receive_upload(task_id, &file_name).await
            }
            Message::DownloadFile(DownloadFile::Request { task_id }) => {
                self.send_download(task_id).await
            }
            Message::Close => Ok(Flow::Close),
            other => {
                debug!(kind = %other.kind(), "not a request");
                self.send_error(errors::UNKNOWN_REQUEST).await
            }
        }
    }

    async fn receive_upload(&mut self, task_id: TaskId, file_name: &str) -> Result<Flow> {
        let ext = match FileStore::extension_of(file_name) {
            Ok(ext) => ext.to_string(),
            Err(e) => {
                debug!(task_id, file_name, error = %e, "rejecting upload");
                self.send_error(&format!("invalid file name: {}", file_name)).await?;
                self.drain_upload().await?;
                return Ok(Flow::Continue);
            }
        };
        if !self.shared.repo.contains(task_id) {
            debug!(task_id, "upload for unknown task");
            self.send_error(&Error::NotFound("task").to_string()).await?;
            self.drain_upload().await?;
            return Ok(Flow::Continue);
        }

        let shared = Arc::clone(&self.shared);
        let mut failure = shared.files.begin(task_id, &ext).await.err();
        let received = match self
            .receive_blocks(&shared.files, task_id, &ext, &mut failure)
            .await
        {
            Ok(n) => n,
            Err(e) => {
                // Abandoned mid-stream: the committed attachment is untouched
                let _ = shared.files.discard(task_id, &ext).await;
                return Err(e);
            }
        };

        if failure.is_none() && !shared.repo.contains(task_id) {
            // Deleted by another client while the blocks were in flight
            let _ = shared.files.discard(task_id, &ext).await;
            return Err(Error::NotFound("task"));
        }
        if failure.is_none() {
            failure = shared.files.commit(task_id, &ext).await.err();
        }
        if let Some(e) = failure {
            warn!(task_id, error = %e, "attachment write failed");
            let _ = shared.files.discard(task_id, &ext).await;
            return self
                .send_error(&format!("failed to store attachment: {}", e))
                .await;
        }
        if !shared.repo.mark_attachment(task_id) {
            let _ = shared.files.remove(task_id).await;
            return Err(Error::NotFound("task"));
        }
        info!(task_id, bytes = received, file_name, "attachment stored");
        self.reply(Reply::Flag(true)).await
    }

    /// Stage blocks until `End`. After the first write failure the rest are
    /// still consumed so the stream stays aligned.
    async fn receive_blocks(
        &mut self,
        files: &FileStore,
        task_id: TaskId,
        ext: &str,
        failure: &mut Option<Error>,
    ) -> Result<u64> {
        let mut received = 0u64;
        loop {
            match self.recv_during("upload").await? {
                Message::UploadFile(UploadFile::Block(data)) => {
                    received += data.len() as u64;
                    if failure.is_none() {
                        *failure = files.append(task_id, ext, &data).await.err();
                    }
                }
                Message::UploadFile(UploadFile::End) => return Ok(received),
                other => {
                    return Err(ProtocolError::UnexpectedMessage {
                        got: other.kind(),
                        during: "upload",
                    }
                    .into())
                }
            }
        }
    }

    /// Discard the rest of a rejected upload so the next request lines up.
    async fn drain_upload(&mut self) -> Result<()> {
        let mut discarded = 0usize;
        loop {
            match self.recv_during("upload").await? {
                Message::UploadFile(UploadFile::Block(_)) => discarded += 1,
                Message::UploadFile(UploadFile::End) => break,
                other => {
                    return Err(ProtocolError::UnexpectedMessage {
                        got: other.kind(),
                        during: "upload",
                    }
                    .into())
                }
            }
        }
        trace!(discarded, "drained rejected upload");
        Ok(())
    }

    async fn send_download(&mut self, task_id: TaskId) -> Result<Flow> {
        let shared = Arc::clone(&self.shared);
        let mut sink = DownloadSink {
            conn: &mut self.conn,
        };
        match shared.files.stream_to(task_id, &mut sink).await? {
            Some(bytes) => {
                self.conn
                    .send(&Message::DownloadFile(DownloadFile::End))
                    .await?;
                info!(task_id, bytes, "attachment sent");
                Ok(Flow::Continue)
            }
            None => Err(Error::NotFound("file")),
        }
    }

    // Inside a transfer neither an unknown frame nor a failed read can be
    // answered without breaking the sub-protocol, so both are fatal here
    async fn recv_during(&mut self, during: &'static str) -> Result<Message> {
        match self.conn.recv().await {
            Err(Error::Protocol(ProtocolError::UnknownKind(kind))) => {
                Err(ProtocolError::UnknownKindDuring { kind, during }.into())
            }
            Err(Error::Io(source)) => Err(ProtocolError::TransferIo { during, source }.into()),
            other => other,
        }
    }

    async fn reply(&mut self, reply: Reply) -> Result<Flow> {
        self.conn.send(&Message::Response(reply)).await?;
        Ok(Flow::Continue)
    }

    async fn send_error(&mut self, text: &str) -> Result<Flow> {
        self.conn.send(&Message::error(text)).await?;
        Ok(Flow::Continue)
    }
}

struct DownloadSink<'a, R, W> {
    conn: &'a mut Connection<R, W>,
}

#[async_trait]
impl<'a, R, W> BlockSink for DownloadSink<'a, R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn write_block(&mut self, block: Vec<u8>) -> Result<()> {
        self.conn
            .send(&Message::DownloadFile(DownloadFile::Block(block)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{build_frame_header, encode_frame};
    use crate::task::{Priority, TaskDraft};
    use tempfile::TempDir;
    use tokio::io::{duplex, split, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
    use tokio::task::JoinHandle;

    type ClientConn = Connection<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

    fn start(shared: Arc<ServerState>) -> (ClientConn, JoinHandle<Result<()>>) {
        let (client, server) = duplex(256 * 1024);
        let (sr, sw) = split(server);
        let handler = ConnectionHandler::new(Connection::new(sr, sw), shared);
        assert_eq!(handler.state(), HandlerState::AwaitingRequest);
        let join = tokio::spawn(handler.run());
        let (cr, cw) = split(client);
        (Connection::new(cr, cw), join)
    }

    fn state_in(tmp: &TempDir) -> Arc<ServerState> {
        Arc::new(ServerState::new(tmp.path().join("attachments")))
    }

    async fn expect_error(conn: &mut ClientConn) -> String {
        match conn.recv().await.unwrap() {
            Message::Error { message } => message,
            other => panic!("expected ERROR, got {:?}", other),
        }
    }

    async fn expect_tasks(conn: &mut ClientConn) -> Vec<crate::task::Task> {
        conn.send(&Message::List).await.unwrap();
        match conn.recv().await.unwrap() {
            Message::Response(Reply::Tasks(tasks)) => tasks,
            other => panic!("expected task list, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_change_state_delete_flow() {
        let tmp = TempDir::new().unwrap();
        let (mut conn, join) = start(state_in(&tmp));

        conn.send(&Message::Create(TaskDraft::new("buy milk", None, Priority::High)))
            .await
            .unwrap();
        assert_eq!(conn.recv().await.unwrap(), Message::flag(true));

        // No reply for CHANGE_STATE: the next frame read is LIST's answer
        conn.send(&Message::ChangeState {
            task_id: 1,
            completed: true,
        })
        .await
        .unwrap();
        let tasks = expect_tasks(&mut conn).await;
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].completed);

        conn.send(&Message::Delete { task_id: 1 }).await.unwrap();
        assert_eq!(conn.recv().await.unwrap(), Message::flag(true));
        conn.send(&Message::Delete { task_id: 1 }).await.unwrap();
        assert_eq!(conn.recv().await.unwrap(), Message::flag(true));
        assert!(expect_tasks(&mut conn).await.is_empty());

        conn.send(&Message::Close).await.unwrap();
        join.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_change_state_unknown_task_is_silent() {
        let tmp = TempDir::new().unwrap();
        let shared = state_in(&tmp);
        shared.repo.create(TaskDraft::new("only", None, Priority::Low));
        let before = shared.repo.snapshot();
        let (mut conn, _join) = start(Arc::clone(&shared));

        conn.send(&Message::ChangeState {
            task_id: 99,
            completed: true,
        })
        .await
        .unwrap();
        assert_eq!(expect_tasks(&mut conn).await, before);
        assert_eq!(shared.repo.snapshot(), before);
    }

    #[tokio::test]
    async fn test_unknown_kind_gets_error_and_connection_survives() {
        let tmp = TempDir::new().unwrap();
        let (client, server) = duplex(64 * 1024);
        let (sr, sw) = split(server);
        let handler = ConnectionHandler::new(Connection::new(sr, sw), state_in(&tmp));
        let _join = tokio::spawn(handler.run());
        let (cr, mut cw) = split(client);

        let mut raw = build_frame_header(77, 2).to_vec();
        raw.extend_from_slice(b"zz");
        raw.extend_from_slice(&encode_frame(&Message::List).unwrap());
        cw.write_all(&raw).await.unwrap();
        cw.flush().await.unwrap();

        let mut reader = tokio::io::BufReader::new(cr);
        match crate::codec::read_message(&mut reader).await.unwrap() {
            Message::Error { message } => assert_eq!(message, errors::UNKNOWN_REQUEST),
            other => panic!("unexpected {:?}", other),
        }
        match crate::codec::read_message(&mut reader).await.unwrap() {
            Message::Response(Reply::Tasks(tasks)) => assert!(tasks.is_empty()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_request_kinds_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let (mut conn, _join) = start(state_in(&tmp));

        conn.send(&Message::flag(true)).await.unwrap();
        assert_eq!(expect_error(&mut conn).await, errors::UNKNOWN_REQUEST);

        conn.send(&Message::UploadFile(UploadFile::Block(vec![1, 2, 3])))
            .await
            .unwrap();
        assert_eq!(expect_error(&mut conn).await, errors::UNKNOWN_REQUEST);

        assert!(expect_tasks(&mut conn).await.is_empty());
    }

    #[tokio::test]
    async fn test_upload_to_missing_task_drains_blocks() {
        let tmp = TempDir::new().unwrap();
        let (mut conn, _join) = start(state_in(&tmp));

        conn.send(&Message::UploadFile(UploadFile::Start {
            task_id: 12,
            file_name: "photo.png".into(),
        }))
        .await
        .unwrap();
        for _ in 0..3 {
            conn.send(&Message::UploadFile(UploadFile::Block(vec![0xAB; 4096])))
                .await
                .unwrap();
        }
        conn.send(&Message::UploadFile(UploadFile::End)).await.unwrap();

        assert_eq!(expect_error(&mut conn).await, errors::TASK_NOT_FOUND);
        // Stream is still aligned
        assert!(expect_tasks(&mut conn).await.is_empty());
        assert!(!tmp.path().join("attachments").join("12.png").exists());
    }

    #[tokio::test]
    async fn test_upload_without_extension_is_invalid_input() {
        let tmp = TempDir::new().unwrap();
        let shared = state_in(&tmp);
        shared.repo.create(TaskDraft::new("t", None, Priority::Medium));
        let (mut conn, _join) = start(Arc::clone(&shared));

        conn.send(&Message::UploadFile(UploadFile::Start {
            task_id: 1,
            file_name: "Makefile".into(),
        }))
        .await
        .unwrap();
        conn.send(&Message::UploadFile(UploadFile::Block(b"all:".to_vec())))
            .await
            .unwrap();
        conn.send(&Message::UploadFile(UploadFile::End)).await.unwrap();

        let msg = expect_error(&mut conn).await;
        assert!(msg.starts_with("invalid file name"), "{}", msg);
        assert!(!shared.repo.get(1).unwrap().has_attachment);
        assert_eq!(expect_tasks(&mut conn).await.len(), 1);
    }

    #[tokio::test]
    async fn test_upload_then_download_blocks() {
        let tmp = TempDir::new().unwrap();
        let shared = state_in(&tmp);
        shared.repo.create(TaskDraft::new("t", None, Priority::Medium));
        let (mut conn, _join) = start(Arc::clone(&shared));

        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 256) as u8).collect();
        conn.send(&Message::UploadFile(UploadFile::Start {
            task_id: 1,
            file_name: "blob.bin".into(),
        }))
        .await
        .unwrap();
        for chunk in data.chunks(4096) {
            conn.send(&Message::UploadFile(UploadFile::Block(chunk.to_vec())))
                .await
                .unwrap();
        }
        conn.send(&Message::UploadFile(UploadFile::End)).await.unwrap();
        assert_eq!(conn.recv().await.unwrap(), Message::flag(true));
        assert!(shared.repo.get(1).unwrap().has_attachment);

        conn.send(&Message::DownloadFile(DownloadFile::Request { task_id: 1 }))
            .await
            .unwrap();
        let mut sizes = Vec::new();
        let mut got = Vec::new();
        loop {
            match conn.recv().await.unwrap() {
                Message::DownloadFile(DownloadFile::Block(b)) => {
                    sizes.push(b.len());
                    got.extend_from_slice(&b);
                }
                Message::DownloadFile(DownloadFile::End) => break,
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(sizes, vec![4096, 4096, 1808]);
        assert_eq!(got, data);
    }

    #[tokio::test]
    async fn test_download_missing_file() {
        let tmp = TempDir::new().unwrap();
        let (mut conn, _join) = start(state_in(&tmp));
        conn.send(&Message::DownloadFile(DownloadFile::Request { task_id: 3 }))
            .await
            .unwrap();
        assert_eq!(expect_error(&mut conn).await, errors::FILE_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_request_inside_upload_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let shared = state_in(&tmp);
        shared.repo.create(TaskDraft::new("t", None, Priority::Medium));
        let (mut conn, join) = start(shared);

        conn.send(&Message::UploadFile(UploadFile::Start {
            task_id: 1,
            file_name: "a.txt".into(),
        }))
        .await
        .unwrap();
        conn.send(&Message::List).await.unwrap();

        let err = join.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::UnexpectedMessage {
                got: MessageKind::List,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_peer_hangup_ends_cleanly() {
        let tmp = TempDir::new().unwrap();
        let (conn, join) = start(state_in(&tmp));
        drop(conn);
        join.await.unwrap().unwrap();
    }

    async fn upload(conn: &mut ClientConn, task_id: TaskId, file_name: &str, data: &[u8]) {
        conn.send(&Message::UploadFile(UploadFile::Start {
            task_id,
            file_name: file_name.into(),
        }))
        .await
        .unwrap();
        for chunk in data.chunks(crate::protocol::BLOCK_SIZE) {
            conn.send(&Message::UploadFile(UploadFile::Block(chunk.to_vec())))
                .await
                .unwrap();
        }
        conn.send(&Message::UploadFile(UploadFile::End)).await.unwrap();
    }

    async fn download(conn: &mut ClientConn, task_id: TaskId) -> Vec<u8> {
        conn.send(&Message::DownloadFile(DownloadFile::Request { task_id }))
            .await
            .unwrap();
        let mut got = Vec::new();
        loop {
            match conn.recv().await.unwrap() {
                Message::DownloadFile(DownloadFile::Block(b)) => got.extend_from_slice(&b),
                Message::DownloadFile(DownloadFile::End) => return got,
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    fn files_of(dir: &std::path::Path, task_id: TaskId) -> Vec<String> {
        let prefix = format!("{}.", task_id);
        std::fs::read_dir(dir)
            .map(|rd| {
                rd.flatten()
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .filter(|n| n.starts_with(&prefix))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_abandoned_reupload_keeps_previous_attachment() {
        let tmp = TempDir::new().unwrap();
        let shared = state_in(&tmp);
        shared.repo.create(TaskDraft::new("t", None, Priority::Medium));
        let original: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

        let (mut conn, _join) = start(Arc::clone(&shared));
        upload(&mut conn, 1, "a.pdf", &original).await;
        assert_eq!(conn.recv().await.unwrap(), Message::flag(true));

        // Second client starts replacing the file, then vanishes mid-stream
        let (mut second, join) = start(Arc::clone(&shared));
        second
            .send(&Message::UploadFile(UploadFile::Start {
                task_id: 1,
                file_name: "b.bin".into(),
            }))
            .await
            .unwrap();
        second
            .send(&Message::UploadFile(UploadFile::Block(vec![9; 100])))
            .await
            .unwrap();
        drop(second);
        join.await.unwrap().unwrap();

        assert!(shared.repo.get(1).unwrap().has_attachment);
        assert_eq!(download(&mut conn, 1).await, original);
        assert_eq!(files_of(&tmp.path().join("attachments"), 1), vec!["1.pdf".to_string()]);
    }

    #[tokio::test]
    async fn test_task_deleted_during_upload() {
        let tmp = TempDir::new().unwrap();
        let shared = state_in(&tmp);
        shared.repo.create(TaskDraft::new("t", None, Priority::Medium));
        let (mut conn, _join) = start(Arc::clone(&shared));

        conn.send(&Message::UploadFile(UploadFile::Start {
            task_id: 1,
            file_name: "notes.txt".into(),
        }))
        .await
        .unwrap();
        conn.send(&Message::UploadFile(UploadFile::Block(b"partial".to_vec())))
            .await
            .unwrap();

        // Wait until the first block is staged so the delete lands mid-transfer
        let staged = tmp.path().join("attachments").join("1.txt.part");
        for _ in 0..500 {
            if std::fs::metadata(&staged).map(|m| m.len() == 7).unwrap_or(false) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(staged.exists());

        assert!(shared.repo.remove(1));
        shared.files.remove(1).await.unwrap();
        conn.send(&Message::UploadFile(UploadFile::Block(b" more".to_vec())))
            .await
            .unwrap();
        conn.send(&Message::UploadFile(UploadFile::End)).await.unwrap();

        assert_eq!(expect_error(&mut conn).await, errors::TASK_NOT_FOUND);
        assert!(files_of(&tmp.path().join("attachments"), 1).is_empty());
        assert!(expect_tasks(&mut conn).await.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_keeps_connection_aligned() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("blocker");
        std::fs::write(&root, b"not a directory").unwrap();
        let shared = Arc::new(ServerState::new(root.clone()));
        shared.repo.create(TaskDraft::new("t", None, Priority::Medium));
        let (mut conn, _join) = start(Arc::clone(&shared));

        upload(&mut conn, 1, "data.bin", &[5u8; 6000]).await;
        let msg = expect_error(&mut conn).await;
        assert!(msg.starts_with("failed to store attachment"), "{}", msg);
        assert!(!shared.repo.get(1).unwrap().has_attachment);

        let tasks = expect_tasks(&mut conn).await;
        assert_eq!(tasks.len(), 1);
        assert!(root.is_file());
    }

    struct FailingReader {
        data: Vec<u8>,
        pos: usize,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            if self.pos < self.data.len() {
                let start = self.pos;
                let n = (self.data.len() - start).min(buf.remaining());
                buf.put_slice(&self.data[start..start + n]);
                self.pos += n;
                std::task::Poll::Ready(Ok(()))
            } else {
                std::task::Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "read timed out",
                )))
            }
        }
    }

    #[tokio::test]
    async fn test_read_failure_inside_upload_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let shared = state_in(&tmp);
        shared.repo.create(TaskDraft::new("t", None, Priority::Medium));

        let mut data = encode_frame(&Message::UploadFile(UploadFile::Start {
            task_id: 1,
            file_name: "a.txt".into(),
        }))
        .unwrap();
        data.extend(encode_frame(&Message::UploadFile(UploadFile::Block(vec![1; 10]))).unwrap());
        let reader = FailingReader { data, pos: 0 };

        let handler = ConnectionHandler::new(Connection::new(reader, tokio::io::sink()), shared);
        let err = handler.run().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::TransferIo {
                during: "upload",
                ..
            })
        ));
        assert!(files_of(&tmp.path().join("attachments"), 1).is_empty());
    }
}
