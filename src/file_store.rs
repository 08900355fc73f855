//! Attachment storage: at most one file per task, named `<task id>.<ext>`

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::protocol::BLOCK_SIZE;
use crate::task::TaskId;

/// Destination for a block-by-block file copy.
#[async_trait]
pub trait BlockSink: Send {
    async fn write_block(&mut self, block: Vec<u8>) -> Result<()>;
}

#[async_trait]
impl BlockSink for Vec<Vec<u8>> {
    async fn write_block(&mut self, block: Vec<u8>) -> Result<()> {
        self.push(block);
        Ok(())
    }
}

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Extension of an uploaded file: everything after the last '.'.
    pub fn extension_of(file_name: &str) -> Result<&str> {
        let (_, ext) = file_name
            .rsplit_once('.')
            .ok_or_else(|| Error::InvalidInput(format!("file name has no extension: {}", file_name)))?;
        if ext.is_empty() {
            return Err(Error::InvalidInput(format!("file name has an empty extension: {}", file_name)));
        }
        if ext.contains(|c: char| matches!(c, '/' | '\\' | '\0')) {
            return Err(Error::InvalidInput(format!("invalid extension in file name: {}", file_name)));
        }
        Ok(ext)
    }

    fn path_for(&self, task_id: TaskId, ext: &str) -> PathBuf {
        self.root.join(format!("{}.{}", task_id, ext))
    }

    async fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    // Uploads are staged next to the final name. The staging stem is
    // "<id>.<ext>", never "<id>", so lookups by task id cannot see it.
    fn staging_path(&self, task_id: TaskId, ext: &str) -> PathBuf {
        self.root.join(format!("{}.{}.part", task_id, ext))
    }

    /// Start staging an upload. The task's current attachment stays in place
    /// until `commit`; a leftover staging file is truncated.
    pub async fn begin(&self, task_id: TaskId, ext: &str) -> Result<PathBuf> {
        self.ensure_root().await?;
        let path = self.staging_path(task_id, ext);
        fs::File::create(&path).await?;
        Ok(path)
    }

    /// Append one block to the staged upload, creating it on first use.
    pub async fn append(&self, task_id: TaskId, ext: &str, bytes: &[u8]) -> Result<()> {
        self.ensure_root().await?;
        let path = self.staging_path(task_id, ext);
        let mut file = OpenOptions::new().create(true).append(true).open(&path).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(())
    }

    /// Publish the staged upload as the task's attachment, replacing any
    /// earlier one. A zero-byte upload yields an empty file.
    pub async fn commit(&self, task_id: TaskId, ext: &str) -> Result<PathBuf> {
        let staged = self.staging_path(task_id, ext);
        let path = self.path_for(task_id, ext);
        if let Some(previous) = self.find_by_task_id(task_id).await? {
            if previous != path {
                match fs::remove_file(&previous).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        fs::rename(&staged, &path).await?;
        Ok(path)
    }

    /// Drop a staged upload that will never be committed.
    pub async fn discard(&self, task_id: TaskId, ext: &str) -> Result<()> {
        match fs::remove_file(self.staging_path(task_id, ext)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Locate the attachment whose stem is exactly the task id.
    pub async fn find_by_task_id(&self, task_id: TaskId) -> Result<Option<PathBuf>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let wanted = task_id.to_string();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let stem_matches = path
                .file_stem()
                .map(|s| s.to_string_lossy() == wanted.as_str())
                .unwrap_or(false);
            if stem_matches && entry.file_type().await?.is_file() {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }

    /// Delete the task's attachment, if any.
    pub async fn remove(&self, task_id: TaskId) -> Result<bool> {
        match self.find_by_task_id(task_id).await? {
            Some(path) => match fs::remove_file(&path).await {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            },
            None => Ok(false),
        }
    }

    /// Copy the attachment into `sink` in BLOCK_SIZE blocks (the last one may
    /// be shorter). Returns the byte count, or `None` when there is no file.
    pub async fn stream_to<S>(&self, task_id: TaskId, sink: &mut S) -> Result<Option<u64>>
    where
        S: BlockSink + ?Sized,
    {
        let path = match self.find_by_task_id(task_id).await? {
            Some(p) => p,
            None => return Ok(None),
        };
        let mut file = fs::File::open(&path).await?;
        let mut total = 0u64;
        let mut buf = vec![0u8; BLOCK_SIZE];
        loop {
            let n = read_block(&mut file, &mut buf).await?;
            if n == 0 {
                break;
            }
            sink.write_block(buf[..n].to_vec()).await?;
            total += n as u64;
            if n < BLOCK_SIZE {
                break;
            }
        }
        Ok(Some(total))
    }
}

// Fill `buf` as far as the source allows so every block but the last is full
pub(crate) async fn read_block<R>(source: &mut R, buf: &mut [u8]) -> Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
