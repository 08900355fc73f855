//! Frame codec shared by the server handler and the client session
//!
//! Every message is one self-delimiting frame:
//! MAGIC (4) | VERSION (2) | KIND (1) | LENGTH (4) | bincode payload (LENGTH)
//!
//! Frames are encoded from scratch on every send, so no state (and no cached
//! sub-object) ever carries over from one message to the next.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::error::{classify_io, Error, ProtocolError, Result};
use crate::protocol::{Message, MessageKind, HEADER_LEN, MAGIC, MAX_FRAME_SIZE, VERSION};
use crate::task::TaskId;

/// Validate frame payload size against protocol::MAX_FRAME_SIZE
pub fn validate_frame_size(size: usize) -> Result<(), ProtocolError> {
    if size > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(size));
    }
    Ok(())
}

/// Build frame header (11 bytes)
/// Format: MAGIC (4) | VERSION (2) | KIND (1) | LENGTH (4)
pub fn build_frame_header(kind: u8, payload_len: u32) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(MAGIC);
    header[4..6].copy_from_slice(&VERSION.to_le_bytes());
    header[6] = kind;
    header[7..11].copy_from_slice(&payload_len.to_le_bytes());
    header
}

/// Parse frame header
/// Returns: (kind byte, payload length)
pub fn parse_frame_header(header: &[u8; HEADER_LEN]) -> Result<(u8, u32), ProtocolError> {
    if &header[0..4] != MAGIC {
        return Err(ProtocolError::BadMagic);
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != VERSION {
        return Err(ProtocolError::VersionMismatch(version));
    }
    let kind = header[6];
    let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]);
    Ok((kind, payload_len))
}

#[derive(Serialize, Deserialize)]
struct ChangeStateBody {
    task_id: TaskId,
    completed: bool,
}

fn to_payload<T: Serialize>(kind: MessageKind, body: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serialize(body).map_err(|source| ProtocolError::Encode { kind, source })
}

fn from_payload<T: DeserializeOwned>(kind: MessageKind, payload: &[u8]) -> Result<T, ProtocolError> {
    bincode::deserialize(payload).map_err(|source| ProtocolError::Malformed { kind, source })
}

/// Serialize the kind-specific body of a message.
pub fn encode_payload(msg: &Message) -> Result<Vec<u8>, ProtocolError> {
    let kind = msg.kind();
    match msg {
        Message::List | Message::Close => Ok(Vec::new()),
        Message::Filter(filter) => to_payload(kind, filter),
        Message::Create(draft) => to_payload(kind, draft),
        Message::Delete { task_id } => to_payload(kind, task_id),
        Message::UploadFile(up) => to_payload(kind, up),
        Message::DownloadFile(down) => to_payload(kind, down),
        Message::ChangeState { task_id, completed } => to_payload(
            kind,
            &ChangeStateBody {
                task_id: *task_id,
                completed: *completed,
            },
        ),
        Message::Response(reply) => to_payload(kind, reply),
        Message::Error { message } => to_payload(kind, message),
    }
}

/// Rebuild a message from a fully read frame.
pub fn decode_payload(kind_byte: u8, payload: &[u8]) -> Result<Message, ProtocolError> {
    let kind = MessageKind::from_u8(kind_byte).ok_or(ProtocolError::UnknownKind(kind_byte))?;
    let msg = match kind {
        MessageKind::List => Message::List,
        MessageKind::Close => Message::Close,
        MessageKind::Filter => Message::Filter(from_payload(kind, payload)?),
        MessageKind::Create => Message::Create(from_payload(kind, payload)?),
        MessageKind::Delete => Message::Delete {
            task_id: from_payload(kind, payload)?,
        },
        MessageKind::UploadFile => Message::UploadFile(from_payload(kind, payload)?),
        MessageKind::DownloadFile => Message::DownloadFile(from_payload(kind, payload)?),
        MessageKind::ChangeState => {
            let body: ChangeStateBody = from_payload(kind, payload)?;
            Message::ChangeState {
                task_id: body.task_id,
                completed: body.completed,
            }
        }
        MessageKind::Response => Message::Response(from_payload(kind, payload)?),
        MessageKind::Error => Message::Error {
            message: from_payload(kind, payload)?,
        },
    };
    Ok(msg)
}

/// Encode a complete frame (header + payload).
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, ProtocolError> {
    let payload = encode_payload(msg)?;
    validate_frame_size(payload.len())?;
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&build_frame_header(msg.kind() as u8, payload.len() as u32));
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Read one frame. A clean EOF before the first header byte is
/// `ConnectionClosed`; EOF anywhere later is `Truncated`.
pub async fn read_message<R>(reader: &mut R) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    let mut hdr = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut hdr[filled..]).await.map_err(classify_io)?;
        if n == 0 {
            if filled == 0 {
                return Err(Error::ConnectionClosed);
            }
            return Err(ProtocolError::Truncated.into());
        }
        filled += n;
    }
    let (kind, len_u32) = parse_frame_header(&hdr)?;
    let len = len_u32 as usize;
    validate_frame_size(len)?;
    let mut payload = vec![0u8; len];
    if len > 0 {
        reader.read_exact(&mut payload).await.map_err(|e| match classify_io(e) {
            Error::ConnectionClosed => Error::Protocol(ProtocolError::Truncated),
            other => other,
        })?;
    }
    Ok(decode_payload(kind, &payload)?)
}

/// Write one frame and flush it.
pub async fn write_message<W>(writer: &mut W, msg: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(msg)?;
    writer.write_all(&frame).await.map_err(classify_io)?;
    writer.flush().await.map_err(classify_io)?;
    Ok(())
}

/// A message-oriented view over one byte stream.
pub struct Connection<R, W> {
    reader: BufReader<R>,
    writer: BufWriter<W>,
}

impl Connection<OwnedReadHalf, OwnedWriteHalf> {
    pub fn from_tcp(stream: TcpStream) -> Self {
        let _ = stream.set_nodelay(true);
        let (read, write) = stream.into_split();
        Connection::new(read, write)
    }
}

impl<R, W> Connection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
        }
    }

    pub async fn recv(&mut self) -> Result<Message> {
        read_message(&mut self.reader).await
    }

    /// Frames are never batched: every send is flushed before returning.
    pub async fn send(&mut self, msg: &Message) -> Result<()> {
        write_message(&mut self.writer, msg).await
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await.map_err(classify_io)
    }
}
