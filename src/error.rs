//! Error taxonomy shared by the server and the client session

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::protocol::{MessageKind, MAX_FRAME_SIZE, VERSION};

/// Framing or decoding failure. Everything except `UnknownKind` leaves the
/// stream misaligned and ends the connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid magic in frame header")]
    BadMagic,

    #[error("protocol version mismatch: got {0}, expected {expected}", expected = VERSION)]
    VersionMismatch(u16),

    #[error("frame payload too large: {0} bytes (max: {max})", max = MAX_FRAME_SIZE)]
    FrameTooLarge(usize),

    #[error("stream ended inside a frame")]
    Truncated,

    /// The frame itself was read completely, so the stream is still aligned.
    #[error("unknown message kind: {0}")]
    UnknownKind(u8),

    #[error("malformed {kind} payload: {source}")]
    Malformed {
        kind: MessageKind,
        #[source]
        source: bincode::Error,
    },

    #[error("failed to encode {kind}: {source}")]
    Encode {
        kind: MessageKind,
        #[source]
        source: bincode::Error,
    },

    #[error("unexpected {got} during {during}")]
    UnexpectedMessage {
        got: MessageKind,
        during: &'static str,
    },

    // Unlike a stray frame between requests, this cannot be answered in-band
    #[error("unknown message kind {kind} during {during}")]
    UnknownKindDuring { kind: u8, during: &'static str },

    #[error("read failed during {during}: {source}")]
    TransferIo {
        during: &'static str,
        #[source]
        source: io::Error,
    },
}

impl ProtocolError {
    /// Whether the connection can keep going after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ProtocolError::UnknownKind(_))
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("connection closed")]
    ConnectionClosed,

    /// Displays as the wire text, e.g. "task not found".
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// ERROR text received from the server, verbatim.
    #[error("{0}")]
    Remote(String),

    #[error("unexpected reply: expected {expected}, got {got}")]
    UnexpectedReply {
        expected: &'static str,
        got: MessageKind,
    },

    #[error("invalid config file {}: {source}", .path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Errors that end the connection rather than being answered with ERROR.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Protocol(e) => !e.is_recoverable(),
            Error::ConnectionClosed => true,
            _ => false,
        }
    }
}

/// Map an I/O failure on the socket to the taxonomy: peer going away is
/// `ConnectionClosed`, anything else stays `Io`.
pub fn classify_io(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => Error::ConnectionClosed,
        _ => Error::Io(e),
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
