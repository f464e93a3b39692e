//! # Error Definitions

use std::fmt;
use std::io;

/// Errors that occur at the framing and stream layer.
#[derive(Debug, Clone)]
pub enum Error {
    /// The peer closed the stream or the connection dropped.
    ConnectionLost(String),
    /// No frame started arriving before the deadline.
    Timeout,
    /// Generic I/O failure.
    Io(String),
    /// A frame header or payload broke the framing rules.
    ProtocolViolation(String),
    /// A payload does not fit an `i32` length field.
    PayloadTooLarge(usize),
    /// A reader asked for more bytes than the frame has left.
    Overread { requested: usize, available: usize },
    /// zlib failed to deflate or inflate a payload.
    Compression(String),
    /// An endpoint URL that cannot be used.
    InvalidUrl(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::Timeout => write!(f, "Timed out waiting for a frame"),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
            Self::ProtocolViolation(msg) => write!(f, "Framing violation: {}", msg),
            Self::PayloadTooLarge(len) => write!(f, "Payload of {} bytes is too large for a frame", len),
            Self::Overread { requested, available } => {
                write!(f, "Read past end of frame: wanted {}, {} left", requested, available)
            }
            Self::Compression(msg) => write!(f, "Compression error: {}", msg),
            Self::InvalidUrl(msg) => write!(f, "Invalid URL: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Self::ConnectionLost(e.to_string()),
            _ => Self::Io(e.to_string()),
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        let kind = match &e {
            Error::Overread { .. } => io::ErrorKind::UnexpectedEof,
            Error::ConnectionLost(_) => io::ErrorKind::ConnectionAborted,
            Error::Timeout => io::ErrorKind::TimedOut,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
