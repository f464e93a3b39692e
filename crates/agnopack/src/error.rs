//! # Error Definitions

use std::fmt;

/// Packing and unpacking failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The stream ended in the middle of a value.
    UnexpectedEnd,
    /// The underlying stream failed for a reason other than running dry.
    Io(String),
    /// String data is not valid UTF-8.
    InvalidUtf8,
    /// A length or count prefix was negative (and not the null sentinel).
    NegativeLength(i32),
    /// A length or count does not fit in an `i32` prefix.
    TooLarge(usize),
    /// A heterogeneous map referenced a packer id that is neither built in nor registered.
    UnknownPackerId(i32),
    /// The value handed to a packer is outside of its domain.
    TypeMismatch { packer: i32, found: &'static str },
    /// No built-in packer can be inferred for a value of this kind.
    CannotInferPacker(&'static str),
    /// The serializer was asked to resolve a handle it never issued.
    UnknownHandle(i64),
    /// Failure reported by a custom packer or a serializer.
    Custom(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnexpectedEnd => write!(f, "unexpected end of stream"),
            Error::Io(msg) => write!(f, "I/O error: {}", msg),
            Error::InvalidUtf8 => write!(f, "string data is not valid UTF-8"),
            Error::NegativeLength(len) => write!(f, "negative length prefix: {}", len),
            Error::TooLarge(len) => write!(f, "length {} does not fit an Int32 prefix", len),
            Error::UnknownPackerId(id) => write!(f, "unknown packer id: {}", id),
            Error::TypeMismatch { packer, found } => {
                write!(f, "packer {} cannot pack a value of kind {}", packer, found)
            }
            Error::CannotInferPacker(kind) => write!(f, "cannot infer a packer for kind {}", kind),
            Error::UnknownHandle(id) => write!(f, "unknown object handle: {}", id),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof => Error::UnexpectedEnd,
            _ => Error::Io(e.to_string()),
        }
    }
}

/// Specialized `Result` for packer operations.
pub type Result<T> = std::result::Result<T, Error>;
