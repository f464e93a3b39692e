//! # Error Definitions
//!
//! Two families live here:
//!
//! - [`Error`]: what a caller of this crate sees. Transport and packing failures,
//!   protocol errors, and remote exceptions reconstructed on the client.
//! - [`Fault`]: what a service handler raises. The processor turns it into an
//!   error reply and keeps serving.

use std::backtrace::Backtrace;
use std::fmt;
use std::sync::Arc;

use agnopack::Value;

// ============================================================================
// Remote Exceptions
// ============================================================================

/// A declared exception raised by the remote service, with its structured fields.
#[derive(Debug, Clone)]
pub struct PackedException {
    class_id: i32,
    value: Value,
    backtrace: Arc<Backtrace>,
}

impl PackedException {
    pub fn new(class_id: i32, value: Value) -> Self {
        Self { class_id, value, backtrace: Arc::new(Backtrace::capture()) }
    }

    pub fn class_id(&self) -> i32 {
        self.class_id
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Positional fields, when the exception was packed as a record.
    pub fn fields(&self) -> Option<&[Value]> {
        self.value.as_record()
    }

    /// Where the exception was reconstructed locally.
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

impl fmt::Display for PackedException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "remote exception (class {}): {:?}", self.class_id, self.value)
    }
}

/// An undeclared failure on the remote side. Carries text only.
#[derive(Debug, Clone)]
pub struct GenericException {
    message: String,
    traceback: String,
    backtrace: Arc<Backtrace>,
}

impl GenericException {
    pub fn new(message: impl Into<String>, traceback: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            traceback: traceback.into(),
            backtrace: Arc::new(Backtrace::capture()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The remote traceback, without the message line.
    pub fn traceback(&self) -> &str {
        &self.traceback
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

impl fmt::Display for GenericException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "remote failure: {}", self.message)
    }
}

// ============================================================================
// Error
// ============================================================================

#[derive(Debug, Clone)]
pub enum Error {
    Transport(agnowire::Error),
    Pack(agnopack::Error),
    /// A malformed exchange, detected locally or reported by the peer.
    Protocol(String),
    Packed(PackedException),
    Generic(GenericException),
    /// No reply slot exists for this sequence number.
    UnknownSequence(i32),
    WrongProtocolVersion { expected: String, found: String },
    WrongServiceName { expected: String, found: String },
    IncompatibleServiceVersion(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Pack(e) => write!(f, "Packing error: {}", e),
            Self::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            Self::Packed(e) => write!(f, "{}", e),
            Self::Generic(e) => write!(f, "{}", e),
            Self::UnknownSequence(seq) => write!(f, "No outstanding call with sequence {}", seq),
            Self::WrongProtocolVersion { expected, found } => {
                write!(f, "Expected protocol '{}', found '{}'", expected, found)
            }
            Self::WrongServiceName { expected, found } => {
                write!(f, "Expected service '{}', found '{}'", expected, found)
            }
            Self::IncompatibleServiceVersion(version) => {
                write!(f, "Server does not support client version '{}'", version)
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<agnowire::Error> for Error {
    fn from(e: agnowire::Error) -> Self {
        Self::Transport(e)
    }
}

impl From<agnopack::Error> for Error {
    fn from(e: agnopack::Error) -> Self {
        Self::Pack(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
// Fault
// ============================================================================

/// A failure raised by a service handler.
///
/// Handlers return `anyhow::Result`; a `Fault` travels inside the `anyhow::Error`
/// and is recovered by downcasting. Any other error becomes [`Fault::Generic`].
#[derive(Debug, Clone)]
pub enum Fault {
    /// A declared exception: the class id and the value its packer understands.
    Packed { class_id: i32, value: Value },
    Generic { message: String, traceback: String },
    Protocol(String),
}

impl Fault {
    pub fn packed(class_id: i32, value: impl Into<Value>) -> Self {
        Self::Packed { class_id, value: value.into() }
    }

    pub fn generic(message: impl Into<String>, traceback: impl Into<String>) -> Self {
        Self::Generic { message: message.into(), traceback: traceback.into() }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Classifies a handler error. `context` names the failing function in the traceback.
    pub fn from_handler_error(err: anyhow::Error, context: &str) -> Self {
        match err.downcast::<Fault>() {
            Ok(fault) => fault,
            Err(err) => {
                let report = format!("{:?}", err);
                // The first line repeats the message, which travels separately.
                let rest = report.lines().skip(1).collect::<Vec<_>>().join("\n");
                let rest = rest.trim();
                let mut traceback = format!("  in {}", context);
                if !rest.is_empty() {
                    traceback.push('\n');
                    traceback.push_str(rest);
                }
                Self::Generic { message: err.to_string(), traceback }
            }
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Packed { class_id, .. } => write!(f, "packed exception of class {}", class_id),
            Self::Generic { message, .. } => write!(f, "{}", message),
            Self::Protocol(msg) => write!(f, "protocol error: {}", msg),
        }
    }
}

impl std::error::Error for Fault {}
