use std::fmt;
use std::io;

#[derive(Debug, Clone)]
pub enum Error {
    Io(String),
    Rpc(agnorpc::Error),
    /// Invalid server settings.
    Config(String),
    /// A library-mode child did not announce itself. `output` holds what it printed instead.
    StartupFailed { banner: String, output: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "IO error: {}", msg),
            Self::Rpc(e) => write!(f, "{}", e),
            Self::Config(msg) => write!(f, "Invalid configuration: {}", msg),
            Self::StartupFailed { banner, output } => {
                write!(f, "Server process did not start correctly (banner {:?})", banner)?;
                if !output.is_empty() {
                    write!(f, "\n{}", output)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<agnorpc::Error> for Error {
    fn from(e: agnorpc::Error) -> Self {
        Self::Rpc(e)
    }
}

impl From<agnowire::Error> for Error {
    fn from(e: agnowire::Error) -> Self {
        Self::Rpc(agnorpc::Error::Transport(e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
