use std::fmt;
use std::io;

/// Fatal error kinds. Transient network faults and protocol conflicts are
/// handled by the role event loops and never surface here.
#[derive(Debug)]
pub enum Error {
    /// Startup-time configuration problem: missing file, malformed entry,
    /// ambiguous instance id.
    Config(String),

    /// I/O failure on a resource the role cannot run without, such as its
    /// listening socket or its output stream.
    Io(io::Error),

    /// A protocol invariant was broken: two different values reported for
    /// the same decision. A correct deployment never observes this; the
    /// process logs the context and halts.
    Safety(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
        | Error::Config(message) => write!(f, "configuration error: {}", message),
        | Error::Io(error) => write!(f, "io error: {}", error),
        | Error::Safety(message) => write!(f, "safety violation: {}", message),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Error::Io(error)
    }
}
