//! Error types shared across the controller.
//!
//! Error enums implement `Display` and `std::error::Error` by hand rather
//! than through a derive macro, matching the rest of this codebase.

use std::fmt;

/// A process-level error: a fatal condition. The daemon
/// logs it and exits with a non-zero status rather than continuing in an
/// unknown state.
#[derive(Debug)]
pub enum FatalError {
    /// The Flag Store's root directory does not exist at startup.
    MissingFlagDir { path: String },
    /// Setting the `invalid` flag itself failed its read-after-write check,
    /// while already trying to record a different failure.
    InvalidFlagUnrecordable { zone: String, cause: String },
    Config(String),
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalError::MissingFlagDir { path } => {
                write!(f, "flag store root directory does not exist: {path}")
            }
            FatalError::InvalidFlagUnrecordable { zone, cause } => write!(
                f,
                "failed to record invalid state for zone '{zone}' ({cause}); \
                 cannot proceed with an unrecorded poisoned zone"
            ),
            FatalError::Config(msg) => write!(f, "configuration error: {msg}"),
        }
    }
}

impl std::error::Error for FatalError {}

/// Errors from the Backend Adapter's three entry points.
#[derive(Debug)]
pub enum BackendError {
    Spawn(std::io::Error),
    NonZeroExit { code: Option<i32> },
    Amqp(String),
    NotConfigured,
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Spawn(err) => write!(f, "failed to spawn backend process: {err}"),
            BackendError::NonZeroExit { code } => match code {
                Some(code) => write!(f, "backend process exited with status {code}"),
                None => write!(f, "backend process was terminated by a signal"),
            },
            BackendError::Amqp(msg) => write!(f, "AMQP backend error: {msg}"),
            BackendError::NotConfigured => write!(f, "no backend is configured"),
        }
    }
}

impl std::error::Error for BackendError {}

/// Errors surfaced while loading or reloading the access-control list.
#[derive(Debug)]
pub enum AclError {
    Io(std::io::Error),
    Parse { line: usize, message: String },
}

impl fmt::Display for AclError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AclError::Io(err) => write!(f, "failed to read ACL file: {err}"),
            AclError::Parse { line, message } => {
                write!(f, "ACL file parse error at line {line}: {message}")
            }
        }
    }
}

impl std::error::Error for AclError {}

impl From<std::io::Error> for AclError {
    fn from(err: std::io::Error) -> Self {
        AclError::Io(err)
    }
}
