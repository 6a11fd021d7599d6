/*!
 * Error types for aigate
 */

use aigate_core_resilience::QueueError;
use std::fmt;
use std::io;

pub type Result<T> = std::result::Result<T, GateError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

#[derive(Debug)]
pub enum GateError {
    /// Configuration error
    Config(String),

    /// I/O error
    Io(io::Error),

    /// Admission queue rejected an operation
    Queue(QueueError),

    /// Logging could not be initialized
    Logging(String),

    /// Some requests did not complete successfully
    Incomplete { failed: usize, unfinished: usize },

    /// Generic error with message
    Other(String),
}

impl GateError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            GateError::Config(_) | GateError::Logging(_) | GateError::Io(_) => EXIT_FATAL,
            GateError::Incomplete { .. } => EXIT_PARTIAL,
            GateError::Queue(e) if e.is_cancelled() => EXIT_PARTIAL,
            _ => EXIT_FATAL,
        }
    }

    /// Check if this error is fatal (caller should not retry)
    pub fn is_fatal(&self) -> bool {
        match self {
            GateError::Queue(e) => !e.is_retryable_admission(),
            GateError::Incomplete { .. } => false,
            _ => true,
        }
    }
}

impl fmt::Display for GateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateError::Config(msg) => {
                write!(f, "Configuration error: {}", msg)
            }
            GateError::Io(err) => {
                write!(f, "I/O error: {}", err)
            }
            GateError::Queue(err) => {
                write!(f, "Queue error: {}", err)
            }
            GateError::Logging(msg) => {
                write!(f, "Logging error: {}", msg)
            }
            GateError::Incomplete { failed, unfinished } => {
                write!(
                    f,
                    "{} requests failed, {} did not finish",
                    failed, unfinished
                )
            }
            GateError::Other(msg) => {
                write!(f, "{}", msg)
            }
        }
    }
}

impl std::error::Error for GateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GateError::Io(err) => Some(err),
            GateError::Queue(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for GateError {
    fn from(err: io::Error) -> Self {
        GateError::Io(err)
    }
}

impl From<QueueError> for GateError {
    fn from(err: QueueError) -> Self {
        GateError::Queue(err)
    }
}

impl From<toml::de::Error> for GateError {
    fn from(err: toml::de::Error) -> Self {
        GateError::Config(format!("TOML parse error: {}", err))
    }
}

impl From<toml::ser::Error> for GateError {
    fn from(err: toml::ser::Error) -> Self {
        GateError::Config(format!("TOML serialize error: {}", err))
    }
}
