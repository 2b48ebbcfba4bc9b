//! Common error types for the Keg ecosystem.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`KegError`].
pub type KegResult<T> = Result<T, KegError>;

/// Common errors across the Keg ecosystem.
#[derive(Error, Diagnostic, Debug)]
pub enum KegError {
    /// No refcount entry exists for the volume.
    #[error("Missing refcount for volume: {volume}")]
    #[diagnostic(code(keg::refcount::missing))]
    MissingRefcount {
        /// The volume name with no tracked usage.
        volume: String,
    },

    /// A refcount entry is in a state that should be structurally impossible.
    #[error("Refcount invariant violated for volume: {volume} (count 0, not mounted)")]
    #[diagnostic(
        code(keg::refcount::invariant),
        help("Entries with zero count and no mount must not exist; the store is corrupted")
    )]
    InvariantViolation {
        /// The volume name carrying the impossible record.
        volume: String,
    },

    /// Container engine API failure.
    #[error("Container engine error: {message}")]
    #[diagnostic(code(keg::engine))]
    Engine {
        /// The error message.
        message: String,
    },

    /// Volume driver failure.
    #[error("Volume driver error: {message}")]
    #[diagnostic(code(keg::driver))]
    Driver {
        /// The error message.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(keg::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(keg::serialization))]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(keg::config))]
    Config {
        /// The error message.
        message: String,
    },
}

impl From<serde_json::Error> for KegError {
    fn from(err: serde_json::Error) -> Self {
        KegError::Serialization(err.to_string())
    }
}
