//! Error types surfaced to callers.
//!
//! Only malformed input ever reaches the caller. A failing probe (refused,
//! timed out, reset) is absorbed where it happens and shows up solely as the
//! absence of that port or host from the results.

use thiserror::Error;

/// Result type alias using the crate [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by discovery, scanning and assessment.
#[derive(Error, Debug)]
pub enum Error {
    /// The port specification could not be parsed. Raised before any probing.
    #[error("Invalid port specification: {0}")]
    InvalidPorts(String),

    /// A target address or name could not be parsed. Raised before any probing.
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// The discovery range could not be turned into candidate addresses.
    #[error("Host discovery failed for {range:?}: {reason}")]
    Discovery {
        /// The range as supplied by the caller.
        range: String,
        /// Why the range was rejected.
        reason: String,
    },

    /// The scan results handed to the rule engine are not a host to
    /// list-of-results mapping.
    #[error("Malformed scan results: {0}")]
    AssessmentInput(String),

    /// Reading or writing an exported file failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serializing a report failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether the error stems from a malformed port, target or discovery
    /// range. All of these are raised before any probe is sent.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidPorts(_) | Error::InvalidTarget(_) | Error::Discovery { .. }
        )
    }

    /// Short machine-readable code for logging.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidPorts(_) => "INVALID_PORTS",
            Error::InvalidTarget(_) => "INVALID_TARGET",
            Error::Discovery { .. } => "DISCOVERY_FAILED",
            Error::AssessmentInput(_) => "ASSESSMENT_INPUT",
            Error::Io(_) => "IO_ERROR",
            Error::Json(_) => "JSON_ERROR",
        }
    }
}
