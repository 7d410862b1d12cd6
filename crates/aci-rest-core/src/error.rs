//! Error types for the ACI REST engine
//!
//! Every failure a single remote attempt can produce is one of the retryable
//! kinds below. Only [`Error::ExhaustedRetries`] and [`Error::Cancelled`]
//! leave the lifecycle orchestrator.

use thiserror::Error;

use crate::engine::Operation;

/// Result type alias for ACI REST operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the ACI REST engine
#[derive(Error, Debug)]
pub enum Error {
    /// The request could not be sent or the response could not be received
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote returned a structured error document
    #[error("Remote rejected request (code {code}): {text}")]
    RemoteRejection {
        /// Remote error code, e.g. "107"
        code: String,
        /// Remote error text, verbatim
        text: String,
    },

    /// The response did not have the expected shape
    #[error("Reconciliation error: {0}")]
    Reconciliation(String),

    /// The retry bound was reached without a successful attempt
    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    ExhaustedRetries {
        /// The lifecycle operation that gave up
        operation: Operation,
        /// Number of attempts made
        attempts: u32,
        /// The last underlying error
        source: Box<Error>,
    },

    /// The operation was aborted by an external cancellation signal
    #[error("{0} cancelled")]
    Cancelled(Operation),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Object not found on the remote
    #[error("Object not found: {0}")]
    NotFound(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a remote rejection from an error document's code and text
    pub fn rejection(code: impl Into<String>, text: impl Into<String>) -> Self {
        Self::RemoteRejection {
            code: code.into(),
            text: text.into(),
        }
    }

    /// Create a reconciliation error
    pub fn reconciliation(msg: impl Into<String>) -> Self {
        Self::Reconciliation(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Whether another attempt may succeed where this one failed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::RemoteRejection { .. } | Self::Reconciliation(_) | Self::Json(_)
        )
    }

    /// The remote error code, if this is a remote rejection
    pub fn remote_code(&self) -> Option<&str> {
        match self {
            Self::RemoteRejection { code, .. } => Some(code),
            Self::ExhaustedRetries { source, .. } => source.remote_code(),
            _ => None,
        }
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
