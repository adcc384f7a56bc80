//! Error types for BlameGraph.

use thiserror::Error;

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// BlameGraph error types.
#[derive(Debug, Error)]
pub enum Error {
    /// Transient clone/fetch failure
    #[error("Network error: {0}")]
    Network(String),

    /// Credential or permission failure
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Local mirror storage failure
    #[error("Disk error: {0}")]
    Disk(String),

    /// A single file could not be diffed
    #[error("Diff error in {path}: {reason}")]
    Diff { path: String, reason: String },

    /// A commit transaction could not be written
    #[error("Storage write error: {0}")]
    StorageWrite(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rejected request parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Blame state is missing or inconsistent
    #[error("Blame state error: {0}")]
    BlameState(String),

    /// The job was interrupted
    #[error("Cancelled")]
    Cancelled,

    /// Generic error
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_))
    }

    /// Short machine-readable name of the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Network(_) => "network",
            Error::Auth(_) => "auth",
            Error::Disk(_) | Error::Io(_) => "disk",
            Error::Diff { .. } => "diff",
            Error::StorageWrite(_) | Error::Database(_) => "storage",
            Error::Serialization(_) => "serialization",
            Error::NotFound(_) => "not_found",
            Error::Config(_) => "config",
            Error::InvalidRequest(_) => "invalid_request",
            Error::BlameState(_) => "blame_state",
            Error::Cancelled => "cancelled",
            Error::Other(_) => "other",
        }
    }
}
