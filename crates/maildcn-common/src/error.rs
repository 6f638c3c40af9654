//! Error types for MailDCN

use thiserror::Error;

/// Main error type for MailDCN
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Backend returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for MailDCN
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Channel(_) => "CHANNEL_ERROR",
            Error::Protocol(_) => "PROTOCOL_ERROR",
            Error::Network(_) => "NETWORK_ERROR",
            Error::Api { .. } => "BACKEND_ERROR",
            Error::Auth(_) => "UNAUTHORIZED",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the failure came from the backend collaborator rather than
    /// from local state (connectivity or a non-success response).
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::Api { .. } | Error::Channel(_)
        )
    }
}
