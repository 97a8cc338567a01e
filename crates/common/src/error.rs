//! Error types for the Beebo memory bridge.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BeeboError {
    /// Caller supplied an unusable request (missing text, bad tags, bad ts).
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid or missing token")]
    Auth,

    #[error("Not found: {0}")]
    NotFound(String),

    /// No embedding provider configured, or the provider call failed.
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BeeboError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    /// Errors that are the caller's fault rather than the server's.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Auth | Self::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, BeeboError>;
