//! Error types for seqforge

use thiserror::Error;

/// Result type alias using seqforge's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for seqforge operations
#[derive(Error, Debug)]
pub enum Error {
    /// Structurally invalid configuration: unknown stage `type`, malformed
    /// vocabulary or merge table, inconsistent generation options.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Decode error: {0}")]
    Decode(String),

    /// The inference collaborator failed.
    #[error("Model error: {0}")]
    Model(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Regex error: {0}")]
    Regex(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl From<fancy_regex::Error> for Error {
    fn from(e: fancy_regex::Error) -> Self {
        Self::Regex(e.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(e: base64::DecodeError) -> Self {
        Self::Config(format!("invalid base64 payload: {e}"))
    }
}

impl Error {
    /// Shorthand for a [`Error::Config`] built from anything printable.
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
