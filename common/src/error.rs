use thiserror::Error;
use tokio::task::JoinError;

use crate::broker::BrokerError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Authorization error: {0}")]
    Authorization(String),
    #[error("Remote communication error: {0}")]
    RemoteCommunication(String),
    #[error("Remote command failed: {0}")]
    Remote(String),
    #[error("Extraction error: {0}")]
    Extraction(String),
    #[error("Malformed document: {0}")]
    MalformedDocument(String),
    #[error("Embedding error: {0}")]
    Embedding(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Unsupported type: {0}")]
    UnsupportedBackend(String),
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Whether the error ends a registration run. File and chunk level problems are
    /// recovered locally by skipping the offending input.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Extraction(_) | Self::MalformedDocument(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_file_and_chunk_errors_are_recoverable() {
        assert!(!AppError::Extraction("a.pdf".into()).is_fatal());
        assert!(!AppError::MalformedDocument("no content".into()).is_fatal());
        assert!(AppError::Embedding("down".into()).is_fatal());
        assert!(AppError::Authorization("denied".into()).is_fatal());
        assert!(AppError::Storage("missing vector".into()).is_fatal());
    }

    #[test]
    fn unsupported_backend_message_names_the_type() {
        let err = AppError::UnsupportedBackend("vector_pg".into());
        assert_eq!(err.to_string(), "Unsupported type: vector_pg");
    }
}
