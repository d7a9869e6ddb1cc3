//! Error types for tangent-core

use thiserror::Error;

/// Main error type for the tangent-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The export matches neither supported chat schema
    #[error("unknown chat export format: {0}")]
    UnknownFormat(String),

    /// A single message carried a timestamp that could not be parsed.
    ///
    /// Only ever recorded as a warning; the message is dropped.
    #[error("unparseable timestamp on message {message_id}: {value}")]
    Timestamp { message_id: String, value: String },

    /// Embedding, clustering or labelling failed for one month
    #[error("processing failed for month {month}: {message}")]
    MonthProcessing { month: String, message: String },

    /// Nothing left to process after filtering
    #[error("no data: {0}")]
    NoData(String),

    /// Embedding or text-generation service call failed
    #[error("{service} service error: {message}")]
    ExternalService { service: String, message: String },

    /// Task id not registered with the supervisor
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// Background worker is gone or could not be started
    #[error("worker error: {0}")]
    Worker(String),
}

impl Error {
    pub(crate) fn embedding(message: impl Into<String>) -> Self {
        Error::ExternalService {
            service: "embedding".to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn generation(message: impl Into<String>) -> Self {
        Error::ExternalService {
            service: "generation".to_string(),
            message: message.into(),
        }
    }
}

/// Result type alias for tangent-core
pub type Result<T> = std::result::Result<T, Error>;
