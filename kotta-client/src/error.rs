//! Error types for the Kotta client

use std::time::Duration;

use kotta_core::domain::job::{InvalidStatus, JobStatus};
use kotta_core::pack::PackError;
use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors raised while retrieving a remote-produced artifact.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The artifact has no URL: nothing was generated remotely. Reported,
    /// not retried.
    #[error("file {file:?} was not generated remotely, nothing to fetch")]
    NotAvailable { file: String },

    /// The retrieval request failed after the job reported the output exists.
    #[error("retrieval request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Fetched content could not be decoded as UTF-8 text.
    #[error("fetched content was not valid UTF-8: {0}")]
    Decode(#[from] std::string::FromUtf8Error),

    /// The fetched artifact could not be persisted locally.
    #[error("failed to persist fetched artifact: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur when using the Kotta client
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server rejected the submission, or replied without a job id.
    /// The job stays unsubmitted; retrying is the caller's responsibility.
    #[error("job submission rejected: {reason}")]
    Submit { reason: String },

    /// The server reported a status string outside the known enumeration.
    #[error(transparent)]
    InvalidStatus(#[from] InvalidStatus),

    /// A result was requested before the job reached `completed`.
    #[error("job is not completed (status: {0})")]
    NotCompleted(JobStatus),

    /// The job completed but the expected output file is missing.
    #[error("job completed but captured no result")]
    NoResultCaptured,

    /// Artifact retrieval failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The requested capability is a known gap, not a transient failure.
    #[error("{0} is not implemented")]
    NotImplemented(&'static str),

    /// The wait loop exhausted its budget without a terminal status.
    #[error("job did not reach a terminal state within {waited:?}")]
    TimedOut { waited: Duration },

    /// The upload-url endpoint declined to issue a signed URL.
    #[error("upload rejected: {reason}")]
    Upload { reason: String },

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// API returned an error status code
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the API
        message: String,
    },

    /// Failed to parse a response or a fetched payload
    #[error("failed to parse response: {0}")]
    ParseError(String),

    /// Packing the function call failed.
    #[error(transparent)]
    Pack(#[from] PackError),

    /// Local filesystem failure (staging directory, payload persistence).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }
}
