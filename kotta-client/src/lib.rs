//! Kotta HTTP Client
//!
//! A client SDK for submitting, tracking, and retrieving results from remote
//! batch computation jobs on the Kotta job-execution service.
//!
//! The SDK is deliberately synchronous: every operation is a blocking HTTP
//! call, and waiting on a job is a fixed-interval sleep-poll loop. Retry and
//! backoff policy belong to the caller.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use kotta_client::{Credentials, Job, JobDescription, KottaClient};
//!
//! fn main() -> anyhow::Result<()> {
//!     let creds = Credentials::from_file("creds.json")?;
//!     let client = KottaClient::new("http://kotta.example.com:8888", creds);
//!
//!     let mut job = Job::new(JobDescription::default());
//!     job.add_inputs(&["s3://bucket/input.csv"]);
//!     job.submit(&client)?;
//!
//!     let status = job.wait_until_terminal(
//!         &client,
//!         Duration::from_secs(600),
//!         Duration::from_secs(2),
//!     )?;
//!     println!("job {} finished: {}", job.job_id().unwrap_or("?"), status);
//!     Ok(())
//! }
//! ```

pub mod config;
mod connection;
pub mod error;
mod functions;
mod job;
mod outputs;

// Re-export commonly used types
pub use config::Credentials;
pub use connection::Connection;
pub use error::{ClientError, FetchError, Result};
pub use functions::{CallArgs, RemoteFunction, RemoteOptions, RemoteOutcome};
pub use job::{Job, RESULT_FILE};
pub use kotta_core::domain::job::{JobDescription, JobStatus};
pub use outputs::{OutputRef, canonical_storage_url};

use reqwest::blocking::Client;
use serde::de::DeserializeOwned;

/// HTTP connection to the Kotta service
///
/// Holds the base URL, the credential pair, and a blocking HTTP client.
/// The connection is stateless per call and safe to share read-only across
/// jobs; it never mutates anything beyond its credentials.
#[derive(Debug, Clone)]
pub struct KottaClient {
    /// Base URL of the service (e.g., "http://kotta.example.com:8888")
    base_url: String,
    /// Credential pair attached to authenticated requests
    credentials: Credentials,
    /// HTTP client instance
    client: Client,
}

impl KottaClient {
    /// Create a new client for the service at `base_url`.
    pub fn new(base_url: impl Into<String>, credentials: Credentials) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            client: Client::new(),
        }
    }

    /// Create a new client with a custom HTTP client.
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(
        base_url: impl Into<String>,
        credentials: Credentials,
        client: Client,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            client,
        }
    }

    /// Get the base URL of the service
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub(crate) fn http(&self) -> &Client {
        &self.client
    }

    /// Handle an API response and deserialize JSON
    ///
    /// Checks the status code and returns an appropriate error if the request
    /// failed, or deserializes the response body if successful.
    pub(crate) fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::blocking::Response,
    ) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }
}
