//! Service endpoints
//!
//! The `Connection` trait is the seam between the job state machine and the
//! transport, so lifecycle logic can be driven by a stub in tests.
//! `KottaClient` is the HTTP implementation against the Kotta REST surface:
//!
//! - `POST /rest/v1/submit_task`: form-encoded job description
//! - `GET  /rest/v1/status_task/{id}`: JSON status reply
//! - `POST /rest/v1/upload_url`: signed-URL issuance, followed by an
//!   out-of-band PUT of the file content
//!
//! `/rest/v1/cancel_task` exists in the protocol surface but is not
//! implemented client-side; see [`Job::cancel`](crate::Job::cancel).

use std::path::Path;

use kotta_core::domain::job::JobDescription;
use kotta_core::dto::{RawStatus, StatusUpdate, SubmitResponse, UploadResponse};

use crate::config::Credentials;
use crate::error::{ClientError, FetchError, Result};
use crate::outputs::canonical_storage_url;
use crate::KottaClient;

/// Transport operations the job state machine depends on.
pub trait Connection {
    /// Send a job description to the submission endpoint.
    fn submit_task(&self, desc: &JobDescription) -> Result<SubmitResponse>;

    /// Query the status endpoint for a submitted job.
    fn status_task(&self, job_id: &str) -> Result<StatusUpdate>;

    /// Upload a local file to remote storage, returning its canonical
    /// storage URL.
    fn upload_file(&self, path: &Path) -> Result<String>;

    /// Retrieve the content behind `url` without persisting it.
    fn retrieve(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError>;

    /// Retrieve the content behind `url` to the local path `dest`.
    fn download(&self, url: &str, dest: &Path) -> std::result::Result<(), FetchError> {
        let bytes = self.retrieve(url)?;
        std::fs::write(dest, bytes)?;
        Ok(())
    }
}

/// Build the form body for a submission: the flattened description plus the
/// credential pair.
fn submit_form(desc: &JobDescription, creds: &Credentials) -> Vec<(String, String)> {
    let mut form = desc.to_form();
    form.push(("access_token".to_string(), creds.access_token.clone()));
    form.push(("refresh_token".to_string(), creds.refresh_token.clone()));
    form
}

impl Connection for KottaClient {
    fn submit_task(&self, desc: &JobDescription) -> Result<SubmitResponse> {
        let url = format!("{}/rest/v1/submit_task", self.base_url());
        tracing::debug!(%url, "submitting task");

        let form = submit_form(desc, self.credentials());
        let response = self.http().post(&url).form(&form).send()?;
        self.handle_response(response)
    }

    fn status_task(&self, job_id: &str) -> Result<StatusUpdate> {
        let url = format!("{}/rest/v1/status_task/{}", self.base_url(), job_id);
        tracing::debug!(%job_id, "fetching task status");

        let response = self.http().get(&url).send()?;
        let raw: RawStatus = self.handle_response(response)?;
        Ok(raw.flatten())
    }

    fn upload_file(&self, path: &Path) -> Result<String> {
        let url = format!("{}/rest/v1/upload_url", self.base_url());
        let creds = self.credentials();
        let form = [
            ("access_token".to_string(), creds.access_token.clone()),
            ("refresh_token".to_string(), creds.refresh_token.clone()),
            ("filepath".to_string(), path.display().to_string()),
        ];

        let response = self.http().post(&url).form(&form).send()?;
        let reply: UploadResponse = self.handle_response(response)?;
        let upload_url = reply.upload_url.ok_or_else(|| ClientError::Upload {
            reason: reply.reason.unwrap_or_else(|| "Unknown".to_string()),
        })?;

        // Signed-URL PUT goes straight to storage, not through the web server.
        let file = std::fs::File::open(path)?;
        let put = self.http().put(&upload_url).body(file).send()?;
        if !put.status().is_success() {
            return Err(ClientError::Upload {
                reason: format!("PUT to signed URL returned {}", put.status()),
            });
        }

        tracing::debug!(path = %path.display(), "uploaded staging payload");
        Ok(canonical_storage_url(&upload_url))
    }

    fn retrieve(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError> {
        let response = self.http().get(url).send()?.error_for_status()?;
        Ok(response.bytes()?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_form_carries_credentials() {
        let desc = JobDescription::default();
        let creds = Credentials {
            access_token: "at".to_string(),
            refresh_token: "rt".to_string(),
        };

        let form = submit_form(&desc, &creds);
        assert!(form.iter().any(|(k, v)| k == "access_token" && v == "at"));
        assert!(form.iter().any(|(k, v)| k == "refresh_token" && v == "rt"));
        assert!(form.iter().any(|(k, v)| k == "queue" && v == "Test"));
    }
}
