//! Job state machine
//!
//! Tracks a submitted job's lifecycle: submit, poll, wait, retrieve. The
//! state machine never retries anything itself; retry and backoff policy
//! belong to the caller.

use std::thread;
use std::time::Duration;

use kotta_core::domain::job::{JobDescription, JobStatus};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::connection::Connection;
use crate::error::{ClientError, Result};
use crate::outputs::OutputRef;

/// Canonical name of the serialized result file a remote function produces.
pub const RESULT_FILE: &str = "out.pkl";

/// A single unit of remote computation.
///
/// Created together with its description at submission time. The id history
/// is append-only: resubmitting the same logical job accumulates ids, and the
/// most recent one wins for all status operations. Once a job has a
/// server-assigned id, its description reflects the last-known
/// server-reported state.
#[derive(Debug, Clone)]
pub struct Job {
    desc: JobDescription,
    job_ids: Vec<String>,
    status: JobStatus,
    stdout: Option<OutputRef>,
    stderr: Option<OutputRef>,
    outputs: Vec<OutputRef>,
}

impl Job {
    /// Create an unsubmitted job from a description.
    pub fn new(desc: JobDescription) -> Self {
        Self {
            desc,
            job_ids: Vec::new(),
            status: JobStatus::Unsubmitted,
            stdout: None,
            stderr: None,
            outputs: Vec::new(),
        }
    }

    /// The most recent server-assigned job id, if any submission succeeded.
    pub fn job_id(&self) -> Option<&str> {
        self.job_ids.last().map(String::as_str)
    }

    /// Full submission history, oldest first.
    pub fn job_ids(&self) -> &[String] {
        &self.job_ids
    }

    /// Drop the whole id history.
    pub fn clear_job_ids(&mut self) {
        self.job_ids.clear();
    }

    /// Friendly name of the job, falling back to the job id.
    pub fn jobname(&self) -> Option<&str> {
        self.desc.jobname.as_deref().or_else(|| self.job_id())
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn description(&self) -> &JobDescription {
        &self.desc
    }

    pub fn description_mut(&mut self) -> &mut JobDescription {
        &mut self.desc
    }

    /// General (non-stream) output references from the last poll.
    pub fn outputs(&self) -> &[OutputRef] {
        &self.outputs
    }

    pub fn stdout(&self) -> Option<&OutputRef> {
        self.stdout.as_ref()
    }

    pub fn stderr(&self) -> Option<&OutputRef> {
        self.stderr.as_ref()
    }

    pub fn add_inputs<S: AsRef<str>>(&mut self, inputs: &[S]) {
        self.desc.add_inputs(inputs);
    }

    pub fn add_outputs<S: AsRef<str>>(&mut self, outputs: &[S]) {
        self.desc.add_outputs(outputs);
    }

    /// Set the status from a server-reported string.
    ///
    /// An unrecognized string is an error and leaves the prior status
    /// untouched; the enumeration is never silently extended.
    pub fn set_status(&mut self, status: &str) -> Result<()> {
        self.status = status.parse()?;
        Ok(())
    }

    /// Submit the job description to the service.
    ///
    /// On `status == "Success"` the returned id is appended to the history
    /// and the job moves to `pending`. Any other response leaves the job
    /// `unsubmitted` and surfaces the server-reported reason (or the raw
    /// response when no reason was given). No internal retries.
    pub fn submit<C: Connection>(&mut self, conn: &C) -> Result<()> {
        let response = conn.submit_task(&self.desc)?;
        if response.status != "Success" {
            let reason = response
                .reason
                .clone()
                .unwrap_or_else(|| format!("{response:?}"));
            tracing::error!(%reason, "job submission failed");
            return Err(ClientError::Submit { reason });
        }

        let job_id = response.job_id.ok_or_else(|| ClientError::Submit {
            reason: "submission succeeded without a job id".to_string(),
        })?;
        tracing::debug!(%job_id, "job submitted");
        self.job_ids.push(job_id);
        self.status = JobStatus::Pending;
        Ok(())
    }

    /// Cancellation is a known capability gap, not a transient failure.
    pub fn cancel(&mut self) -> Result<()> {
        Err(ClientError::NotImplemented("job cancellation"))
    }

    /// Poll the status endpoint and fold the reply into the job.
    ///
    /// Polling before submission is a benign no-op returning the current
    /// status. When the reply carries outputs, the full output-reference set
    /// is re-derived: each raw string is parsed and routed to the
    /// stdout/stderr slots by filename suffix, or accumulated into the
    /// general outputs list. Prior references are replaced wholesale. The
    /// echoed fields are merged into the description.
    pub fn poll_status<C: Connection>(&mut self, conn: &C) -> Result<JobStatus> {
        let job_id = match self.job_ids.last() {
            Some(id) => id.clone(),
            None => return Ok(self.status),
        };

        let update = conn.status_task(&job_id)?;
        self.set_status(&update.status)?;

        if !update.outputs.is_empty() {
            self.stdout = None;
            self.stderr = None;
            self.outputs.clear();
            for raw in &update.outputs {
                let output = OutputRef::parse(raw);
                if output.is_stdout() {
                    self.stdout = Some(output);
                } else if output.is_stderr() {
                    self.stderr = Some(output);
                } else {
                    self.outputs.push(output);
                }
            }
        }

        let mut fields = update.fields;
        fields.insert("status".to_string(), Value::String(update.status));
        if !update.inputs.is_empty() {
            fields.insert("inputs".to_string(), Value::String(update.inputs.join(",")));
        }
        if !update.outputs.is_empty() {
            fields.insert(
                "outputs".to_string(),
                Value::String(update.outputs.join(",")),
            );
        }
        self.desc.merge(&fields);
        tracing::debug!(%job_id, status = %self.status, "polled job status");

        Ok(self.status)
    }

    /// Poll at a fixed interval until the job reaches a terminal status or
    /// `max_wait` elapses.
    ///
    /// A cooperative busy-wait: the calling thread blocks for the full
    /// duration. No backoff, no jitter; per-request pacing is the interval
    /// and the only cap is wall-clock `max_wait`.
    pub fn wait_until_terminal<C: Connection>(
        &mut self,
        conn: &C,
        max_wait: Duration,
        poll_interval: Duration,
    ) -> Result<JobStatus> {
        let rounds = max_wait.as_millis() / poll_interval.as_millis().max(1);
        for _ in 0..rounds {
            tracing::debug!(job_id = ?self.job_id(), "waiting on job");
            let status = self.poll_status(conn)?;
            if status.is_terminal() {
                return Ok(status);
            }
            thread::sleep(poll_interval);
        }
        Err(ClientError::TimedOut { waited: max_wait })
    }

    /// Fetch the serialized result of a completed job and deserialize it.
    ///
    /// Only valid in `completed`; a completed job without an output named
    /// `expected_file` has captured no result. Fetch failures are reported,
    /// not retried, so the caller can inspect the job for diagnostics.
    pub fn fetch_result<T: DeserializeOwned, C: Connection>(
        &self,
        conn: &C,
        expected_file: &str,
    ) -> Result<T> {
        if self.status != JobStatus::Completed {
            tracing::warn!(status = %self.status, "result requested before completion");
            return Err(ClientError::NotCompleted(self.status));
        }

        let result = self
            .outputs
            .iter()
            .find(|o| o.file() == expected_file)
            .ok_or(ClientError::NoResultCaptured)?;

        let bytes = result.read_bytes(conn)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ClientError::ParseError(format!("failed to deserialize result: {e}")))
    }

    /// Remote stdout of a completed job, if the stream was captured.
    pub fn stdout_text<C: Connection>(&self, conn: &C) -> Option<String> {
        self.stream_text(conn, self.stdout.as_ref(), "STDOUT")
    }

    /// Remote stderr of a completed job, if the stream was captured.
    pub fn stderr_text<C: Connection>(&self, conn: &C) -> Option<String> {
        self.stream_text(conn, self.stderr.as_ref(), "STDERR")
    }

    fn stream_text<C: Connection>(
        &self,
        conn: &C,
        stream: Option<&OutputRef>,
        name: &str,
    ) -> Option<String> {
        if self.status != JobStatus::Completed {
            return None;
        }
        let Some(output) = stream else {
            tracing::warn!("{name} not found among job outputs");
            return None;
        };
        match output.read_text(conn) {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read {name}");
                None
            }
        }
    }
}
