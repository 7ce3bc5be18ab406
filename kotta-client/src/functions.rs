//! Remote function wrapper
//!
//! Adapts a captured function invocation into a Kotta job: pack the function
//! with its bound arguments, stage and upload the payload, submit, and (when
//! blocking) wait for completion and materialize the deserialized return
//! value. Modelled on the decorator flow of the service's reference client:
//! the job template bootstraps a remote interpreter, installs dependencies,
//! unpacks the serialization helper, and invokes a generic runner with
//! positional input/output file arguments.

use std::path::PathBuf;
use std::time::Duration;

use kotta_core::domain::job::{JobDescription, JobStatus};
use kotta_core::pack::{self, FunctionDef, PackLimits, RemoteCall};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::connection::Connection;
use crate::error::{ClientError, Result};
use crate::job::{Job, RESULT_FILE};

/// Well-known storage locations of the generic runner and the serialization
/// helper every remote invocation unpacks.
const RUNNER_INPUTS: &str =
    "s3://klab-jobs/inputs/yadu/runner.py,s3://klab-jobs/inputs/yadu/serialize.tar.gz";

/// Outcome of a remote function invocation.
///
/// Failure posture is "return what we have": short of a transport or
/// invariant failure, the caller always gets the job back for inspection.
#[derive(Debug)]
pub enum RemoteOutcome<T> {
    /// The job completed and its result was materialized.
    Completed(T),
    /// Non-blocking invocation: submitted, the caller polls.
    Submitted(Job),
    /// The job was rejected, timed out, ended in a non-completed terminal
    /// state, or completed without capturing a result.
    Unfinished(Job),
    /// The job completed but retrieving the result failed mid-fetch; partial
    /// failure with diagnostic context.
    FetchFailed(Job),
}

impl<T> RemoteOutcome<T> {
    /// The job carried by a non-value outcome.
    pub fn job(&self) -> Option<&Job> {
        match self {
            RemoteOutcome::Completed(_) => None,
            RemoteOutcome::Submitted(job)
            | RemoteOutcome::Unfinished(job)
            | RemoteOutcome::FetchFailed(job) => Some(job),
        }
    }
}

/// Per-invocation arguments and artifact overrides.
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    /// Extra job inputs registered before submission.
    pub inputs: Vec<String>,
    /// Extra job outputs registered before submission.
    pub outputs: Vec<String>,
}

/// Options shaping the job template of a remote function.
#[derive(Debug, Clone)]
pub struct RemoteOptions {
    pub queue: String,
    pub walltime: u64,
    /// Wait for completion and materialize the result, or return the
    /// submitted job immediately.
    pub block: bool,
    /// Extra entries for the remote `requirements.txt`.
    pub requirements: String,
    /// Baseline inputs shared by every invocation. Per-call inputs belong in
    /// [`CallArgs`] instead, so repeated invocations do not collide on
    /// identically named artifacts.
    pub inputs: Vec<String>,
    /// Local staging directory for outbound payloads.
    pub staging_dir: PathBuf,
    pub limits: PackLimits,
    pub max_wait: Duration,
    pub poll_interval: Duration,
}

impl Default for RemoteOptions {
    fn default() -> Self {
        Self {
            queue: "Test".to_string(),
            walltime: 300,
            block: true,
            requirements: String::new(),
            inputs: Vec::new(),
            staging_dir: PathBuf::from("pkl"),
            limits: PackLimits::default(),
            max_wait: Duration::from_secs(600),
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// A function adapted for remote execution on Kotta.
#[derive(Debug, Clone)]
pub struct RemoteFunction {
    function: FunctionDef,
    template: JobDescription,
    block: bool,
    staging_dir: PathBuf,
    limits: PackLimits,
    max_wait: Duration,
    poll_interval: Duration,
}

impl RemoteFunction {
    pub fn new(function: FunctionDef, options: RemoteOptions) -> Self {
        let template = job_template(&options);
        Self {
            function,
            template,
            block: options.block,
            staging_dir: options.staging_dir,
            limits: options.limits,
            max_wait: options.max_wait,
            poll_interval: options.poll_interval,
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// Invoke the function remotely.
    ///
    /// Packs the function with its call arguments, stages the payload under
    /// a fresh unique name, uploads it, registers it as a job input along
    /// with the canonical result file as an output, and submits. Blocking
    /// invocations then wait for a terminal state and fetch the result.
    pub fn call<T: DeserializeOwned, C: Connection>(
        &self,
        conn: &C,
        call_args: CallArgs,
    ) -> Result<RemoteOutcome<T>> {
        let mut job = Job::new(self.template.clone());
        job.add_inputs(&call_args.inputs);
        job.add_outputs(&call_args.outputs);

        let call = RemoteCall {
            function: self.function.clone(),
            args: call_args.args,
            kwargs: call_args.kwargs,
        };
        let payload = pack::pack_call(&call, &self.limits)?.encode()?;

        std::fs::create_dir_all(&self.staging_dir)?;
        let payload_name = format!("{}.in.pkl", Uuid::new_v4());
        let payload_path = self.staging_dir.join(&payload_name);
        std::fs::write(&payload_path, &payload)?;

        let storage_url = conn.upload_file(&payload_path)?;
        job.add_inputs(&[storage_url]);
        job.add_outputs(&[RESULT_FILE]);
        {
            let desc = job.description_mut();
            desc.jobname = Some(format!("kotta remote {}", self.function.name));
            desc.executable = Some(format!("/bin/bash exec.sh {payload_name} {RESULT_FILE}"));
        }

        match job.submit(conn) {
            Ok(()) => {}
            Err(ClientError::Submit { reason }) => {
                tracing::error!(%reason, "submit failed, returning job for inspection");
                return Ok(RemoteOutcome::Unfinished(job));
            }
            Err(e) => return Err(e),
        }

        if !self.block {
            tracing::debug!(job_id = ?job.job_id(), "returning job without waiting");
            return Ok(RemoteOutcome::Submitted(job));
        }

        match job.wait_until_terminal(conn, self.max_wait, self.poll_interval) {
            Ok(JobStatus::Completed) => {}
            Ok(status) => {
                tracing::debug!(%status, "job did not complete successfully");
                return Ok(RemoteOutcome::Unfinished(job));
            }
            Err(ClientError::TimedOut { waited }) => {
                tracing::debug!(?waited, "job did not reach a terminal state");
                return Ok(RemoteOutcome::Unfinished(job));
            }
            Err(e) => return Err(e),
        }

        match job.fetch_result::<T, C>(conn, RESULT_FILE) {
            Ok(value) => Ok(RemoteOutcome::Completed(value)),
            Err(ClientError::NoResultCaptured) => {
                tracing::error!("no result was captured, returning job for inspection");
                Ok(RemoteOutcome::Unfinished(job))
            }
            Err(ClientError::Fetch(e)) => {
                tracing::error!(error = %e, "failed to download result");
                Ok(RemoteOutcome::FetchFailed(job))
            }
            Err(ClientError::ParseError(e)) => {
                tracing::error!(error = %e, "result artifact did not deserialize");
                Ok(RemoteOutcome::FetchFailed(job))
            }
            Err(e) => Err(e),
        }
    }
}

/// Build the job-description template for a remote function.
///
/// The script bootstraps the remote side: install an interpreter, write and
/// install `requirements.txt`, unpack the serialization helper, and hand the
/// positional input/output file arguments to the generic runner.
fn job_template(options: &RemoteOptions) -> JobDescription {
    let script = format!(
        r#"#!/bin/bash
apt-get -y install python3 python3-pip
cat <<EOF > requirements.txt
PyMySQL
jupyter
{requirements}
EOF
pip3 install -r requirements.txt
tar -xzf serialize.tar.gz
python3 runner.py -i $1 -o $2
"#,
        requirements = options.requirements
    );

    let mut desc = JobDescription {
        walltime: options.walltime,
        queue: options.queue.clone(),
        script: Some(script),
        script_name: Some("exec.sh".to_string()),
        ..Default::default()
    };
    desc.extra
        .insert("jobtype".to_string(), Value::String("script".to_string()));
    desc.add_inputs(&[RUNNER_INPUTS]);
    desc.add_inputs(&options.inputs);
    desc
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::{HashMap, VecDeque};
    use std::path::Path;

    use kotta_core::dto::{StatusUpdate, SubmitResponse};
    use serde_json::json;

    use crate::error::FetchError;

    struct StubConnection {
        submit: SubmitResponse,
        statuses: RefCell<VecDeque<StatusUpdate>>,
        polls: Cell<usize>,
        uploads: RefCell<Vec<PathBuf>>,
        artifacts: HashMap<String, Vec<u8>>,
    }

    impl StubConnection {
        fn new(submit_status: &str, statuses: Vec<StatusUpdate>) -> Self {
            Self {
                submit: SubmitResponse {
                    status: submit_status.to_string(),
                    job_id: (submit_status == "Success").then(|| "J1".to_string()),
                    reason: (submit_status != "Success").then(|| "quota".to_string()),
                },
                statuses: RefCell::new(statuses.into()),
                polls: Cell::new(0),
                uploads: RefCell::new(Vec::new()),
                artifacts: HashMap::new(),
            }
        }
    }

    impl Connection for StubConnection {
        fn submit_task(&self, _desc: &JobDescription) -> Result<SubmitResponse> {
            Ok(self.submit.clone())
        }

        fn status_task(&self, _job_id: &str) -> Result<StatusUpdate> {
            self.polls.set(self.polls.get() + 1);
            let mut statuses = self.statuses.borrow_mut();
            if statuses.len() > 1 {
                Ok(statuses.pop_front().unwrap())
            } else {
                Ok(statuses.front().cloned().expect("no statuses scripted"))
            }
        }

        fn upload_file(&self, path: &Path) -> Result<String> {
            self.uploads.borrow_mut().push(path.to_path_buf());
            Ok(format!(
                "s3://stub/{}",
                path.file_name().unwrap().to_string_lossy()
            ))
        }

        fn retrieve(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError> {
            self.artifacts
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::NotAvailable {
                    file: url.to_string(),
                })
        }
    }

    fn pending() -> StatusUpdate {
        StatusUpdate {
            status: "pending".to_string(),
            ..Default::default()
        }
    }

    fn completed_with(outputs: &[&str]) -> StatusUpdate {
        StatusUpdate {
            status: "completed".to_string(),
            outputs: outputs.iter().map(|o| o.to_string()).collect(),
            ..Default::default()
        }
    }

    fn sum_function() -> FunctionDef {
        FunctionDef {
            name: "sum_all".to_string(),
            source: "def sum_all(*xs):\n    return sum(xs)\n".to_string(),
        }
    }

    fn fast_options(staging_dir: &Path, block: bool) -> RemoteOptions {
        RemoteOptions {
            block,
            staging_dir: staging_dir.to_path_buf(),
            max_wait: Duration::from_millis(50),
            poll_interval: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[test]
    fn test_blocking_call_materializes_result() {
        let staging = tempfile::tempdir().unwrap();
        let mut conn = StubConnection::new(
            "Success",
            vec![
                pending(),
                completed_with(&[r#"<a href="http://x/out.pkl">out.pkl</a>"#]),
            ],
        );
        conn.artifacts
            .insert("http://x/out.pkl".to_string(), b"6".to_vec());

        let f = RemoteFunction::new(sum_function(), fast_options(staging.path(), true));
        let outcome: RemoteOutcome<i64> = f
            .call(&conn, CallArgs {
                args: vec![json!(1), json!(2), json!(3)],
                ..Default::default()
            })
            .unwrap();

        assert!(matches!(outcome, RemoteOutcome::Completed(6)));
        assert_eq!(conn.polls.get(), 2);
        // The staged payload was uploaded and registered as a job input.
        assert_eq!(conn.uploads.borrow().len(), 1);
    }

    #[test]
    fn test_nonblocking_call_returns_submitted_job() {
        let staging = tempfile::tempdir().unwrap();
        let conn = StubConnection::new("Success", vec![pending()]);

        let f = RemoteFunction::new(sum_function(), fast_options(staging.path(), false));
        let outcome: RemoteOutcome<i64> = f.call(&conn, CallArgs::default()).unwrap();

        match outcome {
            RemoteOutcome::Submitted(job) => assert_eq!(job.job_id(), Some("J1")),
            other => panic!("expected Submitted, got {other:?}"),
        }
        assert_eq!(conn.polls.get(), 0);
    }

    #[test]
    fn test_rejected_submission_returns_job_for_inspection() {
        let staging = tempfile::tempdir().unwrap();
        let conn = StubConnection::new("Failure", Vec::new());

        let f = RemoteFunction::new(sum_function(), fast_options(staging.path(), true));
        let outcome: RemoteOutcome<i64> = f.call(&conn, CallArgs::default()).unwrap();

        assert!(matches!(&outcome, RemoteOutcome::Unfinished(_)));
        let job = outcome.job().unwrap();
        assert_eq!(job.job_id(), None);
        assert_eq!(job.status(), JobStatus::Unsubmitted);
    }

    #[test]
    fn test_completed_without_result_is_unfinished() {
        let staging = tempfile::tempdir().unwrap();
        let conn = StubConnection::new("Success", vec![completed_with(&["<i>other.txt</i>"])]);

        let f = RemoteFunction::new(sum_function(), fast_options(staging.path(), true));
        let outcome: RemoteOutcome<i64> = f.call(&conn, CallArgs::default()).unwrap();
        assert!(matches!(outcome, RemoteOutcome::Unfinished(_)));
    }

    #[test]
    fn test_fetch_failure_yields_partial_outcome() {
        let staging = tempfile::tempdir().unwrap();
        // Output is advertised but the artifact is never retrievable.
        let conn = StubConnection::new(
            "Success",
            vec![completed_with(&[r#"<a href="http://x/out.pkl">out.pkl</a>"#])],
        );

        let f = RemoteFunction::new(sum_function(), fast_options(staging.path(), true));
        let outcome: RemoteOutcome<i64> = f.call(&conn, CallArgs::default()).unwrap();

        assert!(matches!(&outcome, RemoteOutcome::FetchFailed(_)));
        // The partial outcome still hands back the completed job.
        assert_eq!(outcome.job().unwrap().status(), JobStatus::Completed);
    }

    #[test]
    fn test_timeout_is_unfinished() {
        let staging = tempfile::tempdir().unwrap();
        let conn = StubConnection::new("Success", vec![pending()]);

        let f = RemoteFunction::new(sum_function(), fast_options(staging.path(), true));
        let outcome: RemoteOutcome<i64> = f.call(&conn, CallArgs::default()).unwrap();
        assert!(matches!(outcome, RemoteOutcome::Unfinished(_)));
    }

    #[test]
    fn test_template_bootstraps_runner() {
        let options = RemoteOptions {
            requirements: "numpy".to_string(),
            inputs: vec!["s3://data/shared.csv".to_string()],
            ..Default::default()
        };
        let desc = job_template(&options);

        let script = desc.script.as_deref().unwrap();
        assert!(script.contains("numpy"));
        assert!(script.contains("runner.py -i $1 -o $2"));
        assert!(desc.inputs.starts_with(RUNNER_INPUTS));
        assert!(desc.inputs.ends_with("s3://data/shared.csv"));
        assert_eq!(desc.script_name.as_deref(), Some("exec.sh"));
        assert_eq!(desc.extra["jobtype"], Value::String("script".to_string()));
    }
}
