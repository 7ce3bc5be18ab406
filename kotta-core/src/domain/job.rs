//! Job domain types

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Client-observed lifecycle state of a Kotta job.
///
/// `unsubmitted -> pending` on a successful submit; the intermediate states
/// (`staging_inputs`, `processing`, `staging_outputs`) are discovered via
/// polling; `completed`, `cancelled` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Unsubmitted,
    Pending,
    StagingInputs,
    Processing,
    StagingOutputs,
    Completed,
    Cancelled,
    Failed,
}

/// The server reported a status string outside the known enumeration.
///
/// Intentionally strict: protocol drift surfaces immediately instead of being
/// coerced into a known state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid job status: {0:?}")]
pub struct InvalidStatus(pub String);

impl JobStatus {
    /// The wire string for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Unsubmitted => "unsubmitted",
            JobStatus::Pending => "pending",
            JobStatus::StagingInputs => "staging_inputs",
            JobStatus::Processing => "processing",
            JobStatus::StagingOutputs => "staging_outputs",
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether no further transitions can occur from this status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Cancelled | JobStatus::Failed
        )
    }
}

impl FromStr for JobStatus {
    type Err = InvalidStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unsubmitted" => Ok(JobStatus::Unsubmitted),
            "pending" => Ok(JobStatus::Pending),
            "staging_inputs" => Ok(JobStatus::StagingInputs),
            "processing" => Ok(JobStatus::Processing),
            "staging_outputs" => Ok(JobStatus::StagingOutputs),
            "completed" => Ok(JobStatus::Completed),
            "cancelled" => Ok(JobStatus::Cancelled),
            "failed" => Ok(JobStatus::Failed),
            other => Err(InvalidStatus(other.to_string())),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable specification of a job prior to and during submission.
///
/// Recognized options are named fields; anything else the caller or the
/// server supplies is kept opaquely in `extra` so server-added keys survive
/// a round trip. `inputs` and `outputs` are comma-joined lists and must only
/// be grown through [`add_inputs`](Self::add_inputs) /
/// [`add_outputs`](Self::add_outputs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescription {
    pub inputs: String,
    pub outputs: String,
    pub walltime: u64,
    pub queue: String,
    pub output_file_stdout: String,
    pub output_file_stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jobname: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl Default for JobDescription {
    fn default() -> Self {
        Self {
            inputs: String::new(),
            outputs: String::new(),
            walltime: 300,
            queue: "Test".to_string(),
            output_file_stdout: "STDOUT.txt".to_string(),
            output_file_stderr: "STDERR.txt".to_string(),
            script: None,
            script_name: None,
            executable: None,
            jobname: None,
            extra: HashMap::new(),
        }
    }
}

/// Render a JSON value as a flat form-field string.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl JobDescription {
    /// Append entries to the comma-joined `inputs` list.
    ///
    /// A no-op on an empty slice; existing content is never overwritten.
    pub fn add_inputs<S: AsRef<str>>(&mut self, inputs: &[S]) {
        append_csl(&mut self.inputs, inputs);
    }

    /// Append entries to the comma-joined `outputs` list.
    pub fn add_outputs<S: AsRef<str>>(&mut self, outputs: &[S]) {
        append_csl(&mut self.outputs, outputs);
    }

    /// Fold server-reported fields over the description in place.
    ///
    /// Recognized keys land in the named fields, everything else is stored
    /// in `extra`. This is how a job pulls server state into its own
    /// description without a separate shadow structure.
    pub fn merge(&mut self, fields: &HashMap<String, Value>) {
        for (key, value) in fields {
            match key.as_str() {
                "inputs" => self.inputs = value_to_string(value),
                "outputs" => self.outputs = value_to_string(value),
                "walltime" => {
                    if let Some(w) = value
                        .as_u64()
                        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
                    {
                        self.walltime = w;
                    }
                }
                "queue" => self.queue = value_to_string(value),
                "output_file_stdout" => self.output_file_stdout = value_to_string(value),
                "output_file_stderr" => self.output_file_stderr = value_to_string(value),
                "script" => self.script = Some(value_to_string(value)),
                "script_name" => self.script_name = Some(value_to_string(value)),
                "executable" => self.executable = Some(value_to_string(value)),
                "jobname" => self.jobname = Some(value_to_string(value)),
                _ => {
                    self.extra.insert(key.clone(), value.clone());
                }
            }
        }
    }

    /// Flatten into form-encoded key/value pairs for the submit endpoint.
    ///
    /// Unset optional fields are skipped; opaque extras are stringified.
    pub fn to_form(&self) -> Vec<(String, String)> {
        let mut form = vec![
            ("inputs".to_string(), self.inputs.clone()),
            ("outputs".to_string(), self.outputs.clone()),
            ("walltime".to_string(), self.walltime.to_string()),
            ("queue".to_string(), self.queue.clone()),
            (
                "output_file_stdout".to_string(),
                self.output_file_stdout.clone(),
            ),
            (
                "output_file_stderr".to_string(),
                self.output_file_stderr.clone(),
            ),
        ];
        for (key, value) in [
            ("script", &self.script),
            ("script_name", &self.script_name),
            ("executable", &self.executable),
            ("jobname", &self.jobname),
        ] {
            if let Some(value) = value {
                form.push((key.to_string(), value.clone()));
            }
        }
        for (key, value) in &self.extra {
            form.push((key.clone(), value_to_string(value)));
        }
        form
    }
}

fn append_csl<S: AsRef<str>>(field: &mut String, entries: &[S]) {
    if entries.is_empty() {
        return;
    }
    let joined = entries
        .iter()
        .map(|e| e.as_ref())
        .collect::<Vec<_>>()
        .join(",");
    if field.is_empty() {
        *field = joined;
    } else {
        field.push(',');
        field.push_str(&joined);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            JobStatus::Unsubmitted,
            JobStatus::Pending,
            JobStatus::StagingInputs,
            JobStatus::Processing,
            JobStatus::StagingOutputs,
            JobStatus::Completed,
            JobStatus::Cancelled,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_status_rejects_unknown_string() {
        let err = "exploded".parse::<JobStatus>().unwrap_err();
        assert_eq!(err, InvalidStatus("exploded".to_string()));
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::StagingOutputs.is_terminal());
    }

    #[test]
    fn test_add_inputs_empty_is_noop() {
        let mut desc = JobDescription::default();
        desc.add_inputs::<&str>(&[]);
        assert_eq!(desc.inputs, "");
    }

    #[test]
    fn test_add_inputs_joins_with_commas() {
        let mut desc = JobDescription::default();
        desc.add_inputs(&["a", "b"]);
        assert_eq!(desc.inputs, "a,b");
    }

    #[test]
    fn test_add_inputs_appends_to_existing() {
        let mut desc = JobDescription {
            inputs: "x".to_string(),
            ..Default::default()
        };
        desc.add_inputs(&["a", "b"]);
        assert_eq!(desc.inputs, "x,a,b");
    }

    #[test]
    fn test_add_outputs_appends_to_existing() {
        let mut desc = JobDescription::default();
        desc.add_outputs(&["out.pkl"]);
        desc.add_outputs(&["extra.txt"]);
        assert_eq!(desc.outputs, "out.pkl,extra.txt");
    }

    #[test]
    fn test_merge_known_and_unknown_fields() {
        let mut desc = JobDescription::default();
        let mut fields = HashMap::new();
        fields.insert("queue".to_string(), Value::String("Prod".to_string()));
        fields.insert("walltime".to_string(), Value::from(900u64));
        fields.insert("submit_time".to_string(), Value::from(12345u64));
        desc.merge(&fields);

        assert_eq!(desc.queue, "Prod");
        assert_eq!(desc.walltime, 900);
        assert_eq!(desc.extra.get("submit_time"), Some(&Value::from(12345u64)));
    }

    #[test]
    fn test_to_form_skips_unset_options() {
        let desc = JobDescription::default();
        let form = desc.to_form();
        assert!(form.iter().all(|(k, _)| k != "script"));
        assert!(form.iter().any(|(k, v)| k == "queue" && v == "Test"));
        assert!(form.iter().any(|(k, v)| k == "walltime" && v == "300"));
    }

    #[test]
    fn test_clone_is_structural() {
        let mut desc = JobDescription::default();
        desc.add_inputs(&["a"]);
        let mut copy = desc.clone();
        copy.add_inputs(&["b"]);
        assert_eq!(desc.inputs, "a");
        assert_eq!(copy.inputs, "a,b");
    }
}
