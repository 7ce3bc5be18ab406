//! Response shapes exchanged with the Kotta REST endpoints

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reply from the submit endpoint.
///
/// `status == "Success"` carries a `job_id`; anything else carries a
/// human-readable `reason` (or nothing at all, in which case callers report
/// the raw response).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Reply from the upload-url endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Raw reply from the status endpoint.
///
/// The server reports job fields as an indexed `items` object of single-entry
/// maps (`{"0": {"outputs": "..."}}`) that the client flattens before use.
/// Indexes are kept ordered so repeated `inputs`/`outputs` entries accumulate
/// deterministically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawStatus {
    pub status: String,
    #[serde(default)]
    pub items: BTreeMap<String, HashMap<String, Value>>,
}

/// Client-normalized view of a status reply.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    /// The server-reported status string, not yet validated.
    pub status: String,
    /// Accumulated raw `inputs` item values.
    pub inputs: Vec<String>,
    /// Accumulated raw `outputs` item values, one per produced artifact.
    pub outputs: Vec<String>,
    /// Every other echoed field, last value wins.
    pub fields: HashMap<String, Value>,
}

impl RawStatus {
    /// Flatten the indexed `items` object into a [`StatusUpdate`].
    pub fn flatten(&self) -> StatusUpdate {
        let mut update = StatusUpdate {
            status: self.status.clone(),
            ..Default::default()
        };
        for item in self.items.values() {
            for (key, value) in item {
                match key.as_str() {
                    "inputs" => update.inputs.push(stringify(value)),
                    "outputs" => update.outputs.push(stringify(value)),
                    _ => {
                        update.fields.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        update
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_accumulates_outputs() {
        let raw: RawStatus = serde_json::from_value(json!({
            "status": "completed",
            "items": {
                "0": {"outputs": "<i>a.txt</i>"},
                "1": {"outputs": "<i>b.txt</i>"},
                "2": {"queue": "Test"}
            }
        }))
        .unwrap();

        let update = raw.flatten();
        assert_eq!(update.status, "completed");
        assert_eq!(update.outputs, vec!["<i>a.txt</i>", "<i>b.txt</i>"]);
        assert_eq!(update.fields.get("queue"), Some(&json!("Test")));
    }

    #[test]
    fn test_flatten_without_items() {
        let raw: RawStatus = serde_json::from_value(json!({"status": "pending"})).unwrap();
        let update = raw.flatten();
        assert_eq!(update.status, "pending");
        assert!(update.outputs.is_empty());
        assert!(update.fields.is_empty());
    }
}
