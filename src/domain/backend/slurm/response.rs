use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::backend::backend_trait::BackendJobStatus;

/// Body of `POST /job/submit`.
#[derive(Debug, Serialize)]
pub struct SlurmJobSubmitRequest {
    pub script: String,
    pub job: SlurmJobDescription,
}

#[derive(Debug, Serialize)]
pub struct SlurmJobDescription {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
    pub current_working_directory: String,
    pub environment: Vec<String>,
    pub cpus_per_task: u32,
    pub memory_per_node: SlurmNumericValue,

    /// Minutes.
    pub time_limit: SlurmNumericValue,
    pub standard_output: String,
}

/// Slurm's optional-number wrapper (`{"set": true, "infinite": false, "number": 5}`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SlurmNumericValue {
    #[serde(default)]
    pub set: bool,
    #[serde(default)]
    pub infinite: bool,
    #[serde(default)]
    pub number: i64,
}

impl SlurmNumericValue {
    pub fn of(number: i64) -> Self {
        SlurmNumericValue { set: true, infinite: false, number }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SlurmSubmitResponse {
    #[serde(default)]
    pub job_id: Option<u64>,
    #[serde(default)]
    pub errors: Vec<SlurmError>,
    #[serde(default)]
    pub warnings: Vec<SlurmWarning>,

    #[serde(flatten)]
    pub extra_fields: HashMap<String, serde_json::Value>,
}

/// Root response object for `GET /job/{id}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SlurmJobsResponse {
    #[serde(default)]
    pub jobs: Vec<SlurmJobInfo>,
    #[serde(default)]
    pub errors: Vec<SlurmError>,
    #[serde(default)]
    pub warnings: Vec<SlurmWarning>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SlurmJobInfo {
    pub job_id: u64,
    #[serde(default)]
    pub name: String,

    /// v0.0.40 reports a list of flags, the first one being the base state.
    #[serde(default)]
    pub job_state: Vec<String>,
    #[serde(default)]
    pub state_reason: String,
    #[serde(default)]
    pub exit_code: Option<SlurmExitCode>,

    #[serde(flatten)]
    pub extra_fields: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SlurmExitCode {
    #[serde(default)]
    pub status: Vec<String>,
    #[serde(default)]
    pub return_code: Option<SlurmNumericValue>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SlurmError {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub error_number: i64,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub source: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SlurmWarning {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub source: String,
}

pub fn describe_errors(errors: &[SlurmError]) -> String {
    errors.iter().map(|e| format!("{} ({}): {}", e.error, e.error_number, e.description)).collect::<Vec<_>>().join("; ")
}

impl SlurmJobInfo {
    pub fn to_status(&self) -> BackendJobStatus {
        let state = self.job_state.first().map(String::as_str).unwrap_or("PENDING");
        map_slurm_state(state, &self.state_reason)
    }
}

pub fn map_slurm_state(state: &str, reason: &str) -> BackendJobStatus {
    let failed = |retriable: bool| BackendJobStatus::Failed {
        message: if reason.is_empty() || reason == "None" { format!("job ended in state {}", state) } else { format!("job ended in state {} ({})", state, reason) },
        retriable,
    };

    match state {
        "PENDING" | "CONFIGURING" | "REQUEUED" | "REQUEUE_HOLD" | "REQUEUE_FED" | "SUSPENDED" => BackendJobStatus::Queued,
        "RUNNING" | "COMPLETING" | "STAGE_OUT" | "SIGNALING" | "RESIZING" => BackendJobStatus::Running,
        "COMPLETED" => BackendJobStatus::Succeeded,
        "FAILED" | "NODE_FAIL" | "PREEMPTED" | "BOOT_FAIL" => failed(true),
        "TIMEOUT" | "OUT_OF_MEMORY" | "CANCELLED" | "DEADLINE" => failed(false),
        _ => failed(false),
    }
}
