use thiserror::Error;

use crate::domain::utils::id::TaskId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("File not found or could not be read: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("Failed to read or write table: {0}")]
    CsvError(#[from] csv::Error),

    /// Malformed annotation source or quantification table.
    #[error("Malformed input: {0}")]
    ParseError(String),

    /// Unsatisfiable operation plan, unresolved dependency or cycle.
    #[error("Failed to build job graph: {0}")]
    GraphBuildError(String),

    /// The cluster backend rejected a job.
    #[error("Backend rejected job for task '{task_id}': {message}")]
    SubmissionError { task_id: TaskId, message: String },

    #[error("Task '{task_id}' failed (retriable): {message}")]
    TransientExecutionError { task_id: TaskId, message: String },

    #[error("Task '{task_id}' failed permanently: {message}")]
    PermanentExecutionError { task_id: TaskId, message: String },

    /// Strict aggregation over tasks that did not reach `Success`.
    #[error("Results incomplete, {} task(s) without usable output: {}", .0.len(), join_ids(.0))]
    IncompleteResultsError(Vec<TaskId>),

    /// Transport level failure while talking to a cluster backend.
    #[error("Cluster backend error: {0}")]
    BackendError(String),

    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),

    #[error("Run state snapshot is unusable: {0}")]
    SnapshotError(String),
}

fn join_ids(ids: &[TaskId]) -> String {
    ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ")
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::BackendError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
