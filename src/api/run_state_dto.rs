use serde::{Deserialize, Serialize};

use crate::domain::job_graph::artifact::Artifact;
use crate::domain::job_graph::task::{TaskDescriptor, TaskState};
use crate::domain::utils::id::{BackendJobId, RunId, TaskId};

/// On-disk form of a run, rewritten after every task transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshotDto {
    pub run_id: RunId,

    /// Milliseconds since the Unix epoch.
    pub written_at: i64,
    pub started_at: i64,
    pub tasks: Vec<TaskSnapshotDto>,
    pub artifacts: Vec<Artifact>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshotDto {
    pub task_id: TaskId,
    pub state: TaskState,
    pub attempt_count: u32,
    #[serde(default)]
    pub backend_job_id: Option<BackendJobId>,
    pub dependencies: Vec<TaskId>,
    #[serde(default)]
    pub last_error: Option<String>,
    pub task: TaskDescriptor,
}
