use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::domain::job_graph::task::{OperationKind, TaskState};
use crate::domain::scheduler::run_state::RunState;
use crate::domain::scheduler::run_status::StateCounts;
use crate::domain::utils::id::{BackendJobId, RunId, TaskId};
use crate::domain::utils::statistics::{TaskStatisticRow, or_na, write_task_statistics};
use crate::error::Result;
use crate::loader::parser::write_json_file_atomic;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskReport {
    pub task_id: TaskId,
    pub kind: OperationKind,
    pub state: TaskState,
    pub attempt_count: u32,
    pub backend_job_id: Option<BackendJobId>,
    pub last_error: Option<String>,
}

/// Outcome of a run, tasks in graph order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    pub counts: StateCounts,
    pub tasks: Vec<TaskReport>,
}

impl RunReport {
    pub fn from_state(state: &RunState, finished_at_ms: i64, cancelled: bool) -> Self {
        let tasks = state
            .graph()
            .tasks()
            .map(|task| TaskReport {
                task_id: task.id.clone(),
                kind: task.kind(),
                state: task.state,
                attempt_count: state.attempts(&task.id),
                backend_job_id: state.job_of(&task.id).cloned(),
                last_error: state.last_error(&task.id).map(str::to_string),
            })
            .collect();

        RunReport {
            run_id: state.run_id().clone(),
            started_at: timestamp(state.started_at_ms()),
            finished_at: timestamp(finished_at_ms),
            cancelled,
            counts: state.counts(),
            tasks,
        }
    }

    /// Every task reached `Success`.
    pub fn is_complete(&self) -> bool {
        self.tasks.iter().all(|t| t.state == TaskState::Success)
    }

    pub fn task(&self, task_id: &str) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.task_id.as_str() == task_id)
    }

    pub fn tasks_in(&self, state: TaskState) -> Vec<&TaskReport> {
        self.tasks.iter().filter(|t| t.state == state).collect()
    }

    pub fn summary_line(&self) -> String {
        format!(
            "{} succeeded, {} failed, {} blocked, {} cancelled of {} task(s) in {}s",
            self.counts.success,
            self.counts.failed_permanent,
            self.counts.blocked,
            self.counts.cancelled,
            self.tasks.len(),
            (self.finished_at - self.started_at).num_seconds()
        )
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        write_json_file_atomic(path, self)
    }

    /// Per-task statistics table (`;`-separated).
    pub fn write_statistics(&self, path: &Path) -> Result<()> {
        let rows: Vec<TaskStatisticRow> = self
            .tasks
            .iter()
            .map(|t| TaskStatisticRow {
                run_id: self.run_id.to_string(),
                task_id: t.task_id.to_string(),
                operation: t.kind.to_string(),
                final_state: t.state.to_string(),
                attempts: t.attempt_count,
                backend_job_id: or_na(t.backend_job_id.as_ref().map(|id| id.as_str())),
                last_error: or_na(t.last_error.as_deref()),
            })
            .collect();
        write_task_statistics(path, &rows)
    }
}

fn timestamp(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
