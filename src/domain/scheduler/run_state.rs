use bimap::BiMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::api::run_state_dto::{RunSnapshotDto, TaskSnapshotDto};
use crate::domain::clock::clock::{Clock, SharedClock};
use crate::domain::job_graph::graph::JobGraph;
use crate::domain::job_graph::task::TaskState;
use crate::domain::scheduler::run_status::StateCounts;
use crate::domain::utils::id::{BackendJobId, RunId, TaskId};
use crate::domain::utils::statistics::ANALYTICS_TARGET;
use crate::error::{Error, Result};
use crate::loader::parser::{parse_json_file, write_json_file_atomic};

/// Everything the dispatcher knows about one run. Owned by the dispatcher
/// loop, which is its only writer.
///
/// Every transition is persisted right away. Other bookkeeping (attempts,
/// job ids, errors) only marks the state dirty until the next transition or
/// an explicit `flush`.
#[derive(Debug)]
pub struct RunState {
    run_id: RunId,
    graph: JobGraph,
    attempts: HashMap<TaskId, u32>,

    /// Task ↔ job id of its latest attempt.
    jobs: BiMap<TaskId, BackendJobId>,

    /// Job ids of finished tasks whose id the backend has handed out again.
    /// Kept for reporting only.
    retired_jobs: HashMap<TaskId, BackendJobId>,
    last_errors: HashMap<TaskId, String>,

    started_at_ms: i64,
    snapshot_path: Option<PathBuf>,
    clock: SharedClock,
    dirty: bool,
}

impl RunState {
    /// Fresh state for `graph` under a new run id, persisted right away.
    pub fn init(graph: JobGraph, snapshot_path: Option<PathBuf>, clock: SharedClock) -> Result<Self> {
        let run_id = RunId::new(uuid::Uuid::new_v4().to_string());
        log::info!("Initialising run {} with {} task(s).", run_id, graph.len());

        let mut state = RunState {
            run_id,
            graph,
            attempts: HashMap::new(),
            jobs: BiMap::new(),
            retired_jobs: HashMap::new(),
            last_errors: HashMap::new(),
            started_at_ms: clock.get_current_time_in_ms(),
            snapshot_path,
            clock,
            dirty: true,
        };
        state.flush()?;
        Ok(state)
    }

    /// Loads a persisted run. Further snapshots overwrite the same file.
    pub fn restore(snapshot_path: &Path, clock: SharedClock) -> Result<Self> {
        let dto: RunSnapshotDto = parse_json_file(snapshot_path).map_err(|e| Error::SnapshotError(format!("{}: {}", snapshot_path.display(), e)))?;
        let state = Self::from_dto(dto, Some(snapshot_path.to_path_buf()), clock)?;
        log::info!("Restored run {} from '{}' ({} task(s)).", state.run_id, snapshot_path.display(), state.graph.len());
        Ok(state)
    }

    /// Graph of a persisted run, for inspection only. Nothing is written back.
    pub fn load_graph(snapshot_path: &Path) -> Result<JobGraph> {
        let dto: RunSnapshotDto = parse_json_file(snapshot_path).map_err(|e| Error::SnapshotError(format!("{}: {}", snapshot_path.display(), e)))?;
        Ok(Self::from_dto(dto, None, Clock::shared())?.graph)
    }

    /// Final persist; hands the graph back to the caller.
    pub fn teardown(mut self) -> Result<JobGraph> {
        self.dirty = true;
        self.flush()?;
        log::debug!("Run state {} released.", self.run_id);
        Ok(self.graph)
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn graph(&self) -> &JobGraph {
        &self.graph
    }

    pub fn started_at_ms(&self) -> i64 {
        self.started_at_ms
    }

    pub fn state_of(&self, task_id: &TaskId) -> Option<TaskState> {
        self.graph.state_of(task_id)
    }

    /// Moves a task to `to`, emitting an analytics event, and writes the
    /// snapshot. No-op when the task is already in `to`.
    pub fn transition(&mut self, task_id: &TaskId, to: TaskState) -> Result<()> {
        let attempt = self.attempts(task_id);
        let task = self.graph.get_mut(task_id).ok_or_else(|| Error::SnapshotError(format!("transition of unknown task '{}'", task_id)))?;
        let from = task.state;
        if from == to {
            return Ok(());
        }
        task.state = to;
        self.dirty = true;

        log::debug!("Task {} {} -> {}", task_id, from, to);
        tracing::info!(
            target: ANALYTICS_TARGET,
            Time = self.clock.get_current_time_in_s(),
            LogDescription = "Task state changed",
            RunId = %self.run_id,
            TaskId = %task_id,
            FromState = %from,
            ToState = %to,
            Attempt = attempt,
        );
        self.flush()
    }

    /// Counts a new attempt and returns the total so far.
    pub fn record_attempt(&mut self, task_id: &TaskId) -> u32 {
        let count = self.attempts.entry(task_id.clone()).or_insert(0);
        *count += 1;
        self.dirty = true;
        *count
    }

    pub fn attempts(&self, task_id: &TaskId) -> u32 {
        self.attempts.get(task_id).copied().unwrap_or(0)
    }

    pub fn reset_attempts(&mut self, task_id: &TaskId) {
        self.attempts.remove(task_id);
        self.dirty = true;
    }

    /// Binds the job of the latest attempt of `task_id`. Schedulers hand out
    /// ids again once their counter wraps; a finished task holding `job_id`
    /// keeps it in its report, an in-flight one is a conflict.
    pub fn bind_job(&mut self, task_id: &TaskId, job_id: BackendJobId) -> Result<()> {
        if let Some(holder) = self.jobs.get_by_right(&job_id).filter(|holder| *holder != task_id).cloned() {
            if self.state_of(&holder).is_some_and(|s| s.is_in_flight()) {
                return Err(Error::SubmissionError {
                    task_id: task_id.clone(),
                    message: format!("backend job '{}' is still bound to in-flight task '{}'", job_id, holder),
                });
            }
            log::debug!("Backend reused job id {}, previously held by task {}.", job_id, holder);
            self.jobs.remove_by_right(&job_id);
            self.retired_jobs.insert(holder, job_id.clone());
        }
        self.retired_jobs.remove(task_id);
        self.jobs.insert(task_id.clone(), job_id);
        self.dirty = true;
        Ok(())
    }

    pub fn job_of(&self, task_id: &TaskId) -> Option<&BackendJobId> {
        self.jobs.get_by_left(task_id).or_else(|| self.retired_jobs.get(task_id))
    }

    pub fn task_of_job(&self, job_id: &BackendJobId) -> Option<&TaskId> {
        self.jobs.get_by_right(job_id)
    }

    pub fn set_last_error(&mut self, task_id: &TaskId, message: impl Into<String>) {
        self.last_errors.insert(task_id.clone(), message.into());
        self.dirty = true;
    }

    pub fn clear_last_error(&mut self, task_id: &TaskId) {
        if self.last_errors.remove(task_id).is_some() {
            self.dirty = true;
        }
    }

    pub fn last_error(&self, task_id: &TaskId) -> Option<&str> {
        self.last_errors.get(task_id).map(String::as_str)
    }

    pub fn counts(&self) -> StateCounts {
        StateCounts::from_states(self.graph.tasks().map(|t| t.state))
    }

    pub fn all_terminal(&self) -> bool {
        self.graph.tasks().all(|t| t.state.is_terminal())
    }

    /// Ids of tasks currently in `state`, in graph order.
    pub fn tasks_in(&self, state: TaskState) -> Vec<TaskId> {
        self.graph.tasks().filter(|t| t.state == state).map(|t| t.id.clone()).collect()
    }

    /// Writes the snapshot if anything changed since the last write.
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(path) = &self.snapshot_path {
            write_json_file_atomic(path, &self.to_dto()).map_err(|e| Error::SnapshotError(format!("could not write '{}': {}", path.display(), e)))?;
        }
        self.dirty = false;
        Ok(())
    }

    pub fn to_dto(&self) -> RunSnapshotDto {
        let (tasks, artifacts) = self.graph.to_parts();
        RunSnapshotDto {
            run_id: self.run_id.clone(),
            written_at: self.clock.get_current_time_in_ms(),
            started_at: self.started_at_ms,
            tasks: tasks
                .into_iter()
                .map(|task| TaskSnapshotDto {
                    task_id: task.id.clone(),
                    state: task.state,
                    attempt_count: self.attempts(&task.id),
                    backend_job_id: self.job_of(&task.id).cloned(),
                    dependencies: task.dependencies.clone(),
                    last_error: self.last_error(&task.id).map(str::to_string),
                    task,
                })
                .collect(),
            artifacts,
        }
    }

    pub fn from_dto(dto: RunSnapshotDto, snapshot_path: Option<PathBuf>, clock: SharedClock) -> Result<Self> {
        let mut attempts = HashMap::new();
        let mut bindings = Vec::new();
        let mut last_errors = HashMap::new();
        let mut tasks = Vec::with_capacity(dto.tasks.len());

        for entry in dto.tasks {
            if entry.task.id != entry.task_id {
                return Err(Error::SnapshotError(format!("entry '{}' holds descriptor of task '{}'", entry.task_id, entry.task.id)));
            }
            if entry.task.dependencies != entry.dependencies {
                return Err(Error::SnapshotError(format!("dependencies of task '{}' are inconsistent", entry.task_id)));
            }
            if entry.attempt_count > 0 {
                attempts.insert(entry.task_id.clone(), entry.attempt_count);
            }
            if let Some(job_id) = entry.backend_job_id {
                bindings.push((entry.state.is_in_flight(), entry.task_id.clone(), job_id));
            }
            if let Some(message) = entry.last_error {
                last_errors.insert(entry.task_id.clone(), message);
            }

            let mut task = entry.task;
            task.state = entry.state;
            tasks.push(task);
        }

        let graph = JobGraph::from_tasks(tasks, dto.artifacts).map_err(|e| Error::SnapshotError(e.to_string()))?;

        let mut state = RunState {
            run_id: dto.run_id,
            graph,
            attempts,
            jobs: BiMap::new(),
            retired_jobs: HashMap::new(),
            last_errors,
            started_at_ms: dto.started_at,
            snapshot_path,
            clock,
            dirty: false,
        };

        // Finished tasks first, so that in-flight tasks end up holding a
        // reused id.
        bindings.sort_by_key(|(in_flight, _, _)| *in_flight);
        for (_, task_id, job_id) in bindings {
            state.bind_job(&task_id, job_id).map_err(|e| Error::SnapshotError(e.to_string()))?;
        }
        state.dirty = false;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::clock_mock::MockClock;
    use crate::domain::job_graph::task::{Operation, TaskDescriptor};
    use std::sync::Arc;

    fn graph() -> JobGraph {
        let a = TaskDescriptor::new("a", Operation::Aggregate, "echo a");
        let b = TaskDescriptor::new("b", Operation::Aggregate, "echo b").with_dependencies(&["a"]);
        JobGraph::from_tasks(vec![a, b], vec![]).unwrap()
    }

    #[test]
    fn snapshot_round_trip_keeps_bookkeeping() {
        let path = std::env::temp_dir().join(format!("run-state-{}", uuid::Uuid::new_v4())).join("state.json");
        let clock: SharedClock = Arc::new(MockClock::new(1_000));

        let mut state = RunState::init(graph(), Some(path.clone()), clock.clone()).unwrap();
        let a = TaskId::new("a");
        state.transition(&a, TaskState::Ready).unwrap();
        state.record_attempt(&a);
        state.transition(&a, TaskState::Submitted).unwrap();
        state.bind_job(&a, BackendJobId::new("4711")).unwrap();
        state.set_last_error(&a, "previous attempt lost");
        state.flush().unwrap();

        let restored = RunState::restore(&path, clock).unwrap();
        assert_eq!(restored.run_id(), state.run_id());
        assert_eq!(restored.state_of(&a), Some(TaskState::Submitted));
        assert_eq!(restored.attempts(&a), 1);
        assert_eq!(restored.task_of_job(&BackendJobId::new("4711")), Some(&a));
        assert_eq!(restored.last_error(&a), Some("previous attempt lost"));
        assert_eq!(restored.started_at_ms(), 1_000);

        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn unreadable_snapshot_is_a_snapshot_error() {
        let clock: SharedClock = Arc::new(MockClock::new(0));
        assert!(matches!(RunState::restore(Path::new("/no/such/state.json"), clock), Err(Error::SnapshotError(_))));
    }

    #[test]
    fn counts_and_terminal_check() {
        let clock: SharedClock = Arc::new(MockClock::new(0));
        let mut state = RunState::init(graph(), None, clock).unwrap();
        assert!(!state.all_terminal());

        state.transition(&TaskId::new("a"), TaskState::Success).unwrap();
        state.transition(&TaskId::new("b"), TaskState::Blocked).unwrap();
        assert!(state.all_terminal());
        assert_eq!(state.counts().success, 1);
        assert_eq!(state.tasks_in(TaskState::Blocked), vec![TaskId::new("b")]);
    }

    #[test]
    fn reused_job_id_keeps_finished_task_reportable() {
        let clock: SharedClock = Arc::new(MockClock::new(0));
        let mut state = RunState::init(graph(), None, clock.clone()).unwrap();
        let (a, b) = (TaskId::new("a"), TaskId::new("b"));
        let job = BackendJobId::new("1");

        state.bind_job(&a, job.clone()).unwrap();
        state.transition(&a, TaskState::Submitted).unwrap();
        assert!(matches!(state.bind_job(&b, job.clone()), Err(Error::SubmissionError { .. })));

        state.transition(&a, TaskState::Success).unwrap();
        state.bind_job(&b, job.clone()).unwrap();

        assert_eq!(state.job_of(&a), Some(&job));
        assert_eq!(state.job_of(&b), Some(&job));
        assert_eq!(state.task_of_job(&job), Some(&b));

        // The same bookkeeping survives a snapshot round trip.
        let restored = RunState::from_dto(state.to_dto(), None, clock).unwrap();
        assert_eq!(restored.job_of(&a), Some(&job));
        assert_eq!(restored.task_of_job(&job), Some(&b));
    }
}
