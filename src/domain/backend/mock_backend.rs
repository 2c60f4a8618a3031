use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use crate::domain::backend::backend_trait::{BackendJobStatus, ClusterBackend};
use crate::domain::job_graph::graph::JobGraph;
use crate::domain::job_graph::task::{Operation, TaskDescriptor};
use crate::domain::utils::id::{BackendJobId, TaskId};
use crate::error::{Error, Result};

/// Scripted result of one attempt of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOutcome {
    Succeed,
    Fail { message: String, retriable: bool },

    /// `submit` itself fails.
    RejectSubmit(String),

    /// The job disappears from the backend.
    Vanish,
}

impl MockOutcome {
    pub fn retriable(message: &str) -> Self {
        MockOutcome::Fail { message: message.to_string(), retriable: true }
    }

    pub fn permanent(message: &str) -> Self {
        MockOutcome::Fail { message: message.to_string(), retriable: false }
    }
}

#[derive(Debug)]
struct MockJob {
    task_id: TaskId,
    outcome: MockOutcome,
    polls_until_done: u32,
    finished: bool,
    cancelled: bool,
}

#[derive(Debug, Default)]
struct MockState {
    next_job: u64,
    scripts: HashMap<TaskId, VecDeque<MockOutcome>>,
    jobs: HashMap<BackendJobId, MockJob>,
    preset: HashMap<BackendJobId, BackendJobStatus>,

    submissions: Vec<TaskId>,
    cancellations: Vec<BackendJobId>,
    in_flight: usize,
    peak_in_flight: usize,

    outputs: HashMap<TaskId, Vec<(PathBuf, String)>>,
    written: Vec<PathBuf>,
}

/// In-memory backend for tests and dry runs.
///
/// Every attempt of a task consumes the next scripted outcome (default
/// `Succeed`). A job reports `Running` for `running_polls` polls before its
/// outcome becomes visible.
#[derive(Debug, Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
    running_polls: u32,
    materialize_outputs: bool,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_running_polls(mut self, polls: u32) -> Self {
        self.running_polls = polls;
        self
    }

    /// Outcomes for successive attempts of `task_id`.
    pub fn with_outcomes(mut self, task_id: &str, outcomes: Vec<MockOutcome>) -> Self {
        self.state_mut().scripts.insert(TaskId::new(task_id), outcomes.into());
        self
    }

    /// Status returned for a job id this backend never handed out, as if a
    /// previous process had submitted it.
    pub fn with_preset_job(mut self, job_id: &str, status: BackendJobStatus) -> Self {
        self.state_mut().preset.insert(BackendJobId::new(job_id), status);
        self
    }

    /// Write `contents` to `path` when `task_id` succeeds.
    pub fn with_output(mut self, task_id: &str, path: impl Into<PathBuf>, contents: &str) -> Self {
        self.state_mut().outputs.entry(TaskId::new(task_id)).or_default().push((path.into(), contents.to_string()));
        self
    }

    /// Create placeholder files for every declared output during `prepare`.
    pub fn materializing(mut self) -> Self {
        self.materialize_outputs = true;
        self
    }

    pub fn submissions(&self) -> Vec<TaskId> {
        self.state().submissions.clone()
    }

    pub fn submission_count(&self, task_id: &str) -> usize {
        self.state().submissions.iter().filter(|t| t.as_str() == task_id).count()
    }

    pub fn cancellations(&self) -> Vec<BackendJobId> {
        self.state().cancellations.clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.state().peak_in_flight
    }

    pub fn written_outputs(&self) -> Vec<PathBuf> {
        self.state().written.clone()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state_mut(&mut self) -> &mut MockState {
        self.state.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn finish_job(state: &mut MockState, job_id: &BackendJobId) -> Option<TaskId> {
        let job = state.jobs.get_mut(job_id)?;
        if job.finished {
            return None;
        }
        job.finished = true;
        let task_id = job.task_id.clone();
        state.in_flight = state.in_flight.saturating_sub(1);
        Some(task_id)
    }

    fn write_outputs(&self, task_id: &TaskId) -> Result<()> {
        let outputs = self.state().outputs.get(task_id).cloned().unwrap_or_default();
        for (path, contents) in outputs {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, contents)?;
            self.state().written.push(path);
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn prepare(&self, graph: &JobGraph) -> Result<()> {
        if !self.materialize_outputs {
            return Ok(());
        }
        let mut state = self.state();
        for task in graph.tasks().filter(|t| t.kind().runs_on_backend()) {
            if state.outputs.contains_key(&task.id) {
                continue;
            }
            let contents = match &task.operation {
                Operation::Quantify { events, .. } => {
                    let mut table = String::from("event_id\tsimulated\n");
                    for event in events {
                        table.push_str(&format!("{}\t1\n", event.event_id));
                    }
                    table
                }
                _ => String::new(),
            };
            let files: Vec<(PathBuf, String)> =
                task.outputs.iter().filter_map(|id| graph.artifact(id)).map(|artifact| (artifact.path.clone(), contents.clone())).collect();
            state.outputs.insert(task.id.clone(), files);
        }
        Ok(())
    }

    async fn submit(&self, task: &TaskDescriptor) -> Result<BackendJobId> {
        let mut state = self.state();
        state.submissions.push(task.id.clone());

        let outcome = state.scripts.get_mut(&task.id).and_then(|script| script.pop_front()).unwrap_or(MockOutcome::Succeed);
        if let MockOutcome::RejectSubmit(message) = outcome {
            return Err(Error::SubmissionError { task_id: task.id.clone(), message });
        }

        state.next_job += 1;
        let job_id = BackendJobId::new(format!("mock-{}", state.next_job));
        state.jobs.insert(
            job_id.clone(),
            MockJob { task_id: task.id.clone(), outcome, polls_until_done: self.running_polls, finished: false, cancelled: false },
        );
        state.in_flight += 1;
        state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
        Ok(job_id)
    }

    async fn status(&self, job_id: &BackendJobId) -> Result<BackendJobStatus> {
        let (status, succeeded_task) = {
            let mut state = self.state();
            if let Some(status) = state.preset.get(job_id) {
                return Ok(status.clone());
            }

            let job = match state.jobs.get_mut(job_id) {
                Some(job) => job,
                None => return Ok(BackendJobStatus::Missing),
            };
            if job.cancelled {
                return Ok(BackendJobStatus::Failed { message: "cancelled".to_string(), retriable: false });
            }
            if job.polls_until_done > 0 {
                job.polls_until_done -= 1;
                return Ok(BackendJobStatus::Running);
            }

            let status = match &job.outcome {
                MockOutcome::Succeed => BackendJobStatus::Succeeded,
                MockOutcome::Fail { message, retriable } => BackendJobStatus::Failed { message: message.clone(), retriable: *retriable },
                MockOutcome::Vanish => BackendJobStatus::Missing,
                MockOutcome::RejectSubmit(_) => BackendJobStatus::Missing,
            };
            let finished_task = Self::finish_job(&mut state, job_id);
            let succeeded_task = if status == BackendJobStatus::Succeeded { finished_task } else { None };
            (status, succeeded_task)
        };

        if let Some(task_id) = succeeded_task {
            self.write_outputs(&task_id)?;
        }
        Ok(status)
    }

    async fn cancel(&self, job_id: &BackendJobId) -> Result<()> {
        let mut state = self.state();
        state.cancellations.push(job_id.clone());
        Self::finish_job(&mut state, job_id);
        if let Some(job) = state.jobs.get_mut(job_id) {
            job.cancelled = true;
        }
        Ok(())
    }
}
