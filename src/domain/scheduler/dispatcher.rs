use futures::StreamExt;
use futures::stream;
use slotmap::SecondaryMap;
use std::path::Path;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::domain::backend::backend_trait::{BackendJobStatus, SharedBackend};
use crate::domain::clock::clock::{Clock, SharedClock};
use crate::domain::job_graph::graph::{JobGraph, TaskKey};
use crate::domain::job_graph::task::{Operation, TaskDescriptor, TaskState};
use crate::domain::results::aggregator::{AggregationMode, Aggregator, OutputSpec};
use crate::domain::scheduler::run_report::RunReport;
use crate::domain::scheduler::run_state::RunState;
use crate::domain::scheduler::run_status::RunStatus;
use crate::domain::scheduler::scheduler_config::{ResumeOptions, SchedulerConfig};
use crate::domain::utils::id::{BackendJobId, TaskId};
use crate::error::{Error, Result};

/// Drives a job graph to completion against a cluster backend.
///
/// A single coordinator loop owns the `RunState`. Backend calls of one phase
/// run concurrently, bounded by `io_workers`; their results are applied by the
/// loop afterwards, so the state has one writer.
#[derive(Debug)]
pub struct Dispatcher {
    backend: SharedBackend,
    config: SchedulerConfig,
    clock: SharedClock,

    /// Filters for the in-graph aggregate task. Its mode is always strict.
    output_spec: OutputSpec,

    cancel: CancellationToken,
    status_tx: watch::Sender<RunStatus>,
}

/// Per-run values computed once before the loop starts.
struct Schedule {
    topological: Vec<TaskKey>,
    descendants: SecondaryMap<TaskKey, usize>,
}

impl Dispatcher {
    pub fn new(backend: SharedBackend, config: SchedulerConfig) -> Self {
        let (status_tx, _) = watch::channel(RunStatus::idle());
        Dispatcher { backend, config, clock: Clock::shared(), output_spec: OutputSpec::strict(), cancel: CancellationToken::new(), status_tx }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_output_spec(mut self, output_spec: OutputSpec) -> Self {
        self.output_spec = output_spec.with_mode(AggregationMode::Strict);
        self
    }

    /// Cancelling this token stops the run: in-flight jobs are cancelled on the
    /// backend and every unfinished task becomes `Cancelled`.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Progress updates, one per scheduling iteration.
    pub fn subscribe(&self) -> watch::Receiver<RunStatus> {
        self.status_tx.subscribe()
    }

    pub async fn run(&self, graph: JobGraph) -> Result<RunReport> {
        let state = RunState::init(graph, self.config.snapshot_path.clone(), self.clock.clone())?;
        self.drive(state).await
    }

    pub async fn resume(&self, snapshot_path: &Path) -> Result<RunReport> {
        self.resume_with(snapshot_path, ResumeOptions::default()).await
    }

    /// Continues a persisted run. `Success` tasks are kept; tasks that were on
    /// the backend are reconciled with it before scheduling resumes.
    pub async fn resume_with(&self, snapshot_path: &Path, options: ResumeOptions) -> Result<RunReport> {
        let mut state = RunState::restore(snapshot_path, self.clock.clone())?;
        self.reconcile(&mut state, options).await?;
        state.flush()?;
        self.drive(state).await
    }

    async fn drive(&self, mut state: RunState) -> Result<RunReport> {
        self.backend.prepare(state.graph()).await?;
        let schedule = Schedule { topological: state.graph().topological_order()?, descendants: state.graph().descendant_counts()? };

        log::info!(
            "Run {} started on backend '{}': {} task(s), max {} concurrent, {} retries.",
            state.run_id(),
            self.backend.name(),
            state.graph().len(),
            self.config.max_concurrent,
            self.config.max_retries
        );

        let mut iteration: u64 = 0;
        let mut cancelled = false;

        loop {
            iteration += 1;

            if self.cancel.is_cancelled() {
                self.cancel_run(&mut state).await?;
                cancelled = true;
                break;
            }

            self.promote(&mut state, &schedule)?;
            self.run_local_tasks(&mut state)?;
            // Local tasks may have unblocked or blocked others.
            self.promote(&mut state, &schedule)?;
            state.flush()?;

            self.submit_ready(&mut state, &schedule).await?;
            state.flush()?;

            self.publish(&state, iteration, false);

            if state.all_terminal() {
                break;
            }

            let in_flight = state.counts().in_flight();
            if in_flight > 0 {
                tokio::select! {
                    _ = self.cancel.cancelled() => continue,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
                self.poll_in_flight(&mut state).await?;
                state.flush()?;
            } else if state.counts().ready == 0 && state.counts().pending > 0 {
                // Nothing on the backend and nothing promotable: dependencies can never be met.
                return Err(Error::GraphBuildError(format!("run {} stalled with {} pending task(s)", state.run_id(), state.counts().pending)));
            }
        }

        self.publish(&state, iteration, true);
        let report = RunReport::from_state(&state, self.clock.get_current_time_in_ms(), cancelled);
        state.teardown()?;

        log::info!("Run {} finished: {}", report.run_id, report.summary_line());
        Ok(report)
    }

    /// `Pending → Ready` once all dependencies succeeded, `Pending → Blocked`
    /// as soon as one of them can never succeed. Walking in topological order
    /// makes one pass reach the fixpoint.
    fn promote(&self, state: &mut RunState, schedule: &Schedule) -> Result<()> {
        for &key in &schedule.topological {
            let (task_id, blocker, all_succeeded) = {
                let task = match state.graph().task(key) {
                    Some(task) if task.state == TaskState::Pending => task,
                    _ => continue,
                };
                let blocker = task.dependencies.iter().find(|d| state.state_of(d).is_some_and(|s| s.blocks_dependents())).cloned();
                let all_succeeded = task.dependencies.iter().all(|d| state.state_of(d) == Some(TaskState::Success));
                (task.id.clone(), blocker, all_succeeded)
            };

            if let Some(dependency) = blocker {
                let message = Self::blocked_message(state, &dependency);
                log::warn!("Task {} is {}.", task_id, message);
                state.set_last_error(&task_id, message);
                state.transition(&task_id, TaskState::Blocked)?;
            } else if all_succeeded {
                state.transition(&task_id, TaskState::Ready)?;
            }
        }
        Ok(())
    }

    /// A blocked dependency already names the task that failed, so its
    /// message is passed on unchanged.
    fn blocked_message(state: &RunState, dependency: &TaskId) -> String {
        match (state.state_of(dependency), state.last_error(dependency)) {
            (Some(TaskState::Blocked), Some(message)) => message.to_string(),
            (_, message) => format!("blocked by {}: {}", dependency, message.unwrap_or("dependency did not succeed")),
        }
    }

    /// Runs `Ready` tasks that execute in-process (the aggregate task).
    fn run_local_tasks(&self, state: &mut RunState) -> Result<()> {
        let local: Vec<TaskId> =
            state.graph().tasks().filter(|t| t.state == TaskState::Ready && !t.kind().runs_on_backend()).map(|t| t.id.clone()).collect();

        for task_id in local {
            state.record_attempt(&task_id);
            state.transition(&task_id, TaskState::Running)?;

            match self.execute_local(state.graph(), &task_id) {
                Ok(()) => {
                    state.clear_last_error(&task_id);
                    state.transition(&task_id, TaskState::Success)?;
                }
                Err(e) => {
                    let error = Error::PermanentExecutionError { task_id: task_id.clone(), message: e.to_string() };
                    log::error!("{}", error);
                    state.set_last_error(&task_id, error.to_string());
                    state.transition(&task_id, TaskState::Failed)?;
                    // Deterministic over the same inputs, a retry cannot help.
                    state.transition(&task_id, TaskState::FailedPermanent)?;
                }
            }
        }
        Ok(())
    }

    fn execute_local(&self, graph: &JobGraph, task_id: &TaskId) -> Result<()> {
        let task = graph.get(task_id).ok_or_else(|| Error::GraphBuildError(format!("unknown task '{}'", task_id)))?;
        match &task.operation {
            Operation::Aggregate => {
                let summary = Aggregator::aggregate(graph, &self.output_spec)?;
                let output = task
                    .outputs
                    .first()
                    .and_then(|id| graph.artifact(id))
                    .ok_or_else(|| Error::GraphBuildError(format!("aggregate task '{}' has no output artifact", task_id)))?;
                summary.write_tsv(&output.path)
            }
            other => Err(Error::GraphBuildError(format!("operation {} cannot run locally", other.kind()))),
        }
    }

    /// Hands `Ready` backend tasks to the cluster, most dependents first,
    /// without exceeding `max_concurrent` jobs in flight.
    async fn submit_ready(&self, state: &mut RunState, schedule: &Schedule) -> Result<()> {
        let in_flight = state.counts().in_flight();
        let capacity = self.config.max_concurrent.saturating_sub(in_flight);
        if capacity == 0 {
            return Ok(());
        }

        let mut ready: Vec<(usize, usize, TaskDescriptor)> = state
            .graph()
            .keys()
            .iter()
            .enumerate()
            .filter_map(|(position, key)| {
                let task = state.graph().task(*key)?;
                (task.state == TaskState::Ready && task.kind().runs_on_backend())
                    .then(|| (schedule.descendants.get(*key).copied().unwrap_or(0), position, task.clone()))
            })
            .collect();
        if ready.is_empty() {
            return Ok(());
        }
        ready.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        ready.truncate(capacity);

        for (_, _, task) in &ready {
            state.record_attempt(&task.id);
        }

        let backend = &self.backend;
        let results: Vec<(TaskId, Result<BackendJobId>)> = stream::iter(ready.into_iter().map(|(_, _, task)| task))
            .map(|task| async move {
                let result = backend.submit(&task).await;
                (task.id, result)
            })
            .buffer_unordered(self.config.io_workers)
            .collect()
            .await;

        for (task_id, result) in results {
            match result {
                Ok(job_id) => {
                    log::info!("Submitted task {} as job {} (attempt {}).", task_id, job_id, state.attempts(&task_id));
                    match state.bind_job(&task_id, job_id) {
                        Ok(()) => state.transition(&task_id, TaskState::Submitted)?,
                        Err(e) => self.handle_failure(state, &task_id, e.to_string(), true)?,
                    }
                }
                Err(e) => {
                    log::warn!("Submission of task {} failed: {}", task_id, e);
                    self.handle_failure(state, &task_id, e.to_string(), true)?;
                }
            }
        }
        Ok(())
    }

    /// Queries the backend for every in-flight task and applies the answers.
    async fn poll_in_flight(&self, state: &mut RunState) -> Result<()> {
        let in_flight: Vec<(TaskId, BackendJobId)> = state
            .graph()
            .tasks()
            .filter(|t| t.state.is_in_flight())
            .filter_map(|t| state.job_of(&t.id).map(|job| (t.id.clone(), job.clone())))
            .collect();

        let results = self.query_statuses(in_flight).await;
        for (task_id, status) in results {
            self.apply_status(state, &task_id, status)?;
        }
        Ok(())
    }

    async fn query_statuses(&self, jobs: Vec<(TaskId, BackendJobId)>) -> Vec<(TaskId, Result<BackendJobStatus>)> {
        let backend = &self.backend;
        stream::iter(jobs)
            .map(|(task_id, job_id)| async move {
                let status = backend.status(&job_id).await;
                (task_id, status)
            })
            .buffer_unordered(self.config.io_workers)
            .collect()
            .await
    }

    /// The job binding is kept after the job finishes so that reports name
    /// the job of the last attempt.
    fn apply_status(&self, state: &mut RunState, task_id: &TaskId, status: Result<BackendJobStatus>) -> Result<()> {
        match status {
            Ok(BackendJobStatus::Queued) => state.transition(task_id, TaskState::Submitted),
            Ok(BackendJobStatus::Running) => state.transition(task_id, TaskState::Running),
            Ok(BackendJobStatus::Succeeded) => {
                state.clear_last_error(task_id);
                log::info!("Task {} succeeded.", task_id);
                state.transition(task_id, TaskState::Success)
            }
            Ok(BackendJobStatus::Failed { message, retriable }) => self.handle_failure(state, task_id, message, retriable),
            Ok(BackendJobStatus::Missing) => self.handle_failure(state, task_id, "job vanished from the backend".to_string(), true),
            Err(e) => {
                log::warn!("Status query for job {:?} of task {} failed: {}", state.job_of(task_id), task_id, e);
                self.handle_failure(state, task_id, e.to_string(), true)
            }
        }
    }

    /// `Failed`, then back to `Ready` while `attempts <= max_retries`,
    /// otherwise `FailedPermanent`. The report keeps the classified error.
    fn handle_failure(&self, state: &mut RunState, task_id: &TaskId, message: String, retriable: bool) -> Result<()> {
        let attempts = state.attempts(task_id);
        let error = if retriable && attempts <= self.config.max_retries {
            Error::TransientExecutionError { task_id: task_id.clone(), message }
        } else {
            Error::PermanentExecutionError { task_id: task_id.clone(), message }
        };
        state.set_last_error(task_id, error.to_string());
        state.transition(task_id, TaskState::Failed)?;

        match &error {
            Error::TransientExecutionError { .. } => {
                log::warn!("{} (attempt {}), retrying.", error, attempts);
                state.transition(task_id, TaskState::Ready)
            }
            _ => {
                log::error!("{} (after {} attempt(s)).", error, attempts);
                state.transition(task_id, TaskState::FailedPermanent)
            }
        }
    }

    /// Cancels in-flight jobs and marks every unfinished task `Cancelled`.
    async fn cancel_run(&self, state: &mut RunState) -> Result<()> {
        log::warn!("Cancellation requested for run {}.", state.run_id());

        let in_flight: Vec<(TaskId, BackendJobId)> = state
            .graph()
            .tasks()
            .filter(|t| t.state.is_in_flight())
            .filter_map(|t| state.job_of(&t.id).map(|job| (t.id.clone(), job.clone())))
            .collect();

        let backend = &self.backend;
        let results: Vec<(TaskId, BackendJobId, Result<()>)> = stream::iter(in_flight)
            .map(|(task_id, job_id)| async move {
                let result = backend.cancel(&job_id).await;
                (task_id, job_id, result)
            })
            .buffer_unordered(self.config.io_workers)
            .collect()
            .await;

        for (task_id, job_id, result) in results {
            if let Err(e) = result {
                log::error!("Could not cancel job {} of task {}: {}", job_id, task_id, e);
                state.set_last_error(&task_id, format!("cancel failed: {}", e));
            }
        }

        let unfinished: Vec<TaskId> = state.graph().tasks().filter(|t| !t.state.is_terminal()).map(|t| t.id.clone()).collect();
        for task_id in unfinished {
            state.transition(&task_id, TaskState::Cancelled)?;
        }
        state.flush()
    }

    /// Brings a restored run back into a schedulable shape.
    async fn reconcile(&self, state: &mut RunState, options: ResumeOptions) -> Result<()> {
        let tasks: Vec<(TaskId, TaskState)> = state.graph().tasks().map(|t| (t.id.clone(), t.state)).collect();
        let mut on_backend = Vec::new();

        for (task_id, task_state) in tasks {
            match task_state {
                TaskState::Success | TaskState::Pending => {}
                TaskState::Ready | TaskState::Cancelled => state.transition(&task_id, TaskState::Pending)?,
                // Interrupted between the failure and the retry decision; the
                // classified error is already recorded.
                TaskState::Failed => {
                    let target = if state.attempts(&task_id) <= self.config.max_retries { TaskState::Pending } else { TaskState::FailedPermanent };
                    state.transition(&task_id, target)?;
                }
                TaskState::FailedPermanent | TaskState::Blocked => {
                    if options.retry_failed {
                        state.reset_attempts(&task_id);
                        state.clear_last_error(&task_id);
                        state.transition(&task_id, TaskState::Pending)?;
                    }
                }
                TaskState::Submitted | TaskState::Running => match state.job_of(&task_id) {
                    Some(job_id) => on_backend.push((task_id.clone(), job_id.clone())),
                    // Interrupted before the job id was recorded.
                    None => state.transition(&task_id, TaskState::Pending)?,
                },
            }
        }

        if !on_backend.is_empty() {
            log::info!("Reconciling {} in-flight task(s) with backend '{}'.", on_backend.len(), self.backend.name());
        }
        let results = self.query_statuses(on_backend).await;
        for (task_id, status) in results {
            self.apply_status(state, &task_id, status)?;
            // Retries re-enter through promotion.
            if state.state_of(&task_id) == Some(TaskState::Ready) {
                state.transition(&task_id, TaskState::Pending)?;
            }
        }
        Ok(())
    }

    fn publish(&self, state: &RunState, iteration: u64, finished: bool) {
        self.status_tx.send_replace(RunStatus { run_id: Some(state.run_id().clone()), iteration, counts: state.counts(), finished });
    }
}
