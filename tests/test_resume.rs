mod common;

use std::sync::Arc;

use rnaseq_orchestrator::domain::backend::backend_trait::BackendJobStatus;
use rnaseq_orchestrator::domain::backend::mock_backend::{MockBackend, MockOutcome};
use rnaseq_orchestrator::domain::clock::clock::Clock;
use rnaseq_orchestrator::domain::job_graph::task::TaskState;
use rnaseq_orchestrator::domain::scheduler::dispatcher::Dispatcher;
use rnaseq_orchestrator::domain::scheduler::run_state::RunState;
use rnaseq_orchestrator::domain::scheduler::scheduler_config::{ResumeOptions, SchedulerConfig};
use rnaseq_orchestrator::domain::utils::id::{BackendJobId, TaskId};
use rnaseq_orchestrator::error::Error;

use common::{fast_config, graph, job, scratch_dir};

fn config_with_snapshot(snapshot: &std::path::Path) -> SchedulerConfig {
    SchedulerConfig { snapshot_path: Some(snapshot.to_path_buf()), ..fast_config() }
}

#[tokio::test]
async fn test_resume_retries_failed_tasks_and_keeps_successes() {
    let dir = scratch_dir("resume-retry");
    let snapshot = dir.join("run_state.json");
    let tasks = || graph(vec![job("a", &[]), job("b", &["a"]), job("c", &["b"]), job("d", &[])]);

    let first_backend = Arc::new(MockBackend::new().with_outcomes("b", vec![MockOutcome::permanent("bad input")]));
    let first = Dispatcher::new(first_backend.clone(), config_with_snapshot(&snapshot)).run(tasks()).await.unwrap();
    assert_eq!(first.task("b").unwrap().state, TaskState::FailedPermanent);
    assert_eq!(first.task("c").unwrap().state, TaskState::Blocked);

    // Without `retry_failed` the run is already finished.
    let idle_backend = Arc::new(MockBackend::new());
    let unchanged = Dispatcher::new(idle_backend.clone(), config_with_snapshot(&snapshot)).resume(&snapshot).await.unwrap();
    assert_eq!(unchanged.run_id, first.run_id);
    assert_eq!(unchanged.task("b").unwrap().state, TaskState::FailedPermanent);
    assert!(idle_backend.submissions().is_empty());

    let second_backend = Arc::new(MockBackend::new());
    let second = Dispatcher::new(second_backend.clone(), config_with_snapshot(&snapshot))
        .resume_with(&snapshot, ResumeOptions { retry_failed: true })
        .await
        .unwrap();

    assert_eq!(second.run_id, first.run_id);
    assert!(second.is_complete());
    assert_eq!(second_backend.submissions(), vec![TaskId::new("b"), TaskId::new("c")]);
    assert_eq!(second.task("b").unwrap().attempt_count, 1);
    assert_eq!(second.task("a").unwrap().attempt_count, 1);

    std::fs::remove_dir_all(dir).unwrap();
}

/// Persists a run that was interrupted while `a` was on the backend.
fn interrupted_snapshot(snapshot: &std::path::Path, job_id: &str) {
    let mut state = RunState::init(graph(vec![job("a", &[]), job("b", &["a"])]), Some(snapshot.to_path_buf()), Clock::shared()).unwrap();
    let a = TaskId::new("a");
    state.transition(&a, TaskState::Ready).unwrap();
    state.record_attempt(&a);
    state.transition(&a, TaskState::Submitted).unwrap();
    state.bind_job(&a, BackendJobId::new(job_id)).unwrap();
    state.flush().unwrap();
}

#[tokio::test]
async fn test_resume_adopts_jobs_that_finished_meanwhile() {
    let dir = scratch_dir("resume-adopt");
    let snapshot = dir.join("run_state.json");
    interrupted_snapshot(&snapshot, "old-1");

    let backend = Arc::new(MockBackend::new().with_preset_job("old-1", BackendJobStatus::Succeeded));
    let report = Dispatcher::new(backend.clone(), config_with_snapshot(&snapshot)).resume(&snapshot).await.unwrap();

    assert!(report.is_complete());
    assert_eq!(backend.submission_count("a"), 0);
    assert_eq!(backend.submission_count("b"), 1);
    assert_eq!(report.task("a").unwrap().backend_job_id, Some(BackendJobId::new("old-1")));

    std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn test_resume_resubmits_vanished_jobs() {
    let dir = scratch_dir("resume-vanished");
    let snapshot = dir.join("run_state.json");
    interrupted_snapshot(&snapshot, "old-2");

    // The backend has never heard of `old-2`.
    let backend = Arc::new(MockBackend::new());
    let report = Dispatcher::new(backend.clone(), config_with_snapshot(&snapshot)).resume(&snapshot).await.unwrap();

    assert!(report.is_complete());
    assert_eq!(backend.submission_count("a"), 1);
    assert_eq!(report.task("a").unwrap().attempt_count, 2);

    std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn test_resume_follows_jobs_still_running() {
    let dir = scratch_dir("resume-running");
    let snapshot = dir.join("run_state.json");
    interrupted_snapshot(&snapshot, "old-3");

    let backend = Arc::new(MockBackend::new().with_preset_job("old-3", BackendJobStatus::Failed { message: "oom".to_string(), retriable: false }));
    let report = Dispatcher::new(backend.clone(), config_with_snapshot(&snapshot)).resume(&snapshot).await.unwrap();

    assert_eq!(report.task("a").unwrap().state, TaskState::FailedPermanent);
    assert_eq!(report.task("a").unwrap().last_error.as_deref(), Some("Task 'a' failed permanently: oom"));
    assert_eq!(report.task("b").unwrap().last_error.as_deref(), Some("blocked by a: Task 'a' failed permanently: oom"));
    assert_eq!(report.task("b").unwrap().state, TaskState::Blocked);
    assert!(backend.submissions().is_empty());

    std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn test_corrupt_snapshot_is_rejected() {
    let dir = scratch_dir("resume-corrupt");
    let snapshot = dir.join("run_state.json");
    std::fs::write(&snapshot, "{ \"runId\": ").unwrap();

    let backend = Arc::new(MockBackend::new());
    let result = Dispatcher::new(backend, config_with_snapshot(&snapshot)).resume(&snapshot).await;
    assert!(matches!(result, Err(Error::SnapshotError(_))));

    std::fs::remove_dir_all(dir).unwrap();
}
